use bevy::prelude::{IVec3, Vec3};

use crate::math::Real;

/// Number of neighbors in the 3x3x3 kernel
pub const NEIGHBOR_COUNT: usize = 27;
/// MPM kernel size (quadratic B-spline)
pub const KERNEL_SIZE: usize = 3;

/// Compute the inverse dimension factor used by MLS-MPM kernels.
///
/// Positions are in grid units, so the factor for a unit cell is 4.
#[inline]
pub fn inv_d(cell_width: Real) -> Real {
    4.0 / (cell_width * cell_width)
}

#[inline(always)]
fn bspline_weights(d: f32) -> [f32; 3] {
    [
        0.5 * (0.5 - d) * (0.5 - d),
        0.75 - d * d,
        0.5 * (0.5 + d) * (0.5 + d),
    ]
}

/// Quadratic B-spline stencil of one particle, in grid coordinates
pub struct GridInterpolation {
    pub base_cell: IVec3,
    pub weights: [Vec3; 3],
}

impl GridInterpolation {
    #[inline(always)]
    pub fn compute_for_particle(position: Vec3) -> Self {
        let base_cell = position.floor().as_ivec3() - IVec3::ONE;
        let center_cell = base_cell + IVec3::ONE;
        let cell_difference = position - center_cell.as_vec3() - 0.5;

        let x = bspline_weights(cell_difference.x);
        let y = bspline_weights(cell_difference.y);
        let z = bspline_weights(cell_difference.z);

        Self {
            base_cell,
            weights: [
                Vec3::new(x[0], y[0], z[0]),
                Vec3::new(x[1], y[1], z[1]),
                Vec3::new(x[2], y[2], z[2]),
            ],
        }
    }

    /// Iterator over (coordinate, weight, distance) for all 27 neighbors
    #[inline(always)]
    pub fn iter_neighbors(&self, position: Vec3) -> impl Iterator<Item = (IVec3, f32, Vec3)> + '_ {
        (0..NEIGHBOR_COUNT).map(move |idx| {
            let gx = idx % KERNEL_SIZE;
            let gy = (idx / KERNEL_SIZE) % KERNEL_SIZE;
            let gz = idx / (KERNEL_SIZE * KERNEL_SIZE);
            let coord = self.base_cell + IVec3::new(gx as i32, gy as i32, gz as i32);
            let weight = self.weights[gx].x * self.weights[gy].y * self.weights[gz].z;
            let distance = coord.as_vec3() - position + 0.5;
            (coord, weight, distance)
        })
    }
}
