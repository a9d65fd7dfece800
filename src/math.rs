use bevy::math::{Mat3, Mat4, Vec3};

pub type Real = f32;
pub const DIM: usize = 3;

pub type Vector = Vec3;
pub type Matrix = Mat3;
pub type Point = Vec3;

#[inline(always)]
pub fn matrix_trace(m: &Matrix) -> Real {
    m.x_axis.x + m.y_axis.y + m.z_axis.z
}

#[inline(always)]
pub fn outer_product(a: Vector, b: Vector) -> Matrix {
    Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DecomposedTensor {
    pub deviatoric_part: Matrix,
    pub spherical_part: Real,
}

impl DecomposedTensor {
    pub fn decompose(tensor: &Matrix) -> Self {
        let spherical_part = matrix_trace(tensor) / (DIM as Real);
        let deviatoric_part = *tensor - Mat3::from_diagonal(Vec3::splat(spherical_part));
        Self {
            deviatoric_part,
            spherical_part,
        }
    }

    pub fn recompose(&self) -> Matrix {
        self.deviatoric_part + Mat3::from_diagonal(Vec3::splat(self.spherical_part))
    }
}

/// Axis-aligned bounds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point,
    pub max: Point,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(Real::MAX),
        max: Vec3::splat(Real::MIN),
    };

    pub fn grow(&mut self, point: Point) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }
}

/// Corners of the unit cube centred on the origin.
pub const UNIT_CUBE_CORNERS: [Vec3; 8] = [
    Vec3::new(-0.5, -0.5, -0.5),
    Vec3::new(-0.5, -0.5, 0.5),
    Vec3::new(-0.5, 0.5, -0.5),
    Vec3::new(-0.5, 0.5, 0.5),
    Vec3::new(0.5, -0.5, -0.5),
    Vec3::new(0.5, -0.5, 0.5),
    Vec3::new(0.5, 0.5, -0.5),
    Vec3::new(0.5, 0.5, 0.5),
];

/// World bounds of the unit cube placed by `transform`.
pub fn transformed_unit_bounds(transform: &Mat4) -> Aabb {
    let mut bounds = Aabb::EMPTY;
    for corner in UNIT_CUBE_CORNERS {
        bounds.grow(transform.transform_point3(corner));
    }
    bounds
}
