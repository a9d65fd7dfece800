//! Render fields derived from the grid after a step
//!
//! `GridData` holds node velocity and mass, blurred with a separable Gaussian
//! through `GridBlur0`/`GridBlur1` (result in `GridBlur0`). Normals point down
//! the blurred density gradient and carry the collider SDF in `w`.

use bevy::prelude::*;

use super::buffers::BufferStore;
use super::state::{GridState, StepContext};
use crate::solver::backend::{BackendResult, BufferKind};

/// Fixed-point scale of the integer node buffers
pub const GRID_FIXED_SCALE: f32 = 65536.0;
/// Widest blur kernel, in cells either side
const MAX_BLUR_CELLS: i32 = 4;

#[inline]
pub fn encode_node(value: Vec4) -> [i32; 4] {
    (value * GRID_FIXED_SCALE)
        .round()
        .to_array()
        .map(|v| v.clamp(i32::MIN as f32, i32::MAX as f32) as i32)
}

#[inline]
pub fn decode_node(value: [i32; 4]) -> Vec4 {
    Vec4::from_array(value.map(|v| v as f32)) / GRID_FIXED_SCALE
}

/// Normalized Gaussian taps for a blur of `radius` world units
pub fn blur_kernel(radius: f32, cell_size: f32) -> Vec<f32> {
    let sigma = (radius / cell_size).max(0.5);
    let reach = (sigma * 2.0).ceil().min(MAX_BLUR_CELLS as f32) as i32;
    let mut taps: Vec<f32> = (-reach..=reach)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let normalization = 1.0 / taps.iter().sum::<f32>();
    for tap in &mut taps {
        *tap *= normalization;
    }
    taps
}

fn blur_axis(input: &[Vec4], axis: usize, taps: &[f32], ctx: &StepContext) -> Vec<Vec4> {
    let reach = (taps.len() / 2) as i32;
    let limit = ctx.dims.to_array()[axis] as i32 - 1;
    (0..ctx.node_count)
        .map(|node| {
            let coord = ctx.node_coord(node).as_ivec3();
            let mut sum = Vec4::ZERO;
            for (k, &tap) in taps.iter().enumerate() {
                let mut sample = coord;
                sample[axis] = (coord[axis] + k as i32 - reach).clamp(0, limit);
                if let Some(index) = ctx.node_index(sample) {
                    sum += input[index] * tap;
                }
            }
            sum
        })
        .collect()
}

pub fn write_render_fields(
    grid: &GridState,
    store: &mut BufferStore,
    ctx: &StepContext,
    blur_radius: f32,
) -> BackendResult<()> {
    let data: Vec<Vec4> = (0..ctx.node_count)
        .map(|node| grid.velocity[node].extend(grid.mass[node] / ctx.rest_density))
        .collect();
    let encoded: Vec<[i32; 4]> = data.iter().map(|&v| encode_node(v)).collect();
    store.store(BufferKind::GridData, &encoded)?;

    let taps = blur_kernel(blur_radius, ctx.cell_size);
    let pass_x = blur_axis(&data, 0, &taps, ctx);
    let pass_y = blur_axis(&pass_x, 1, &taps, ctx);
    let blurred = blur_axis(&pass_y, 2, &taps, ctx);

    let encoded_y: Vec<[i32; 4]> = pass_y.iter().map(|&v| encode_node(v)).collect();
    let encoded_blur: Vec<[i32; 4]> = blurred.iter().map(|&v| encode_node(v)).collect();
    store.store(BufferKind::GridBlur1, &encoded_y)?;
    store.store(BufferKind::GridBlur0, &encoded_blur)?;

    let density = |coord: IVec3| {
        let clamped = coord.clamp(IVec3::ZERO, ctx.dims.as_ivec3() - 1);
        ctx.node_index(clamped).map_or(0.0, |i| blurred[i].w)
    };

    let mut normals = Vec::with_capacity(ctx.node_count);
    let mut positions = Vec::with_capacity(ctx.node_count);
    for node in 0..ctx.node_count {
        let coord = ctx.node_coord(node);
        let c = coord.as_ivec3();
        let gradient = Vec3::new(
            density(c + IVec3::X) - density(c - IVec3::X),
            density(c + IVec3::Y) - density(c - IVec3::Y),
            density(c + IVec3::Z) - density(c - IVec3::Z),
        );
        normals.push((-gradient).normalize_or_zero().extend(grid.sdf[node]).to_array());
        positions.push(ctx.node_world(coord).extend(blurred[node].w).to_array());
    }
    store.store(BufferKind::GridNormal, &normals)?;
    store.store(BufferKind::GridNodePositions, &positions)?;
    Ok(())
}
