//! Sort particles by grid node for cache-friendly transfers

use std::time::Instant;

use bevy::prelude::*;

use super::buffers::BufferStore;
use super::state::{ParticleState, StepContext};
use crate::solver::backend::{BackendResult, BufferKind};

/// Node index of the cell containing each particle
pub fn node_keys(particles: &ParticleState, ctx: &StepContext) -> Vec<u32> {
    particles
        .positions
        .iter()
        .map(|p| {
            ctx.node_index(p.floor().as_ivec3())
                .map_or(u32::MAX, |node| node as u32)
        })
        .collect()
}

/// Reorder particles by node and publish the pairs and per-node ranges
pub fn sort_particles(
    particles: &mut ParticleState,
    store: &mut BufferStore,
    ctx: &StepContext,
) -> BackendResult<()> {
    let start = Instant::now();

    let keys = node_keys(particles, ctx);
    let pairs: Vec<[u32; 2]> = keys
        .iter()
        .enumerate()
        .map(|(index, &key)| [key, index as u32])
        .collect();
    let unsorted: Vec<[f32; 4]> = particles
        .positions
        .iter()
        .map(|&p| ctx.grid_to_world(p).extend(1.0).to_array())
        .collect();

    let mut sorted = pairs.clone();
    sorted.sort_by_key(|pair| pair[0]);
    let order: Vec<usize> = sorted.iter().map(|pair| pair[1] as usize).collect();
    particles.permute(&order);

    store.store(BufferKind::PositionMassCopy, &unsorted)?;
    store.store(BufferKind::NodeParticlePairs, &pairs)?;
    store.store(BufferKind::SortTemp, &sorted)?;

    let ranges = store.view_mut::<[i32; 2]>(BufferKind::IndexGrid)?;
    ranges.fill([0, 0]);
    let mut begin = 0;
    while begin < sorted.len() {
        let key = sorted[begin][0];
        let mut end = begin + 1;
        while end < sorted.len() && sorted[end][0] == key {
            end += 1;
        }
        if let Some(range) = ranges.get_mut(key as usize) {
            *range = [begin as i32, end as i32];
        }
        begin = end;
    }

    debug!("sort_particles: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
