//! Per-camera render parameters
//!
//! Cameras are kept in insertion order; a camera's position in the table is
//! the id the backend knows it by.

use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};
use indexmap::IndexMap;

use crate::config::RenderSettings;

/// Host-side camera identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CameraKey(pub u64);

/// What the host knows about a camera this frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraView {
    /// World to camera
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    /// Pixel size before downscaling
    pub resolution: UVec2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraParams {
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub projection_inverse: [f32; 16],
    pub view_projection: [f32; 16],
    pub view_projection_inverse: [f32; 16],
    pub world_space_camera_pos: [f32; 3],
    pub camera_id: i32,
    pub camera_resolution: [f32; 2],
    pub _pad: [f32; 2],
}

impl CameraParams {
    pub fn new(view: &CameraView, camera_id: u32, render: &RenderSettings) -> Self {
        let resolution = render.downscale(view.resolution);
        let view_projection = view.projection * view.view;
        Self {
            view: view.view.to_cols_array(),
            projection: view.projection.to_cols_array(),
            projection_inverse: view.projection.inverse().to_cols_array(),
            view_projection: view_projection.to_cols_array(),
            view_projection_inverse: view_projection.inverse().to_cols_array(),
            world_space_camera_pos: view.position.to_array(),
            camera_id: camera_id as i32,
            camera_resolution: resolution.as_vec2().to_array(),
            _pad: [0.0; 2],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RenderParams {
    pub blur_radius: f32,
    pub diameter: f32,
    pub _pad: [f32; 2],
}

impl RenderParams {
    /// Particle diameter shrinks with the cube root of the rest density
    pub fn new(particle_scale: f32, cell_size: f32, particle_density: f32, blur_radius: f32) -> Self {
        Self {
            blur_radius,
            diameter: particle_scale * cell_size / particle_density.powf(0.333),
            _pad: [0.0; 2],
        }
    }
}

#[derive(Clone, Debug)]
pub struct CameraEntry {
    pub params: CameraParams,
    /// Host frame of the last parameter update
    pub updated_frame: u64,
    /// The backend has seen this camera at least once
    pub registered: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CameraTable {
    cameras: IndexMap<CameraKey, CameraEntry>,
}

impl CameraTable {
    /// Store fresh parameters for `key`. Returns the camera id and whether
    /// this is the camera's first appearance.
    pub fn update(
        &mut self,
        key: CameraKey,
        view: &CameraView,
        render: &RenderSettings,
        frame: u64,
    ) -> (u32, bool) {
        let next_id = self.cameras.len() as u32;
        let id = self.cameras.get_index_of(&key).map_or(next_id, |i| i as u32);
        let params = CameraParams::new(view, id, render);
        let mut first_use = false;
        self.cameras
            .entry(key)
            .and_modify(|entry| {
                entry.params = params;
                entry.updated_frame = frame;
            })
            .or_insert_with(|| {
                first_use = true;
                CameraEntry {
                    params,
                    updated_frame: frame,
                    registered: false,
                }
            });
        (id, first_use)
    }

    pub fn mark_registered(&mut self, key: CameraKey) {
        if let Some(entry) = self.cameras.get_mut(&key) {
            entry.registered = true;
        }
    }

    pub fn id_of(&self, key: CameraKey) -> Option<u32> {
        self.cameras.get_index_of(&key).map(|i| i as u32)
    }

    pub fn get(&self, key: CameraKey) -> Option<&CameraEntry> {
        self.cameras.get(&key)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn clear(&mut self) {
        self.cameras.clear();
    }
}
