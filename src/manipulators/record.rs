//! Fixed-layout manipulator records uploaded every sub-step

use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};

/// One manipulator as the solver kernels see it (288 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ManipulatorRecord {
    pub transform: [f32; 16],
    pub previous_transform: [f32; 16],
    pub to_object_space: [f32; 16],

    pub position: [f32; 3],
    pub const_data_begin: i32,

    pub scale: [f32; 3],
    pub _pad0: f32,

    pub rotation: [f32; 4],

    pub bbox_min: [f32; 3],
    pub kind: i32,

    pub bbox_max: [f32; 3],
    pub enabled: i32,

    pub additional_data: [f32; 4],
}

impl ManipulatorRecord {
    pub fn transform(&self) -> Mat4 {
        Mat4::from_cols_array(&self.transform)
    }

    pub fn previous_transform(&self) -> Mat4 {
        Mat4::from_cols_array(&self.previous_transform)
    }

    pub fn to_object_space(&self) -> Mat4 {
        Mat4::from_cols_array(&self.to_object_space)
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn scale(&self) -> Vec3 {
        Vec3::from_array(self.scale)
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_array(self.rotation)
    }

    pub fn additional_data(&self) -> Vec4 {
        Vec4::from_array(self.additional_data)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }
}

/// `[begin, end)` record range of each manipulator kind, Emitter to Portal
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ManipulatorIndices {
    pub ranges: [[i32; 2]; 7],
    pub _pad: [i32; 2],
}

impl ManipulatorIndices {
    /// Range of the kind with the given ordinal (1..=7)
    pub fn range(&self, ordinal: usize) -> std::ops::Range<usize> {
        let [begin, end] = self.ranges[ordinal - 1];
        begin as usize..end as usize
    }
}
