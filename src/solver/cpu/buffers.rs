use std::collections::HashMap;

use bytemuck::Pod;

use crate::solver::backend::{BackendError, BackendResult, BufferKind, InstanceId};

/// Word-aligned host memory standing in for device buffers
#[derive(Debug, Default)]
pub struct BufferStore {
    instance: InstanceId,
    buffers: HashMap<BufferKind, Vec<u32>>,
}

impl BufferStore {
    pub fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            buffers: HashMap::new(),
        }
    }

    /// (Re)allocate a zeroed buffer of at least `size_bytes`
    pub fn allocate(&mut self, kind: BufferKind, size_bytes: usize) {
        self.buffers.insert(kind, vec![0; size_bytes.div_ceil(4)]);
    }

    pub fn contains(&self, kind: BufferKind) -> bool {
        self.buffers.contains_key(&kind)
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    fn missing(&self, kind: BufferKind) -> BackendError {
        BackendError::MissingBuffer {
            instance: self.instance,
            kind,
        }
    }

    pub fn words(&self, kind: BufferKind) -> BackendResult<&[u32]> {
        self.buffers
            .get(&kind)
            .map(Vec::as_slice)
            .ok_or_else(|| self.missing(kind))
    }

    pub fn words_mut(&mut self, kind: BufferKind) -> BackendResult<&mut [u32]> {
        let instance = self.instance;
        self.buffers
            .get_mut(&kind)
            .map(Vec::as_mut_slice)
            .ok_or(BackendError::MissingBuffer { instance, kind })
    }

    pub fn view<T: Pod>(&self, kind: BufferKind) -> BackendResult<&[T]> {
        bytemuck::try_cast_slice(self.words(kind)?).map_err(|_| BackendError::Layout {
            kind,
            len: std::mem::size_of::<T>(),
        })
    }

    pub fn view_mut<T: Pod>(&mut self, kind: BufferKind) -> BackendResult<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.words_mut(kind)?).map_err(|_| BackendError::Layout {
            kind,
            len: std::mem::size_of::<T>(),
        })
    }

    pub fn write_bytes(&mut self, kind: BufferKind, offset: usize, data: &[u8]) -> BackendResult<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(self.words_mut(kind)?);
        let size = bytes.len();
        let target = bytes
            .get_mut(offset..offset + data.len())
            .ok_or(BackendError::OutOfRange {
                kind,
                offset,
                len: data.len(),
                size,
            })?;
        target.copy_from_slice(data);
        Ok(())
    }

    pub fn read_bytes(&self, kind: BufferKind) -> BackendResult<Vec<u8>> {
        Ok(bytemuck::cast_slice(self.words(kind)?).to_vec())
    }

    /// Copy `values` to the front of a buffer, truncating to its size
    pub fn store<T: Pod>(&mut self, kind: BufferKind, values: &[T]) -> BackendResult<()> {
        let target = self.view_mut::<T>(kind)?;
        let len = values.len().min(target.len());
        target[..len].copy_from_slice(&values[..len]);
        Ok(())
    }
}
