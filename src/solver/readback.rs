//! Single-slot asynchronous readback of the particle count and statistics

use bevy::prelude::*;

use super::backend::{BackendError, BackendResult, ComputeBackend, InstanceId, ReadbackConfig};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadbackSnapshot {
    pub particle_count: usize,
    /// Manipulator counters, 8 per manipulator in registry order
    pub statistics: Vec<i32>,
    /// Host frame the snapshot arrived on
    pub frame: u64,
}

impl ReadbackSnapshot {
    /// Slot 0 is the live particle count, the rest are statistics
    pub fn decode(words: &[i32], frame: u64) -> Self {
        let (count, statistics) = match words.split_first() {
            Some((count, rest)) => (*count, rest.to_vec()),
            None => (0, Vec::new()),
        };
        Self {
            particle_count: count.max(0) as usize,
            statistics,
            frame,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReadbackBridge {
    config: Option<ReadbackConfig>,
    in_flight: bool,
    last_request_frame: Option<u64>,
    latest: Option<ReadbackSnapshot>,
}

impl ReadbackBridge {
    pub fn configure(
        &mut self,
        backend: &mut dyn ComputeBackend,
        instance: InstanceId,
        config: ReadbackConfig,
    ) -> BackendResult<()> {
        backend.configure_readback(instance, config)?;
        *self = Self {
            config: Some(config),
            ..Self::default()
        };
        Ok(())
    }

    pub fn config(&self) -> Option<&ReadbackConfig> {
        self.config.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Ask the backend for a new copy. Returns whether a request was issued:
    /// a second request in the same frame is rejected, and nothing is issued
    /// while the previous copy is outstanding.
    pub fn request(
        &mut self,
        backend: &mut dyn ComputeBackend,
        instance: InstanceId,
        frame: u64,
    ) -> BackendResult<bool> {
        if self.config.is_none() {
            return Err(BackendError::ReadbackNotConfigured);
        }
        if self.last_request_frame == Some(frame) {
            warn!("Readback was already requested in frame {}, ignoring", frame);
            return Ok(false);
        }
        if self.in_flight {
            debug!("Readback still in flight, skipping request for frame {}", frame);
            return Ok(false);
        }
        backend.request_readback(instance)?;
        self.in_flight = true;
        self.last_request_frame = Some(frame);
        Ok(true)
    }

    /// Take a completed copy if one arrived. Never blocks.
    pub fn poll(
        &mut self,
        backend: &mut dyn ComputeBackend,
        instance: InstanceId,
        frame: u64,
    ) -> BackendResult<Option<&ReadbackSnapshot>> {
        let Some(words) = backend.poll_readback(instance)? else {
            return Ok(None);
        };
        self.in_flight = false;
        self.latest = Some(ReadbackSnapshot::decode(&words, frame));
        Ok(self.latest.as_ref())
    }

    pub fn latest(&self) -> Option<&ReadbackSnapshot> {
        self.latest.as_ref()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
