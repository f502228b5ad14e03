//! Capacity-bounded caching allocator for scratch buffers.

use crate::error::NeuroGraphError;
use log::debug;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A scratch buffer obtained from a [`ScratchArena`].
///
/// The buffer must be handed back with [`ScratchArena::release`]; dropping it
/// instead leaks its capacity until [`ScratchArena::reset`] is called.
#[derive(Debug)]
pub struct ScratchBuffer {
    data: Vec<f32>,
}

impl ScratchBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

#[derive(Debug, Default)]
struct ArenaState {
    /// Elements currently handed out.
    in_use: usize,
    /// Released buffers keyed by length.
    cache: HashMap<usize, Vec<Vec<f32>>>,
}

/// Arena of `f32` scratch buffers with explicit allocate/release pairing.
///
/// Released buffers are cached by length and handed out again on the next
/// request of the same size. The arena never holds more than `capacity`
/// elements in outstanding buffers; a request that would exceed it fails with
/// `ResourceExhausted`.
#[derive(Debug)]
pub struct ScratchArena {
    capacity: usize,
    state: Mutex<ArenaState>,
}

/// Default capacity of the process-wide arena, in elements.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 1 << 22;

static GLOBAL_ARENA: Lazy<Arc<ScratchArena>> =
    Lazy::new(|| Arc::new(ScratchArena::new(DEFAULT_SCRATCH_CAPACITY)));

impl ScratchArena {
    pub fn new(capacity: usize) -> Self {
        ScratchArena {
            capacity,
            state: Mutex::new(ArenaState::default()),
        }
    }

    /// The process-wide arena.
    pub fn global() -> Arc<ScratchArena> {
        Arc::clone(&GLOBAL_ARENA)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements currently handed out and not yet released.
    pub fn in_use(&self) -> Result<usize, NeuroGraphError> {
        Ok(self.lock()?.in_use)
    }

    /// Hands out a zero-filled buffer of `len` elements.
    pub fn allocate(&self, len: usize) -> Result<ScratchBuffer, NeuroGraphError> {
        let mut state = self.lock()?;
        let available = self.capacity.saturating_sub(state.in_use);
        if len > available {
            return Err(NeuroGraphError::ResourceExhausted {
                requested: len,
                available,
            });
        }
        state.in_use += len;
        let data = match state.cache.get_mut(&len).and_then(|blocks| blocks.pop()) {
            Some(mut data) => {
                data.iter_mut().for_each(|v| *v = 0.0);
                data
            }
            None => {
                debug!("ScratchArena: new block of {} elements", len);
                vec![0.0; len]
            }
        };
        Ok(ScratchBuffer { data })
    }

    /// Returns a buffer to the arena for reuse.
    pub fn release(&self, buffer: ScratchBuffer) -> Result<(), NeuroGraphError> {
        let mut state = self.lock()?;
        let len = buffer.data.len();
        state.in_use = state.in_use.saturating_sub(len);
        state.cache.entry(len).or_default().push(buffer.data);
        Ok(())
    }

    /// Forgets every outstanding allocation and drops the cache.
    pub fn reset(&self) -> Result<(), NeuroGraphError> {
        let mut state = self.lock()?;
        state.in_use = 0;
        state.cache.clear();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ArenaState>, NeuroGraphError> {
        self.state.lock().map_err(|e| NeuroGraphError::LockError {
            lock_type: "mutex".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "arena_test.rs"]
mod tests;
