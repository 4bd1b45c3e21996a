//! Pool implementation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Whether an allocation got everything it asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStatus {
    /// All requested samples were granted
    Complete,
    /// Fewer samples were granted because contiguous space ran out
    Reduced,
}

/// Result of a successful allocation
#[derive(Debug)]
pub struct Allocation {
    pub region: PoolRegion,
    pub granted_samples: usize,
    pub status: AllocationStatus,
}

/// Cursor state of the ring
struct PoolState {
    buffer: Box<[u8]>,
    /// Start of the oldest outstanding region
    read: usize,
    /// Where the next region starts
    write: usize,
    /// Logical end of the tail run; bytes in `end..capacity` are skipped
    end: usize,
    /// Disambiguates `read == write`
    full: bool,
    /// Set while `reset` waits for the pool to drain
    resetting: bool,
    /// Regions released ahead of their turn, keyed by start offset
    released: BTreeMap<usize, usize>,
    /// Number of regions currently loaned out
    outstanding: usize,
}

impl PoolState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            end: capacity,
            full: false,
            resetting: false,
            released: BTreeMap::new(),
            outstanding: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn is_empty(&self) -> bool {
        self.read == self.write && !self.full
    }

    fn reinit(&mut self) {
        self.read = 0;
        self.write = 0;
        self.end = self.capacity();
        self.full = false;
        self.released.clear();
    }

    fn used_bytes(&self) -> usize {
        if self.full {
            self.capacity()
        } else if self.write >= self.read {
            self.write - self.read
        } else {
            (self.end - self.read) + self.write
        }
    }

    /// Find the contiguous free run for at least one `stride`-sized sample.
    ///
    /// May move `write` to 0 (recording `end`) when only the head has room.
    fn contiguous_free(&mut self, stride: usize) -> Option<(usize, usize)> {
        if self.full {
            return None;
        }
        if self.is_empty() {
            self.reinit();
        }

        if self.write >= self.read {
            let tail = self.capacity() - self.write;
            if tail >= stride {
                return Some((self.write, tail));
            }
            if self.read >= stride {
                self.end = self.write;
                self.write = 0;
                return Some((0, self.read));
            }
            None
        } else {
            let space = self.read - self.write;
            (space >= stride).then_some((self.write, space))
        }
    }

    fn commit(&mut self, offset: usize, len: usize) {
        self.write = offset + len;
        if self.write == self.capacity() {
            self.write = 0;
        }
        if self.write == self.read {
            self.full = true;
        }
        self.outstanding += 1;
    }

    /// Retire a region. Returns true if the read cursor moved.
    fn retire(&mut self, offset: usize, len: usize) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);

        if offset != self.read {
            self.released.insert(offset, len);
            return false;
        }

        self.advance(len);
        while let Some(len) = self.released.remove(&self.read) {
            self.advance(len);
        }
        true
    }

    fn advance(&mut self, len: usize) {
        self.read += len;
        self.full = false;
        if self.read >= self.end {
            self.read = 0;
            self.end = self.capacity();
        }
    }
}

struct Shared {
    state: Mutex<PoolState>,
    drained: Condvar,
}

impl Shared {
    fn release(&self, offset: usize, len: usize) {
        let mut state = self.state.lock();
        let moved = state.retire(offset, len);
        let empty = state.is_empty();
        drop(state);

        if moved && empty {
            self.drained.notify_all();
        }
    }
}

/// Fixed-capacity circular arena for outgoing packet payloads.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct PacketMemoryPool {
    shared: Arc<Shared>,
}

impl PacketMemoryPool {
    /// Create a pool with `capacity` bytes of backing memory
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::new(capacity)),
                drained: Condvar::new(),
            }),
        }
    }

    /// Allocate room for up to `requested_samples` samples of
    /// `sample_stride` bytes each.
    ///
    /// When the contiguous run before the wrap point (or before the oldest
    /// outstanding region) is too small, fewer samples are granted and the
    /// status is [`AllocationStatus::Reduced`]. Fails with
    /// [`Error::ResourceExhausted`] only when not even one sample fits.
    pub fn allocate(&self, requested_samples: usize, sample_stride: usize) -> Result<Allocation> {
        if requested_samples == 0 || sample_stride == 0 {
            return Err(Error::InvalidParameter(format!(
                "cannot allocate {} samples of {} bytes",
                requested_samples, sample_stride
            )));
        }

        let mut state = self.shared.state.lock();
        if state.resetting {
            return Err(Error::InvalidState("packet pool is being reset".into()));
        }

        let (offset, space) = match state.contiguous_free(sample_stride) {
            Some(run) => run,
            None => {
                return Err(Error::ResourceExhausted(format!(
                    "packet pool saturated ({} of {} bytes in use)",
                    state.used_bytes(),
                    state.capacity()
                )))
            }
        };

        let granted_samples = requested_samples.min(space / sample_stride);
        let len = granted_samples * sample_stride;
        state.commit(offset, len);

        let status = if granted_samples < requested_samples {
            tracing::debug!(
                requested = requested_samples,
                granted = granted_samples,
                "Packet pool allocation reduced"
            );
            AllocationStatus::Reduced
        } else {
            AllocationStatus::Complete
        };

        Ok(Allocation {
            region: PoolRegion {
                shared: Arc::clone(&self.shared),
                offset,
                len,
            },
            granted_samples,
            status,
        })
    }

    /// Allocate a byte region (stride 1)
    pub fn allocate_bytes(&self, len: usize) -> Result<Allocation> {
        self.allocate(len, 1)
    }

    /// Block new allocations, wait until every region is released, then
    /// reinitialize the cursors.
    ///
    /// Waits indefinitely; see [`PacketMemoryPool::reset_timeout`].
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.resetting = true;
        while !state.is_empty() {
            self.shared.drained.wait(&mut state);
        }
        state.reinit();
        state.resetting = false;
    }

    /// Like [`reset`](Self::reset) but gives up after `timeout`.
    ///
    /// On timeout allocations are unblocked again and the pool is left
    /// untouched.
    pub fn reset_timeout(&self, timeout: Duration) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.resetting = true;
        while !state.is_empty() {
            if self
                .shared
                .drained
                .wait_for(&mut state, timeout)
                .timed_out()
                && !state.is_empty()
            {
                state.resetting = false;
                return Err(Error::InvalidState(format!(
                    "packet pool did not drain within {:?}",
                    timeout
                )));
            }
        }
        state.reinit();
        state.resetting = false;
        Ok(())
    }

    /// Replace the backing buffer. The pool must be empty.
    pub fn resize(&self, new_capacity: usize) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.is_empty() {
            return Err(Error::InvalidState(format!(
                "cannot resize packet pool with {} regions outstanding",
                state.outstanding
            )));
        }
        state.buffer = vec![0u8; new_capacity].into_boxed_slice();
        state.reinit();
        tracing::debug!(capacity = new_capacity, "Packet pool resized");
        Ok(())
    }

    /// Whether no region is outstanding
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity()
    }

    /// Bytes between the oldest outstanding region and the write cursor
    pub fn used_bytes(&self) -> usize {
        self.shared.state.lock().used_bytes()
    }

    /// Number of regions currently loaned out
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }
}

impl std::fmt::Debug for PacketMemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PacketMemoryPool")
            .field("capacity", &state.capacity())
            .field("read", &state.read)
            .field("write", &state.write)
            .field("full", &state.full)
            .field("outstanding", &state.outstanding)
            .finish()
    }
}

/// A byte range loaned from a [`PacketMemoryPool`].
///
/// Dropping the region returns it to the pool.
pub struct PoolRegion {
    shared: Arc<Shared>,
    offset: usize,
    len: usize,
}

impl PoolRegion {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `data` into the start of the region; returns bytes copied
    pub fn fill(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.len);
        let mut state = self.shared.state.lock();
        state.buffer[self.offset..self.offset + n].copy_from_slice(&data[..n]);
        n
    }

    /// Copy the region contents out
    pub fn to_bytes(&self) -> Bytes {
        let state = self.shared.state.lock();
        Bytes::copy_from_slice(&state.buffer[self.offset..self.offset + self.len])
    }
}

impl Drop for PoolRegion {
    fn drop(&mut self) {
        self.shared.release(self.offset, self.len);
    }
}

impl std::fmt::Debug for PoolRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegion")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
