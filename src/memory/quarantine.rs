/// Quarantine: an arena that tracks every allocation it grants
///
/// Each block handed out by a quarantine is registered in an internal table
/// so it can be released individually (`free`) or in bulk (dropping the
/// arena). Sealing is a one-way transition that rejects further allocation
/// while leaving existing blocks valid and freeable.
///
/// Membership is a linear scan over the table. That is intentional: the
/// expected allocation counts are small and the invariant surface stays
/// minimal. An indexed slot map would remove the O(n) scan without changing
/// this contract.
use crate::types::{Result, RuntimeError};
use std::sync::Mutex;

/// Stable handle for a block owned by a [`Quarantine`].
///
/// Handles are unique within their arena for its whole lifetime; a freed
/// handle is never reissued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocId(u64);

struct Tracked {
    id: AllocId,
    block: Box<[u8]>,
}

struct QuarantineInner {
    blocks: Vec<Tracked>,
    next_id: u64,
    sealed: bool,
}

/// Tracked allocation arena.
///
/// All operations are safe to call from multiple threads against the same
/// arena; the scan-and-free and alloc-and-register sequences are atomic
/// under one internal lock.
pub struct Quarantine {
    inner: Mutex<QuarantineInner>,
}

impl Quarantine {
    /// Create an arena with room for `initial_capacity` tracked blocks
    /// (0 selects the default of 16). The table grows geometrically as
    /// allocations are registered.
    pub fn with_capacity(initial_capacity: usize) -> Result<Self> {
        let capacity = if initial_capacity == 0 {
            16
        } else {
            initial_capacity
        };
        let mut blocks = Vec::new();
        blocks.try_reserve_exact(capacity).map_err(|_| {
            RuntimeError::OutOfMemory(format!(
                "quarantine table reservation failed for {} slots",
                capacity
            ))
        })?;
        Ok(Self {
            inner: Mutex::new(QuarantineInner {
                blocks,
                next_id: 1,
                sealed: false,
            }),
        })
    }

    /// Allocate a zeroed block of `size` bytes and register it.
    pub fn alloc(&self, size: usize) -> Result<AllocId> {
        if size == 0 {
            return Err(RuntimeError::InvalidArgument(
                "quarantine alloc: zero-sized block".to_string(),
            ));
        }
        let mut inner = self.lock();
        if inner.sealed {
            return Err(RuntimeError::Sealed);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| {
            RuntimeError::OutOfMemory(format!("quarantine alloc of {} bytes failed", size))
        })?;
        buf.resize(size, 0u8);
        if inner.blocks.len() == inner.blocks.capacity() {
            inner.blocks.try_reserve(1).map_err(|_| {
                RuntimeError::OutOfMemory("quarantine table growth failed".to_string())
            })?;
        }
        let id = AllocId(inner.next_id);
        inner.next_id += 1;
        inner.blocks.push(Tracked {
            id,
            block: buf.into_boxed_slice(),
        });
        Ok(id)
    }

    /// Release one tracked block. Fails with `NotFound` if `id` does not
    /// name a live block of this arena.
    pub fn free(&self, id: AllocId) -> Result<()> {
        let mut inner = self.lock();
        match inner.blocks.iter().position(|t| t.id == id) {
            Some(index) => {
                // swap_remove keeps the table dense; order is irrelevant here
                inner.blocks.swap_remove(index);
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!(
                "quarantine free: untracked handle {:?}",
                id
            ))),
        }
    }

    /// Seal the arena. Irrevocable; later `alloc` calls fail while existing
    /// blocks stay valid.
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    /// Copy a string into a fresh tracked block.
    pub fn store_str(&self, s: &str) -> Result<AllocId> {
        if s.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "quarantine store_str: empty string".to_string(),
            ));
        }
        let id = self.alloc(s.len())?;
        self.write(id, 0, s.as_bytes())?;
        Ok(id)
    }

    /// Copy the contents of a tracked block out of the arena.
    pub fn read(&self, id: AllocId) -> Result<Vec<u8>> {
        let inner = self.lock();
        inner
            .blocks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.block.to_vec())
            .ok_or_else(|| {
                RuntimeError::NotFound(format!("quarantine read: untracked handle {:?}", id))
            })
    }

    /// Write `bytes` into a tracked block starting at `offset`.
    pub fn write(&self, id: AllocId, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        let tracked = inner.blocks.iter_mut().find(|t| t.id == id).ok_or_else(|| {
            RuntimeError::NotFound(format!("quarantine write: untracked handle {:?}", id))
        })?;
        let end = offset.checked_add(bytes.len()).ok_or_else(|| {
            RuntimeError::InvalidArgument("quarantine write: offset overflow".to_string())
        })?;
        if end > tracked.block.len() {
            return Err(RuntimeError::InvalidArgument(format!(
                "quarantine write: range {}..{} exceeds block of {} bytes",
                offset,
                end,
                tracked.block.len()
            )));
        }
        tracked.block[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Size in bytes of a tracked block.
    pub fn size_of(&self, id: AllocId) -> Result<usize> {
        let inner = self.lock();
        inner
            .blocks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.block.len())
            .ok_or_else(|| {
                RuntimeError::NotFound(format!("quarantine size_of: untracked handle {:?}", id))
            })
    }

    /// Number of live tracked blocks.
    pub fn len(&self) -> usize {
        self.lock().blocks.len()
    }

    /// True when no blocks are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the arena has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QuarantineInner> {
        // A poisoned arena lock only means another thread panicked while
        // holding it; the table itself stays structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_alloc_returns_zeroed_block() {
        let q = Quarantine::with_capacity(4).unwrap();
        let id = q.alloc(32).unwrap();
        assert_eq!(q.read(id).unwrap(), vec![0u8; 32]);
        assert_eq!(q.size_of(id).unwrap(), 32);
    }

    #[test]
    fn test_zero_size_alloc_rejected() {
        let q = Quarantine::with_capacity(0).unwrap();
        assert!(matches!(
            q.alloc(0),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_free_removes_membership() {
        let q = Quarantine::with_capacity(4).unwrap();
        let a = q.alloc(8).unwrap();
        let b = q.alloc(8).unwrap();
        assert_eq!(q.len(), 2);
        q.free(a).unwrap();
        assert_eq!(q.len(), 1);
        assert!(matches!(q.free(a), Err(RuntimeError::NotFound(_))));
        q.free(b).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn test_seal_blocks_alloc_but_not_free() {
        // capacity 4, three 16-byte allocations, seal, then an 8-byte
        // allocation must fail
        let q = Quarantine::with_capacity(4).unwrap();
        let ids: Vec<_> = (0..3).map(|_| q.alloc(16).unwrap()).collect();
        q.seal();
        assert!(matches!(q.alloc(8), Err(RuntimeError::Sealed)));
        assert!(q.is_sealed());
        for id in ids {
            q.free(id).unwrap();
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_live_count_never_exceeds_successful_allocs() {
        let q = Quarantine::with_capacity(2).unwrap();
        let mut live = Vec::new();
        for _ in 0..20 {
            live.push(q.alloc(4).unwrap());
        }
        assert_eq!(q.len(), 20);
        for id in live.drain(..10) {
            q.free(id).unwrap();
        }
        assert_eq!(q.len(), 10);
    }

    #[test]
    fn test_store_str_round_trip() {
        let q = Quarantine::with_capacity(0).unwrap();
        let id = q.store_str("worker-a").unwrap();
        assert_eq!(q.read(id).unwrap(), b"worker-a".to_vec());
    }

    #[test]
    fn test_write_bounds_checked() {
        let q = Quarantine::with_capacity(0).unwrap();
        let id = q.alloc(4).unwrap();
        q.write(id, 0, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            q.write(id, 2, &[9, 9, 9]),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert_eq!(q.read(id).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_concurrent_alloc_and_free() {
        let q = Arc::new(Quarantine::with_capacity(8).unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = Arc::clone(&q);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let id = q.alloc(16).unwrap();
                    q.free(id).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(q.is_empty());
    }
}
