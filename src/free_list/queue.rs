//! Cross-process FIFO of free slot ids

use std::{
    ptr::NonNull,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
    buffers::RegionAllocator,
    error::{Result, ShmPoolError},
    memory::{RegionHandle, SharedMemoryRegion},
};

use super::layout::{Cell, QueueHeader, QueueLayout, QUEUE_MAGIC, QUEUE_VERSION, SLOT_CHECKED_OUT, SLOT_FREE};

/// Identity of one buffer or record within a pool
pub type SlotId = u32;

/// Busy-wait rounds before a blocked dequeue starts sleeping
const SPIN_LIMIT: u32 = 64;
/// First and longest sleep between polls of an empty queue
const MIN_SLEEP: Duration = Duration::from_micros(10);
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Process-safe FIFO of slot ids, living in its own shared region.
///
/// Dequeue allocates a slot, enqueue frees it. A per-slot state word records
/// whether each id is in the ring or held, so an id is never queued twice.
#[derive(Debug)]
pub struct FreeListQueue {
    region: Arc<SharedMemoryRegion>,
    layout: QueueLayout,
    header: NonNull<QueueHeader>,
    cells: NonNull<Cell>,
    states: NonNull<AtomicU32>,
}

unsafe impl Send for FreeListQueue {}
unsafe impl Sync for FreeListQueue {}

/// Raw, process-independent description of a [`FreeListQueue`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHandle {
    pub region: RegionHandle,
}

impl FreeListQueue {
    /// Create an empty queue for `slot_count` ids, all held by the caller.
    ///
    /// Use [`FreeListQueue::seeded`] for the usual all-free start.
    pub fn new(slot_count: usize, allocator: &RegionAllocator) -> Result<Self> {
        let layout = QueueLayout::for_slots(slot_count)?;
        let region = allocator.region(layout.total_size, "freelist")?;
        let queue = Self::from_region(region, layout)?;

        unsafe {
            queue
                .header
                .as_ptr()
                .write(QueueHeader::new(layout.capacity as u64, slot_count as u64));
            for i in 0..layout.capacity {
                queue.cells.as_ptr().add(i).write(Cell {
                    sequence: (i as u64).into(),
                    value: 0.into(),
                });
            }
            for slot in 0..slot_count {
                queue
                    .states
                    .as_ptr()
                    .add(slot)
                    .write(AtomicU32::new(SLOT_CHECKED_OUT));
            }
        }

        log::debug!(
            "created free list '{}' for {} slots (ring capacity {})",
            queue.region.name(),
            slot_count,
            layout.capacity
        );
        Ok(queue)
    }

    /// Create a queue holding every id `0..slot_count` in order
    pub fn seeded(slot_count: usize, allocator: &RegionAllocator) -> Result<Self> {
        let queue = Self::new(slot_count, allocator)?;
        for slot in 0..slot_count {
            queue.enqueue(slot as SlotId)?;
        }
        Ok(queue)
    }

    /// Map a queue described by `handle`.
    ///
    /// # Safety
    /// Same contract as [`SharedMemoryRegion::attach`].
    pub unsafe fn attach(handle: &QueueHandle) -> Result<Self> {
        let region = Arc::new(SharedMemoryRegion::attach(&handle.region)?);
        if region.size() < std::mem::size_of::<QueueHeader>() {
            return Err(ShmPoolError::corrupt_queue(format!(
                "region '{}' is smaller than a queue header",
                region.name()
            )));
        }

        let header = &*region.as_ptr::<QueueHeader>();
        if header.magic != QUEUE_MAGIC {
            return Err(ShmPoolError::corrupt_queue("bad magic"));
        }
        if header.version != QUEUE_VERSION {
            return Err(ShmPoolError::corrupt_queue(format!(
                "version {} (expected {})",
                header.version, QUEUE_VERSION
            )));
        }
        let layout = QueueLayout::for_slots(header.slot_count as usize)?;
        if layout.capacity as u64 != header.capacity || layout.total_size > region.size() {
            return Err(ShmPoolError::corrupt_queue(format!(
                "header describes {} slots / capacity {}, region has {} bytes",
                header.slot_count,
                header.capacity,
                region.size()
            )));
        }

        let queue = Self::from_region(region, layout)?;
        log::debug!(
            "attached free list '{}' ({} slots, {} free)",
            queue.region.name(),
            layout.slot_count,
            queue.free_count()
        );
        Ok(queue)
    }

    fn from_region(region: Arc<SharedMemoryRegion>, layout: QueueLayout) -> Result<Self> {
        let base = unsafe { region.as_mut_ptr_unsafe::<u8>() };
        let base = NonNull::new(base)
            .ok_or_else(|| ShmPoolError::memory("free list mapping has a null base"))?;
        unsafe {
            Ok(Self {
                header: base.cast(),
                cells: NonNull::new_unchecked(base.as_ptr().add(layout.cells_offset)).cast(),
                states: NonNull::new_unchecked(base.as_ptr().add(layout.states_offset)).cast(),
                region,
                layout,
            })
        }
    }

    /// Handle for re-attaching this queue in another process
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            region: self.region.handle(),
        }
    }

    /// Number of distinct ids this queue manages
    pub fn slot_count(&self) -> usize {
        self.layout.slot_count
    }

    /// Ring capacity (a power of two no smaller than the slot count)
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    #[inline]
    fn header(&self) -> &QueueHeader {
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn cell(&self, pos: u64) -> &Cell {
        let index = (pos as usize) & (self.layout.capacity - 1);
        unsafe { &*self.cells.as_ptr().add(index) }
    }

    #[inline]
    fn state(&self, slot: SlotId) -> &AtomicU32 {
        unsafe { &*self.states.as_ptr().add(slot as usize) }
    }

    fn check_slot(&self, slot: SlotId) -> Result<()> {
        if slot as usize >= self.layout.slot_count {
            return Err(ShmPoolError::InvalidSlot {
                slot,
                slot_count: self.layout.slot_count as u32,
            });
        }
        Ok(())
    }

    /// Return `slot` to the tail of the queue.
    ///
    /// Fails with `SlotNotCheckedOut` if the id is already free.
    pub fn enqueue(&self, slot: SlotId) -> Result<()> {
        self.check_slot(slot)?;
        let state = self.state(slot);
        state
            .compare_exchange(SLOT_CHECKED_OUT, SLOT_FREE, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ShmPoolError::SlotNotCheckedOut { slot })?;

        if let Err(e) = self.push(slot as u64) {
            state.store(SLOT_CHECKED_OUT, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    fn push(&self, value: u64) -> Result<()> {
        let cursor = &self.header().enqueue.pos;
        let mut pos = cursor.load(Ordering::Relaxed);
        loop {
            let cell = self.cell(pos);
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as i64;
            if diff == 0 {
                match cursor.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        cell.value.store(value, Ordering::Relaxed);
                        cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return Err(ShmPoolError::QueueFull {
                    capacity: self.layout.capacity,
                });
            } else {
                pos = cursor.load(Ordering::Relaxed);
            }
        }
    }

    fn pop(&self) -> Option<u64> {
        let cursor = &self.header().dequeue.pos;
        let mut pos = cursor.load(Ordering::Relaxed);
        loop {
            let cell = self.cell(pos);
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as i64;
            if diff == 0 {
                match cursor.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = cell.value.load(Ordering::Relaxed);
                        cell.sequence.store(
                            pos.wrapping_add(self.layout.capacity as u64),
                            Ordering::Release,
                        );
                        return Some(value);
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = cursor.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the oldest free id without waiting
    pub fn try_dequeue(&self) -> Result<Option<SlotId>> {
        let Some(value) = self.pop() else {
            return Ok(None);
        };
        if value >= self.layout.slot_count as u64 {
            return Err(ShmPoolError::corrupt_queue(format!(
                "dequeued id {} outside 0..{}",
                value, self.layout.slot_count
            )));
        }
        let slot = value as SlotId;
        let previous = self.state(slot).swap(SLOT_CHECKED_OUT, Ordering::AcqRel);
        if previous != SLOT_FREE {
            log::warn!("slot {} dequeued while not marked free", slot);
        }
        Ok(Some(slot))
    }

    /// Take the oldest free id, waiting up to `timeout` (forever if `None`).
    ///
    /// On timeout nothing is removed and the queue is unchanged.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Result<SlotId> {
        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);
        let mut backoff = Backoff::new();

        loop {
            if let Some(slot) = self.try_dequeue()? {
                return Ok(slot);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let waited = now - start;
                        log::debug!(
                            "free list '{}' still empty after {:?}",
                            self.region.name(),
                            waited
                        );
                        return Err(ShmPoolError::timeout(waited));
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            backoff.wait(remaining);
        }
    }

    /// Ids currently in the queue
    pub fn free_count(&self) -> usize {
        let header = self.header();
        let tail = header.enqueue.pos.load(Ordering::Acquire);
        let head = header.dequeue.pos.load(Ordering::Acquire);
        (tail.wrapping_sub(head) as usize).min(self.layout.slot_count)
    }

    /// Ids currently held by some consumer.
    ///
    /// A consumer that died while holding a slot keeps it counted here forever.
    pub fn checked_out_count(&self) -> usize {
        (0..self.layout.slot_count as SlotId)
            .filter(|&slot| self.state(slot).load(Ordering::Acquire) == SLOT_CHECKED_OUT)
            .count()
    }

    /// Whether `slot` is currently held
    pub fn is_checked_out(&self, slot: SlotId) -> Result<bool> {
        self.check_slot(slot)?;
        Ok(self.state(slot).load(Ordering::Acquire) == SLOT_CHECKED_OUT)
    }
}

/// Spin, then sleep with doubling intervals, never past the caller's deadline
struct Backoff {
    rounds: u32,
    sleep: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            rounds: 0,
            sleep: MIN_SLEEP,
        }
    }

    fn wait(&mut self, remaining: Option<Duration>) {
        if self.rounds < SPIN_LIMIT {
            self.rounds += 1;
            std::hint::spin_loop();
            return;
        }
        let nap = remaining.map_or(self.sleep, |r| r.min(self.sleep));
        std::thread::sleep(nap);
        self.sleep = (self.sleep * 2).min(MAX_SLEEP);
    }
}
