//! Pool of identically shaped shared buffers

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    buffers::{AxisSlice, BufferHandle, RawView, SharedBuffer, View},
    dtype::Element,
    error::{Result, ShmPoolError},
    free_list::{FreeListQueue, QueueHandle, SlotId},
    shape::{Order, Shape},
};

use super::stats::{AtomicPoolStats, PoolStats};

/// Everything another process needs to attach a [`BufferManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHandles {
    pub buffers: Vec<BufferHandle>,
    pub queue: QueueHandle,
    pub shape: Option<Shape>,
    pub order: Order,
}

/// N shared buffers of one shape handed out through a free list.
///
/// Slot `i` is `buffers[i]`. A slot returned by [`get_buffer`](Self::get_buffer)
/// belongs to the caller until it passes the id to [`reclaim`](Self::reclaim);
/// the manager does not stop anyone from touching a view after that.
#[derive(Debug)]
pub struct BufferManager<T: Element> {
    buffers: Vec<SharedBuffer>,
    queue: FreeListQueue,
    shape: Option<Shape>,
    order: Order,
    views: Option<Vec<RawView<T>>>,
    stats: AtomicPoolStats,
}

impl<T: Element> BufferManager<T> {
    /// Create a manager over `buffers`, viewing each as `shape` in row-major order
    pub fn new(buffers: Vec<SharedBuffer>, queue: FreeListQueue, shape: Option<Shape>) -> Result<Self> {
        Self::with_order(buffers, queue, shape, Order::RowMajor)
    }

    /// Create a manager with an explicit memory order, building views immediately
    pub fn with_order(
        buffers: Vec<SharedBuffer>,
        queue: FreeListQueue,
        shape: Option<Shape>,
        order: Order,
    ) -> Result<Self> {
        let mut manager = Self::unbuilt(buffers, queue, shape, order)?;
        manager.rebuild_views()?;
        Ok(manager)
    }

    /// Create a manager whose views are derived later by [`rebuild_views`](Self::rebuild_views)
    pub fn unbuilt(
        buffers: Vec<SharedBuffer>,
        queue: FreeListQueue,
        shape: Option<Shape>,
        order: Order,
    ) -> Result<Self> {
        if buffers.is_empty() {
            return Err(ShmPoolError::invalid_parameter(
                "buffers",
                "a pool needs at least one buffer",
            ));
        }
        if queue.slot_count() != buffers.len() {
            return Err(ShmPoolError::invalid_parameter(
                "queue",
                format!(
                    "free list manages {} slots, pool has {} buffers",
                    queue.slot_count(),
                    buffers.len()
                ),
            ));
        }
        if let Some(buffer) = buffers.iter().find(|b| b.dtype() != T::DTYPE) {
            return Err(ShmPoolError::DtypeMismatch {
                expected: T::DTYPE,
                actual: buffer.dtype(),
            });
        }

        let stats = AtomicPoolStats::new(buffers.len());
        Ok(Self {
            buffers,
            queue,
            shape,
            order,
            views: None,
            stats,
        })
    }

    /// Derive this process's views from the raw buffers.
    ///
    /// Required once after [`attach`](Self::attach); harmless to repeat.
    pub fn rebuild_views(&mut self) -> Result<()> {
        let views = self
            .buffers
            .iter()
            .map(|buffer| RawView::new(buffer, self.shape.as_ref(), self.order))
            .collect::<Result<Vec<_>>>()?;
        log::debug!(
            "built {} views of shape {}",
            views.len(),
            self.shape.clone().unwrap_or_else(|| Shape::vector(self.buffers[0].len()))
        );
        self.views = Some(views);
        Ok(())
    }

    /// Whether views exist in this process
    pub fn views_built(&self) -> bool {
        self.views.is_some()
    }

    fn views(&self) -> Result<&[RawView<T>]> {
        self.views.as_deref().ok_or(ShmPoolError::ViewsNotBuilt)
    }

    fn check_slot(&self, slot: SlotId) -> Result<()> {
        if slot as usize >= self.buffers.len() {
            return Err(ShmPoolError::InvalidSlot {
                slot,
                slot_count: self.buffers.len() as u32,
            });
        }
        Ok(())
    }

    /// Check out the oldest free slot, waiting up to `timeout` (forever if `None`)
    pub fn get_buffer(&self, timeout: Option<Duration>) -> Result<(SlotId, View<'_, T>)> {
        let views = self.views()?;
        let slot = match self.queue.dequeue(timeout) {
            Ok(slot) => slot,
            Err(e) => {
                if e.is_timeout() {
                    self.stats.record_timeout();
                }
                return Err(e);
            }
        };
        self.stats.record_checkout();
        log::trace!("checked out slot {}", slot);
        Ok((slot, views[slot as usize].bind()))
    }

    /// Return `slot` to the free list.
    ///
    /// Views of the slot must not be used afterwards.
    pub fn reclaim(&self, slot: SlotId) -> Result<()> {
        self.check_slot(slot)?;
        self.queue.enqueue(slot)?;
        self.stats.record_reclaim();
        log::trace!("reclaimed slot {}", slot);
        Ok(())
    }

    /// View of `slot`, projected through `indices` (empty for the whole buffer).
    ///
    /// Does not check the slot out.
    pub fn map_buffer(&self, slot: SlotId, indices: &[AxisSlice]) -> Result<View<'_, T>> {
        self.check_slot(slot)?;
        let view = self.views()?[slot as usize].bind();
        if indices.is_empty() {
            return Ok(view);
        }
        view.slice(indices)
    }

    pub fn slot_count(&self) -> usize {
        self.buffers.len()
    }

    /// Common shape of every slot (`None` for flat views)
    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn buffers(&self) -> &[SharedBuffer] {
        &self.buffers
    }

    pub fn queue(&self) -> &FreeListQueue {
        &self.queue
    }

    /// Slots currently free, across all processes
    pub fn free_count(&self) -> usize {
        self.queue.free_count()
    }

    /// This process's checkout counters
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Raw handles for shipping the pool to another process
    pub fn handles(&self) -> PoolHandles {
        PoolHandles {
            buffers: self.buffers.iter().map(SharedBuffer::handle).collect(),
            queue: self.queue.handle(),
            shape: self.shape.clone(),
            order: self.order,
        }
    }

    /// Attach a pool from its handles. Views are not built.
    ///
    /// # Safety
    /// Every handle must describe a live region created by a cooperating
    /// process, as for [`SharedBuffer::attach`] and [`FreeListQueue::attach`].
    pub unsafe fn attach(handles: &PoolHandles) -> Result<Self> {
        let buffers = handles
            .buffers
            .iter()
            .map(|handle| SharedBuffer::attach(handle))
            .collect::<Result<Vec<_>>>()?;
        let queue = FreeListQueue::attach(&handles.queue)?;
        log::debug!("attached pool of {} buffers", buffers.len());
        Self::unbuilt(buffers, queue, handles.shape.clone(), handles.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffers::RegionAllocator,
        dtype::DType,
    };

    fn pool(count: usize, shape: Shape) -> BufferManager<f64> {
        let allocator = RegionAllocator::default();
        let buffers = (0..count)
            .map(|_| allocator.allocate(&shape, DType::F64).unwrap())
            .collect();
        let queue = FreeListQueue::seeded(count, &allocator).unwrap();
        BufferManager::new(buffers, queue, Some(shape)).unwrap()
    }

    #[test]
    fn test_get_and_reclaim() {
        let manager = pool(2, Shape::from([2, 2]));
        let (slot, mut view) = manager.get_buffer(None).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(view.shape(), &[2, 2]);
        view.fill(3.0);

        manager.reclaim(slot).unwrap();
        let stats = manager.stats();
        assert_eq!(stats.checkouts, 1);
        assert_eq!(stats.reclaims, 1);
        assert_eq!(manager.map_buffer(0, &[]).unwrap().to_vec(), vec![3.0; 4]);
    }

    #[test]
    fn test_map_buffer_projection() {
        let manager = pool(1, Shape::from([2, 3]));
        let mut full = manager.map_buffer(0, &[]).unwrap();
        full.copy_from_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();

        let row = manager.map_buffer(0, &[AxisSlice::Index(1)]).unwrap();
        assert_eq!(row.to_vec(), vec![3.0, 4.0, 5.0]);

        let column = manager
            .map_buffer(0, &[AxisSlice::Full, AxisSlice::Index(2)])
            .unwrap();
        assert_eq!(column.to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_rejects_mismatched_queue() {
        let allocator = RegionAllocator::default();
        let buffers = vec![allocator.allocate(&Shape::vector(4), DType::F64).unwrap()];
        let queue = FreeListQueue::seeded(2, &allocator).unwrap();
        assert!(BufferManager::<f64>::new(buffers, queue, None).is_err());
    }

    #[test]
    fn test_rejects_wrong_element_type() {
        let allocator = RegionAllocator::default();
        let buffers = vec![allocator.allocate(&Shape::vector(4), DType::F32).unwrap()];
        let queue = FreeListQueue::seeded(1, &allocator).unwrap();
        assert!(matches!(
            BufferManager::<f64>::new(buffers, queue, None),
            Err(ShmPoolError::DtypeMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_shape_rejected_at_build() {
        let allocator = RegionAllocator::default();
        let buffers = vec![allocator.allocate(&Shape::vector(6), DType::F64).unwrap()];
        let queue = FreeListQueue::seeded(1, &allocator).unwrap();
        assert!(matches!(
            BufferManager::<f64>::new(buffers, queue, Some(Shape::from([4, 2]))),
            Err(ShmPoolError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_unbuilt_manager_keeps_slots() {
        let manager = pool(1, Shape::vector(3));
        let mut attached = unsafe { BufferManager::<f64>::attach(&manager.handles()) }.unwrap();
        assert!(!attached.views_built());
        assert!(matches!(attached.get_buffer(None), Err(ShmPoolError::ViewsNotBuilt)));
        assert_eq!(attached.free_count(), 1);

        attached.rebuild_views().unwrap();
        let (slot, _) = attached.get_buffer(Some(Duration::ZERO)).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(manager.free_count(), 0);
    }
}
