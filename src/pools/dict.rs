//! Pool of named buffer records with length-truncated views

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    buffers::{RawView, View},
    dtype::Element,
    error::{Result, ShmPoolError},
    free_list::{FreeListQueue, QueueHandle, SlotId},
    shape::{Order, ShapeSpec},
};

use super::{
    record::{raw_named_views, BufferRecord, RecordHandle},
    stats::{AtomicPoolStats, PoolStats},
};

/// Field name to view for one checked-out record
pub type NamedViews<'a, T> = BTreeMap<String, View<'a, T>>;

/// Everything another process needs to attach a [`BufferedDictManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictPoolHandles {
    pub records: Vec<RecordHandle>,
    pub queue: QueueHandle,
    pub shapes: ShapeSpec,
    pub order: Order,
}

/// Built views of every slot plus each field's leading capacity
#[derive(Debug)]
struct RecordViews<T> {
    slots: Vec<BTreeMap<String, RawView<T>>>,
    /// Leading dimension per field; `None` for rank-0 fields
    capacities: BTreeMap<String, Option<usize>>,
}

/// N buffer records handed out through a free list.
///
/// Every record carries the same field names. Checkouts may ask for a
/// `length`, in which case each field's view covers only its first `length`
/// rows: a fixed-capacity record holding a shorter chunk.
#[derive(Debug)]
pub struct BufferedDictManager<T: Element> {
    records: Vec<BufferRecord>,
    queue: FreeListQueue,
    shapes: ShapeSpec,
    order: Order,
    views: Option<RecordViews<T>>,
    stats: AtomicPoolStats,
}

impl<T: Element> BufferedDictManager<T> {
    /// Create a manager with flat field views
    pub fn new(records: Vec<BufferRecord>, queue: FreeListQueue) -> Result<Self> {
        Self::with_layout(records, queue, ShapeSpec::Flat, Order::RowMajor)
    }

    /// Create a manager viewing fields through `shapes`, building views immediately
    pub fn with_layout(
        records: Vec<BufferRecord>,
        queue: FreeListQueue,
        shapes: ShapeSpec,
        order: Order,
    ) -> Result<Self> {
        let mut manager = Self::unbuilt(records, queue, shapes, order)?;
        manager.rebuild_views()?;
        Ok(manager)
    }

    /// Create a manager whose views are derived later by [`rebuild_views`](Self::rebuild_views)
    pub fn unbuilt(
        records: Vec<BufferRecord>,
        queue: FreeListQueue,
        shapes: ShapeSpec,
        order: Order,
    ) -> Result<Self> {
        let Some(first) = records.first() else {
            return Err(ShmPoolError::invalid_parameter(
                "records",
                "a pool needs at least one record",
            ));
        };
        if first.is_empty() {
            return Err(ShmPoolError::invalid_parameter(
                "records",
                "records need at least one field",
            ));
        }
        if queue.slot_count() != records.len() {
            return Err(ShmPoolError::invalid_parameter(
                "queue",
                format!(
                    "free list manages {} slots, pool has {} records",
                    queue.slot_count(),
                    records.len()
                ),
            ));
        }
        for (slot, record) in records.iter().enumerate() {
            if !record.field_names().eq(first.field_names()) {
                return Err(ShmPoolError::invalid_parameter(
                    "records",
                    format!("record {} has different fields from record 0", slot),
                ));
            }
            if let Some((_, buffer)) = record.iter().find(|(_, b)| b.dtype() != T::DTYPE) {
                return Err(ShmPoolError::DtypeMismatch {
                    expected: T::DTYPE,
                    actual: buffer.dtype(),
                });
            }
        }

        let stats = AtomicPoolStats::new(records.len());
        Ok(Self {
            records,
            queue,
            shapes,
            order,
            views: None,
            stats,
        })
    }

    /// Derive, per slot, the full name to view mapping for this process
    pub fn rebuild_views(&mut self) -> Result<()> {
        let slots = self
            .records
            .iter()
            .map(|record| raw_named_views::<T>(record, &self.shapes, self.order))
            .collect::<Result<Vec<_>>>()?;

        let mut capacities: BTreeMap<String, Option<usize>> = BTreeMap::new();
        for views in &slots {
            for (name, view) in views {
                let leading = view.bind().shape().first().copied();
                capacities
                    .entry(name.clone())
                    .and_modify(|cap| *cap = cap.zip(leading).map(|(a, b)| a.min(b)))
                    .or_insert(leading);
            }
        }

        log::debug!(
            "built views for {} records of fields {:?}",
            slots.len(),
            capacities.keys().collect::<Vec<_>>()
        );
        self.views = Some(RecordViews { slots, capacities });
        Ok(())
    }

    pub fn views_built(&self) -> bool {
        self.views.is_some()
    }

    fn built(&self) -> Result<&RecordViews<T>> {
        self.views.as_ref().ok_or(ShmPoolError::ViewsNotBuilt)
    }

    fn check_length(views: &RecordViews<T>, length: usize) -> Result<()> {
        for (field, capacity) in &views.capacities {
            let fits = capacity.is_some_and(|capacity| length <= capacity);
            if !fits {
                let capacity = capacity.unwrap_or(0);
                return Err(ShmPoolError::LengthOutOfRange {
                    field: field.clone(),
                    requested: length,
                    capacity,
                });
            }
        }
        Ok(())
    }

    fn check_slot(&self, slot: SlotId) -> Result<()> {
        if slot as usize >= self.records.len() {
            return Err(ShmPoolError::InvalidSlot {
                slot,
                slot_count: self.records.len() as u32,
            });
        }
        Ok(())
    }

    fn project<'a>(
        views: &BTreeMap<String, RawView<T>>,
        length: Option<usize>,
    ) -> Result<NamedViews<'a, T>> {
        views
            .iter()
            .map(|(name, raw)| {
                let view = raw.bind();
                let view = match length {
                    Some(length) => view.truncate(length)?,
                    None => view,
                };
                Ok((name.clone(), view))
            })
            .collect()
    }

    /// Check out the oldest free record.
    ///
    /// With `length`, every field is cut to its first `length` rows. Lengths
    /// are never clamped: one beyond any field's capacity fails with
    /// [`LengthOutOfRange`](ShmPoolError::LengthOutOfRange) before anything
    /// is dequeued. A rank-0 field has no rows to cut, so it rejects every
    /// `length` and reports a capacity of 0. Pass `None` to take such records
    /// whole.
    pub fn get_buffer(
        &self,
        length: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<(SlotId, NamedViews<'_, T>)> {
        let views = self.built()?;
        if let Some(length) = length {
            Self::check_length(views, length)?;
        }

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
        log::trace!("checked out record {} (length {:?})", slot, length);

        match Self::project(&views.slots[slot as usize], length) {
            Ok(named) => Ok((slot, named)),
            Err(e) => {
                // Hand the slot back rather than leak it.
                self.reclaim(slot)?;
                Err(e)
            }
        }
    }

    /// Views of `slot`, optionally cut to `length` rows. Does not check the slot out.
    ///
    /// `length` is checked as in [`get_buffer`](Self::get_buffer).
    pub fn map_buffer(&self, slot: SlotId, length: Option<usize>) -> Result<NamedViews<'_, T>> {
        self.check_slot(slot)?;
        let views = self.built()?;
        if let Some(length) = length {
            Self::check_length(views, length)?;
        }
        Self::project(&views.slots[slot as usize], length)
    }

    /// Return `slot` to the free list; its views must not be used afterwards
    pub fn reclaim(&self, slot: SlotId) -> Result<()> {
        self.check_slot(slot)?;
        self.queue.enqueue(slot)?;
        self.stats.record_reclaim();
        log::trace!("reclaimed record {}", slot);
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.records.len()
    }

    /// Field names shared by every record
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.records[0].field_names()
    }

    /// Leading capacity of `field`, once views are built
    pub fn capacity(&self, field: &str) -> Option<usize> {
        self.views.as_ref()?.capacities.get(field).copied().flatten()
    }

    pub fn shapes(&self) -> &ShapeSpec {
        &self.shapes
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn records(&self) -> &[BufferRecord] {
        &self.records
    }

    pub fn queue(&self) -> &FreeListQueue {
        &self.queue
    }

    pub fn free_count(&self) -> usize {
        self.queue.free_count()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    pub fn handles(&self) -> DictPoolHandles {
        DictPoolHandles {
            records: self.records.iter().map(BufferRecord::handle).collect(),
            queue: self.queue.handle(),
            shapes: self.shapes.clone(),
            order: self.order,
        }
    }

    /// Attach a dict pool from its handles. Views are not built.
    ///
    /// # Safety
    /// Every handle must describe a live region created by a cooperating process.
    pub unsafe fn attach(handles: &DictPoolHandles) -> Result<Self> {
        let records = handles
            .records
            .iter()
            .map(|handle| BufferRecord::attach(handle))
            .collect::<Result<Vec<_>>>()?;
        let queue = FreeListQueue::attach(&handles.queue)?;
        log::debug!("attached dict pool of {} records", records.len());
        Self::unbuilt(records, queue, handles.shapes.clone(), handles.order)
    }
}
