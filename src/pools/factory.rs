//! One-call construction of pools and shared records
//!
//! Every factory allocates its buffers up front and, for pools, a free list
//! seeded with `0..count` so the pool starts with every slot free.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    buffers::{AllocatorConfig, RegionAllocator, SharedBuffer},
    dtype::{DType, Element},
    error::{Result, ShmPoolError},
    free_list::FreeListQueue,
    shape::{Order, Shape, ShapeSpec},
};

use super::{
    dict::BufferedDictManager,
    manager::BufferManager,
    record::{BufferRecord, SharedDict},
};

/// Builds pools on top of a [`RegionAllocator`]
#[derive(Debug, Clone, Default)]
pub struct PoolFactory {
    allocator: RegionAllocator,
}

impl PoolFactory {
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        Ok(Self {
            allocator: RegionAllocator::new(config)?,
        })
    }

    pub fn with_allocator(allocator: RegionAllocator) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &RegionAllocator {
        &self.allocator
    }

    /// `count` buffers of `shape` plus a seeded free list
    pub fn create_buffers(
        &self,
        count: usize,
        shape: &Shape,
        dtype: DType,
    ) -> Result<(Vec<SharedBuffer>, FreeListQueue)> {
        check_count(count)?;
        let buffers = (0..count)
            .map(|_| self.allocator.allocate(shape, dtype))
            .collect::<Result<Vec<_>>>()?;
        let queue = FreeListQueue::seeded(count, &self.allocator)?;
        log::debug!("created {} {} buffers of shape {}", count, dtype, shape);
        Ok((buffers, queue))
    }

    /// `count` records with one `length`-element buffer per field, plus a seeded free list
    pub fn create_dict_buffers<S: AsRef<str>>(
        &self,
        field_names: &[S],
        count: usize,
        length: usize,
        dtype: DType,
    ) -> Result<(Vec<BufferRecord>, FreeListQueue)> {
        check_count(count)?;
        let names = field_set(field_names)?;
        let shape = Shape::vector(length);
        let records = (0..count)
            .map(|_| {
                names
                    .iter()
                    .map(|name| Ok((name.to_string(), self.allocator.allocate(&shape, dtype)?)))
                    .collect::<Result<BufferRecord>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let queue = FreeListQueue::seeded(count, &self.allocator)?;
        log::debug!(
            "created {} records of {} {} fields, length {}",
            count,
            names.len(),
            dtype,
            length
        );
        Ok((records, queue))
    }

    /// One record whose fields all have `shape`
    pub fn create_shared_dict<S: AsRef<str>>(
        &self,
        field_names: &[S],
        shape: &Shape,
        dtype: DType,
    ) -> Result<SharedDict> {
        let names = field_set(field_names)?;
        let record = names
            .iter()
            .map(|name| Ok((name.to_string(), self.allocator.allocate(shape, dtype)?)))
            .collect::<Result<BufferRecord>>()?;
        Ok(SharedDict {
            record,
            shapes: ShapeSpec::Uniform(shape.clone()),
        })
    }

    /// One record whose fields each carry their own shape.
    ///
    /// A scalar shape `()` becomes a one-element buffer viewed as `(1,)`.
    pub fn create_shared_dict_with_shapes(
        &self,
        shape_by_name: &BTreeMap<String, Shape>,
        dtype: DType,
    ) -> Result<SharedDict> {
        if shape_by_name.is_empty() {
            return Err(ShmPoolError::invalid_parameter(
                "shape_by_name",
                "at least one field is required",
            ));
        }
        let record = shape_by_name
            .iter()
            .map(|(name, shape)| Ok((name.clone(), self.allocator.allocate(shape, dtype)?)))
            .collect::<Result<BufferRecord>>()?;
        Ok(SharedDict {
            record,
            shapes: ShapeSpec::PerField(shape_by_name.clone()),
        })
    }

    /// [`create_buffers`](Self::create_buffers) wrapped in a ready [`BufferManager`]
    pub fn create_managed_buffers<T: Element>(
        &self,
        count: usize,
        shape: &Shape,
    ) -> Result<BufferManager<T>> {
        let (buffers, queue) = self.create_buffers(count, shape, T::DTYPE)?;
        BufferManager::new(buffers, queue, Some(shape.clone()))
    }

    /// [`create_dict_buffers`](Self::create_dict_buffers) wrapped in a ready [`BufferedDictManager`]
    pub fn create_managed_dict_buffers<T: Element, S: AsRef<str>>(
        &self,
        field_names: &[S],
        count: usize,
        length: usize,
    ) -> Result<BufferedDictManager<T>> {
        let (records, queue) = self.create_dict_buffers(field_names, count, length, T::DTYPE)?;
        BufferedDictManager::with_layout(records, queue, ShapeSpec::Flat, Order::RowMajor)
    }
}

fn check_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(ShmPoolError::invalid_parameter(
            "count",
            "a pool needs at least one slot",
        ));
    }
    Ok(())
}

fn field_set<S: AsRef<str>>(field_names: &[S]) -> Result<BTreeSet<&str>> {
    if field_names.is_empty() {
        return Err(ShmPoolError::invalid_parameter(
            "field_names",
            "at least one field is required",
        ));
    }
    let mut names = BTreeSet::new();
    for name in field_names {
        if !names.insert(name.as_ref()) {
            return Err(ShmPoolError::invalid_parameter(
                "field_names",
                format!("duplicate field '{}'", name.as_ref()),
            ));
        }
    }
    Ok(names)
}

/// [`PoolFactory::create_buffers`] with the default allocator
pub fn create_buffers(
    count: usize,
    shape: &Shape,
    dtype: DType,
) -> Result<(Vec<SharedBuffer>, FreeListQueue)> {
    PoolFactory::default().create_buffers(count, shape, dtype)
}

/// [`PoolFactory::create_dict_buffers`] with the default allocator
pub fn create_dict_buffers<S: AsRef<str>>(
    field_names: &[S],
    count: usize,
    length: usize,
    dtype: DType,
) -> Result<(Vec<BufferRecord>, FreeListQueue)> {
    PoolFactory::default().create_dict_buffers(field_names, count, length, dtype)
}

/// [`PoolFactory::create_shared_dict`] with the default allocator
pub fn create_shared_dict<S: AsRef<str>>(
    field_names: &[S],
    shape: &Shape,
    dtype: DType,
) -> Result<SharedDict> {
    PoolFactory::default().create_shared_dict(field_names, shape, dtype)
}

/// [`PoolFactory::create_shared_dict_with_shapes`] with the default allocator
pub fn create_shared_dict_with_shapes(
    shape_by_name: &BTreeMap<String, Shape>,
    dtype: DType,
) -> Result<SharedDict> {
    PoolFactory::default().create_shared_dict_with_shapes(shape_by_name, dtype)
}

/// [`PoolFactory::create_managed_buffers`] with the default allocator
pub fn create_managed_buffers<T: Element>(count: usize, shape: &Shape) -> Result<BufferManager<T>> {
    PoolFactory::default().create_managed_buffers(count, shape)
}

/// [`PoolFactory::create_managed_dict_buffers`] with the default allocator
pub fn create_managed_dict_buffers<T: Element, S: AsRef<str>>(
    field_names: &[S],
    count: usize,
    length: usize,
) -> Result<BufferedDictManager<T>> {
    PoolFactory::default().create_managed_dict_buffers(field_names, count, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_buffers_seeds_queue() {
        let (buffers, queue) = create_buffers(3, &Shape::from([2, 2]), DType::F32).unwrap();
        assert_eq!(buffers.len(), 3);
        assert!(buffers.iter().all(|b| b.len() == 4 && b.dtype() == DType::F32));
        assert_eq!(queue.free_count(), 3);
    }

    #[test]
    fn test_zero_count_rejected() {
        assert!(create_buffers(0, &Shape::vector(2), DType::F64).is_err());
        assert!(create_dict_buffers(&["a"], 0, 2, DType::F64).is_err());
    }

    #[test]
    fn test_dict_buffers_fields() {
        let (records, queue) = create_dict_buffers(&["a", "b"], 2, 5, DType::F64).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(queue.slot_count(), 2);
        for record in &records {
            assert_eq!(record.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
            assert_eq!(record.get("a").unwrap().len(), 5);
        }
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        assert!(create_dict_buffers(&["a", "a"], 1, 2, DType::F64).is_err());
        let empty: [&str; 0] = [];
        assert!(create_shared_dict(&empty, &Shape::vector(2), DType::F64).is_err());
    }

    #[test]
    fn test_shared_dict_uniform() {
        let dict = create_shared_dict(&["u", "v"], &Shape::from([3, 4]), DType::F32).unwrap();
        let views = dict.views::<f32>(Order::RowMajor).unwrap();
        assert_eq!(views["u"].shape(), &[3, 4]);
        assert_eq!(views["v"].len(), 12);
    }

    #[test]
    fn test_managed_buffers() {
        let manager = create_managed_buffers::<f32>(2, &Shape::vector(16)).unwrap();
        assert_eq!(manager.slot_count(), 2);
        assert_eq!(manager.free_count(), 2);
    }

    #[test]
    fn test_managed_dict_buffers() {
        let manager = create_managed_dict_buffers::<f64, _>(&["t", "v"], 2, 10).unwrap();
        let (_, views) = manager.get_buffer(Some(4), None).unwrap();
        assert_eq!(views["t"].len(), 4);
        assert_eq!(views["v"].len(), 4);
    }
}
