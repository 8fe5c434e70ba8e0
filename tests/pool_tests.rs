//! Tests for the buffer pool checkout protocol

use std::time::{Duration, Instant};

use shmpool::{
    create_buffers, create_managed_buffers, AllocatorConfig, AxisSlice, BackingType,
    BufferManager, DType, Order, PoolFactory, Shape, ShmPoolError,
};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod pool_tests {
    use super::*;

    #[test]
    fn test_drain_then_timeout() {
        init_logging();
        for count in [1usize, 2, 5] {
            let pool = create_managed_buffers::<f64>(count, &Shape::vector(8)).unwrap();
            let mut held = Vec::new();
            for _ in 0..count {
                held.push(pool.get_buffer(Some(Duration::from_millis(10))).unwrap().0);
            }
            held.sort_unstable();
            assert_eq!(held, (0..count as u32).collect::<Vec<_>>());

            let start = Instant::now();
            let err = pool.get_buffer(Some(Duration::from_millis(30))).unwrap_err();
            assert!(matches!(err, ShmPoolError::Timeout { .. }));
            assert!(start.elapsed() >= Duration::from_millis(30));
            assert_eq!(pool.stats().timeouts, 1);
        }
    }

    #[test]
    fn test_timeout_has_no_side_effect() {
        init_logging();
        let pool = create_managed_buffers::<f32>(1, &Shape::vector(4)).unwrap();
        let (slot, _) = pool.get_buffer(None).unwrap();
        assert!(pool.get_buffer(Some(Duration::ZERO)).is_err());
        assert_eq!(pool.queue().checked_out_count(), 1);

        pool.reclaim(slot).unwrap();
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.get_buffer(Some(Duration::ZERO)).unwrap().0, slot);
    }

    #[test]
    fn test_fifo_order_single_consumer() {
        init_logging();
        let pool = create_managed_buffers::<f64>(3, &Shape::vector(2)).unwrap();
        let (a, _) = pool.get_buffer(None).unwrap();
        let (b, _) = pool.get_buffer(None).unwrap();
        let (c, _) = pool.get_buffer(None).unwrap();
        pool.reclaim(a).unwrap();
        pool.reclaim(b).unwrap();
        pool.reclaim(c).unwrap();

        let mut order = Vec::new();
        for _ in 0..6 {
            let (slot, _) = pool.get_buffer(None).unwrap();
            order.push(slot);
            pool.reclaim(slot).unwrap();
        }
        assert_eq!(order, vec![a, b, c, a, b, c]);
    }

    #[test]
    fn test_reclaim_errors() {
        init_logging();
        let pool = create_managed_buffers::<f64>(2, &Shape::vector(2)).unwrap();
        assert!(matches!(
            pool.reclaim(0),
            Err(ShmPoolError::SlotNotCheckedOut { slot: 0 })
        ));
        assert!(matches!(pool.reclaim(7), Err(ShmPoolError::InvalidSlot { .. })));

        let (slot, _) = pool.get_buffer(None).unwrap();
        pool.reclaim(slot).unwrap();
        assert!(pool.reclaim(slot).is_err());
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_views_alias_storage() {
        init_logging();
        let pool = create_managed_buffers::<f64>(2, &Shape::from([2, 3])).unwrap();
        let (slot, mut view) = pool.get_buffer(None).unwrap();
        view.set(&[1, 2], 42.0).unwrap();

        let mapped = pool.map_buffer(slot, &[]).unwrap();
        assert_eq!(mapped.get(&[1, 2]), Some(42.0));
        let row = pool.map_buffer(slot, &[AxisSlice::Index(1)]).unwrap();
        assert_eq!(row.to_vec(), vec![0.0, 0.0, 42.0]);

        let other = pool.map_buffer(1 - slot, &[]).unwrap();
        assert!(other.to_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_column_major_pool() {
        init_logging();
        let (buffers, queue) = create_buffers(1, &Shape::from([2, 3]), DType::F32).unwrap();
        let pool =
            BufferManager::<f32>::with_order(buffers, queue, Some(Shape::from([2, 3])), Order::ColumnMajor)
                .unwrap();
        let (_, mut view) = pool.get_buffer(None).unwrap();
        assert_eq!(view.strides(), &[1, 2]);
        view.set(&[1, 0], 1.0).unwrap();

        let raw = shmpool::as_view::<f32>(&pool.buffers()[0], None, Order::RowMajor).unwrap();
        assert_eq!(raw.get(&[1]), Some(1.0));
    }

    #[test]
    fn test_file_backed_pool() {
        init_logging();
        let temp_dir = TempDir::new().unwrap();
        let config = AllocatorConfig::new()
            .with_backing_type(BackingType::FileBacked)
            .with_directory(temp_dir.path())
            .with_name_prefix("filepool");
        let factory = PoolFactory::new(config).unwrap();
        let pool = factory
            .create_managed_buffers::<f64>(2, &Shape::vector(16))
            .unwrap();

        let (slot, mut view) = pool.get_buffer(None).unwrap();
        view.fill(2.5);
        pool.reclaim(slot).unwrap();

        let files = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(files, 3);
        assert!(pool.buffers()[0].region().is_file_backed());
    }

    #[test]
    fn test_handles_roundtrip_rebuild_views() {
        init_logging();
        let pool = create_managed_buffers::<f64>(2, &Shape::from([4, 2])).unwrap();
        let (slot, mut view) = pool.get_buffer(None).unwrap();
        let values: Vec<f64> = (0..8).map(|i| i as f64 * 0.5).collect();
        view.copy_from_slice(&values).unwrap();

        let handles = pool.handles();
        let mut attached = unsafe { BufferManager::<f64>::attach(&handles) }.unwrap();
        assert!(matches!(
            attached.map_buffer(slot, &[]),
            Err(ShmPoolError::ViewsNotBuilt)
        ));
        attached.rebuild_views().unwrap();

        let seen = attached.map_buffer(slot, &[]).unwrap();
        assert_eq!(seen.shape(), &[4, 2]);
        assert_eq!(seen.to_vec(), values);

        attached.reclaim(slot).unwrap();
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_attach_rejects_overflowing_shape() {
        init_logging();
        let pool = create_managed_buffers::<f64>(1, &Shape::vector(2)).unwrap();
        let mut handles = pool.handles();
        handles.shape = Some(Shape::from([(1usize << 63) + 1, 2]));

        let mut attached = unsafe { BufferManager::<f64>::attach(&handles) }.unwrap();
        assert!(matches!(
            attached.rebuild_views(),
            Err(ShmPoolError::ShapeMismatch { elements: 2, .. })
        ));
        assert!(!attached.views_built());
    }

    #[test]
    fn test_attach_file_backed_by_path() {
        init_logging();
        let temp_dir = TempDir::new().unwrap();
        let config = AllocatorConfig::new()
            .with_backing_type(BackingType::FileBacked)
            .with_directory(temp_dir.path());
        let pool = PoolFactory::new(config)
            .unwrap()
            .create_managed_buffers::<f32>(1, &Shape::vector(3))
            .unwrap();
        pool.map_buffer(0, &[]).unwrap().copy_from_slice(&[1.0, 2.0, 3.0]).unwrap();

        let mut attached = unsafe { BufferManager::<f32>::attach(&pool.handles()) }.unwrap();
        attached.rebuild_views().unwrap();
        assert_eq!(attached.map_buffer(0, &[]).unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
    }
}
