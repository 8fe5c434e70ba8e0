//! Tests for named record pools and shared dicts

use std::{collections::BTreeMap, time::Duration};

use shmpool::{
    create_dict_buffers, create_managed_dict_buffers, create_shared_dict,
    create_shared_dict_with_shapes, reconstruct_named_views, BufferRecord, BufferedDictManager,
    DType, Order, Shape, ShapeSpec, SharedDict, ShmPoolError,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod dict_pool_tests {
    use super::*;

    #[test]
    fn test_truncated_view_is_prefix_of_full_view() {
        init_logging();
        let pool = create_managed_dict_buffers::<f64, _>(&["flux", "depth"], 2, 12).unwrap();
        let full = pool.map_buffer(0, None).unwrap();
        for (offset, (_, view)) in full.into_iter().enumerate() {
            let mut view = view;
            let values: Vec<f64> = (0..12).map(|i| (offset * 100 + i) as f64).collect();
            view.copy_from_slice(&values).unwrap();
        }

        for length in [0usize, 1, 7, 12] {
            let (slot, views) = pool.get_buffer(Some(length), None).unwrap();
            assert_eq!(slot, 0);
            let full = pool.map_buffer(slot, None).unwrap();
            for (name, view) in &views {
                assert_eq!(view.len(), length);
                assert_eq!(view.to_vec(), full[name].to_vec()[..length].to_vec());
            }
            pool.reclaim(slot).unwrap();
            // keep slot 0 at the head for the next round
            let (other, _) = pool.get_buffer(None, None).unwrap();
            pool.reclaim(other).unwrap();
        }
    }

    #[test]
    fn test_untruncated_checkout_is_full_capacity() {
        init_logging();
        let pool = create_managed_dict_buffers::<f32, _>(&["a", "b", "c"], 1, 9).unwrap();
        let (_, views) = pool.get_buffer(None, None).unwrap();
        assert_eq!(views.len(), 3);
        assert!(views.values().all(|v| v.len() == 9));
    }

    #[test]
    fn test_length_out_of_range_keeps_slot() {
        init_logging();
        let pool = create_managed_dict_buffers::<f32, _>(&["a"], 1, 4).unwrap();
        assert!(matches!(
            pool.get_buffer(Some(5), None),
            Err(ShmPoolError::LengthOutOfRange { requested: 5, capacity: 4, .. })
        ));
        assert_eq!(pool.free_count(), 1);
        assert!(pool.map_buffer(0, Some(5)).is_err());
    }

    #[test]
    fn test_dict_pool_drain_and_timeout() {
        init_logging();
        let pool = create_managed_dict_buffers::<f64, _>(&["x"], 3, 2).unwrap();
        for _ in 0..3 {
            pool.get_buffer(Some(1), Some(Duration::from_millis(5))).unwrap();
        }
        assert!(pool
            .get_buffer(Some(1), Some(Duration::from_millis(10)))
            .unwrap_err()
            .is_timeout());
    }

    #[test]
    fn test_scalar_and_array_fields() {
        init_logging();
        let mut shapes = BTreeMap::new();
        shapes.insert("x".to_string(), Shape::scalar());
        shapes.insert("y".to_string(), Shape::vector(10));

        let dict = create_shared_dict_with_shapes(&shapes, DType::F64).unwrap();
        let views = dict.views::<f64>(Order::RowMajor).unwrap();
        assert_eq!(views["x"].len(), 1);
        assert_eq!(views["x"].shape(), &[1]);
        assert_eq!(views["y"].len(), 10);
    }

    #[test]
    fn test_shared_dict_handle_roundtrip() {
        init_logging();
        let dict = create_shared_dict(&["p", "q"], &Shape::from([2, 2]), DType::F32).unwrap();
        {
            let mut views = dict.views::<f32>(Order::RowMajor).unwrap();
            views.get_mut("q").unwrap().set(&[1, 1], 9.0).unwrap();
        }

        let attached = unsafe { SharedDict::attach(&dict.handle()) }.unwrap();
        let views = attached.views::<f32>(Order::RowMajor).unwrap();
        assert_eq!(views["q"].shape(), &[2, 2]);
        assert_eq!(views["q"].get(&[1, 1]), Some(9.0));
    }

    #[test]
    fn test_reconstruct_with_common_and_per_field_shapes() {
        init_logging();
        let (records, _queue) = create_dict_buffers(&["u", "v"], 1, 6, DType::F64).unwrap();
        let record: &BufferRecord = &records[0];

        let common =
            reconstruct_named_views::<f64>(record, &ShapeSpec::Uniform(Shape::from([3, 2])), Order::RowMajor)
                .unwrap();
        assert!(common.values().all(|v| v.shape() == [3, 2]));

        let mut per_field = BTreeMap::new();
        per_field.insert("u".to_string(), Shape::from([6]));
        per_field.insert("v".to_string(), Shape::from([2, 3]));
        let named =
            reconstruct_named_views::<f64>(record, &ShapeSpec::PerField(per_field), Order::ColumnMajor).unwrap();
        assert_eq!(named["u"].shape(), &[6]);
        assert_eq!(named["v"].strides(), &[1, 2]);

        assert!(matches!(
            reconstruct_named_views::<f64>(record, &ShapeSpec::Uniform(Shape::from([4, 2])), Order::RowMajor),
            Err(ShmPoolError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_dict_pool_attach_requires_rebuild() {
        init_logging();
        let pool = create_managed_dict_buffers::<f64, _>(&["a", "b"], 2, 5).unwrap();
        pool.map_buffer(1, None).unwrap().get_mut("b").unwrap().fill(7.0);

        let mut attached = unsafe { BufferedDictManager::<f64>::attach(&pool.handles()) }.unwrap();
        assert!(matches!(
            attached.get_buffer(Some(2), None),
            Err(ShmPoolError::ViewsNotBuilt)
        ));
        assert_eq!(pool.free_count(), 2);

        attached.rebuild_views().unwrap();
        let views = attached.map_buffer(1, Some(3)).unwrap();
        assert_eq!(views["b"].to_vec(), vec![7.0; 3]);
        assert_eq!(attached.capacity("a"), Some(5));
    }
}
