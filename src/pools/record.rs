//! Named groups of shared buffers

use std::collections::{btree_map, BTreeMap};

use serde::{Deserialize, Serialize};

use crate::{
    buffers::{as_view, BufferHandle, RawView, SharedBuffer, View},
    dtype::Element,
    error::{Result, ShmPoolError},
    shape::{Order, Shape, ShapeSpec},
};

/// Field name to buffer; one slot of a [`BufferedDictManager`](super::BufferedDictManager)
#[derive(Debug, Clone, Default)]
pub struct BufferRecord {
    fields: BTreeMap<String, SharedBuffer>,
}

/// Raw form of a [`BufferRecord`]
pub type RecordHandle = BTreeMap<String, BufferHandle>;

impl BufferRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field
    pub fn insert(&mut self, name: impl Into<String>, buffer: SharedBuffer) -> Option<SharedBuffer> {
        self.fields.insert(name.into(), buffer)
    }

    pub fn get(&self, name: &str) -> Option<&SharedBuffer> {
        self.fields.get(name)
    }

    /// Field names in sorted order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, SharedBuffer> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn handle(&self) -> RecordHandle {
        self.fields
            .iter()
            .map(|(name, buffer)| (name.clone(), buffer.handle()))
            .collect()
    }

    /// Attach every field of a record.
    ///
    /// # Safety
    /// Same contract as [`SharedBuffer::attach`] for each handle.
    pub unsafe fn attach(handle: &RecordHandle) -> Result<Self> {
        let fields = handle
            .iter()
            .map(|(name, buffer)| Ok((name.clone(), SharedBuffer::attach(buffer)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { fields })
    }
}

impl FromIterator<(String, SharedBuffer)> for BufferRecord {
    fn from_iter<I: IntoIterator<Item = (String, SharedBuffer)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a BufferRecord {
    type Item = (&'a String, &'a SharedBuffer);
    type IntoIter = btree_map::Iter<'a, String, SharedBuffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A single record together with the shapes its fields are viewed with
#[derive(Debug, Clone)]
pub struct SharedDict {
    pub record: BufferRecord,
    pub shapes: ShapeSpec,
}

/// Raw form of a [`SharedDict`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedDictHandle {
    pub record: RecordHandle,
    pub shapes: ShapeSpec,
}

impl SharedDict {
    /// Name to view mapping in `order`
    pub fn views<T: Element>(&self, order: Order) -> Result<BTreeMap<String, View<'_, T>>> {
        reconstruct_named_views(&self.record, &self.shapes, order)
    }

    pub fn handle(&self) -> SharedDictHandle {
        SharedDictHandle {
            record: self.record.handle(),
            shapes: self.shapes.clone(),
        }
    }

    /// # Safety
    /// Same contract as [`BufferRecord::attach`].
    pub unsafe fn attach(handle: &SharedDictHandle) -> Result<Self> {
        Ok(Self {
            record: BufferRecord::attach(&handle.record)?,
            shapes: handle.shapes.clone(),
        })
    }
}

/// Rebuild the name to view mapping of `record`.
///
/// Every field of a per-field map must have an entry.
pub fn reconstruct_named_views<'a, T: Element>(
    record: &'a BufferRecord,
    shapes: &ShapeSpec,
    order: Order,
) -> Result<BTreeMap<String, View<'a, T>>> {
    record
        .iter()
        .map(|(name, buffer)| {
            let shape = field_shape(shapes, name)?;
            Ok((name.clone(), as_view(buffer, shape.as_ref(), order)?))
        })
        .collect()
}

/// Unbound form of [`reconstruct_named_views`], kept per slot by the dict pool
pub(crate) fn raw_named_views<T: Element>(
    record: &BufferRecord,
    shapes: &ShapeSpec,
    order: Order,
) -> Result<BTreeMap<String, RawView<T>>> {
    record
        .iter()
        .map(|(name, buffer)| {
            let shape = field_shape(shapes, name)?;
            Ok((name.clone(), RawView::new(buffer, shape.as_ref(), order)?))
        })
        .collect()
}

fn field_shape(shapes: &ShapeSpec, name: &str) -> Result<Option<Shape>> {
    match (shapes, shapes.shape_for(name)) {
        (ShapeSpec::PerField(_), None) => Err(ShmPoolError::invalid_parameter(
            "shapes",
            format!("no shape given for field '{}'", name),
        )),
        (_, shape) => Ok(shape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffers::allocate, dtype::DType};

    fn record(fields: &[(&str, usize)]) -> BufferRecord {
        fields
            .iter()
            .map(|&(name, len)| {
                (name.to_string(), allocate(&Shape::vector(len), DType::F32).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_uniform_shape() {
        let record = record(&[("a", 6), ("b", 6)]);
        let views =
            reconstruct_named_views::<f32>(&record, &ShapeSpec::Uniform(Shape::from([2, 3])), Order::RowMajor)
                .unwrap();
        assert_eq!(views["a"].shape(), &[2, 3]);
        assert_eq!(views["b"].shape(), &[2, 3]);
    }

    #[test]
    fn test_per_field_shapes() {
        let record = record(&[("x", 1), ("y", 10)]);
        let mut shapes = BTreeMap::new();
        shapes.insert("x".to_string(), Shape::scalar());
        shapes.insert("y".to_string(), Shape::vector(10));

        let views =
            reconstruct_named_views::<f32>(&record, &ShapeSpec::PerField(shapes), Order::RowMajor).unwrap();
        assert_eq!(views["x"].len(), 1);
        assert_eq!(views["y"].len(), 10);
    }

    #[test]
    fn test_missing_field_shape() {
        let record = record(&[("x", 1), ("y", 10)]);
        let mut shapes = BTreeMap::new();
        shapes.insert("x".to_string(), Shape::scalar());
        assert!(reconstruct_named_views::<f32>(&record, &ShapeSpec::PerField(shapes), Order::RowMajor).is_err());
    }

    #[test]
    fn test_record_handle_roundtrip() {
        let original = record(&[("v", 4)]);
        as_view::<f32>(original.get("v").unwrap(), None, Order::RowMajor)
            .unwrap()
            .copy_from_slice(&[1.0, 2.0, 3.0, 4.0])
            .unwrap();

        let attached = unsafe { BufferRecord::attach(&original.handle()) }.unwrap();
        let views = reconstruct_named_views::<f32>(&attached, &ShapeSpec::Flat, Order::RowMajor).unwrap();
        assert_eq!(views["v"].to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
