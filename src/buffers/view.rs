//! Typed, shaped views over shared buffers
//!
//! A [`View`] reinterprets the bytes of a [`SharedBuffer`] in place. Nothing
//! is copied: a write through one view is visible through every other view
//! over the same buffer, in this process or any other that mapped it.
//!
//! # Aliasing contract
//!
//! Views alias freely. Cloning a view, deriving a sub-view, or mapping the
//! same slot twice yields independent handles to the same elements, and
//! another process may hold more. Rust cannot see those other holders, so
//! exclusivity is not enforced here. It comes from the pool protocol: the
//! consumer that checked a slot out with `get_buffer` is the only one that
//! reads or writes it until `reclaim`. A view stays memory-safe to use for
//! as long as the buffer or pool it borrows from is alive, but data written
//! after `reclaim` may race with the slot's next holder.

use std::{
    marker::PhantomData,
    ops::{Range, RangeFrom, RangeFull, RangeTo},
    ptr::NonNull,
};

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn, ShapeBuilder};

use crate::{
    dtype::Element,
    error::{Result, ShmPoolError},
    shape::{element_count, strides_for, Order, Shape},
};

use super::shared::SharedBuffer;

/// Selector for one axis of an index projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSlice {
    /// Select one position and drop the axis
    Index(usize),
    /// Select `start..end` every `step` elements; bounds clamp to the axis
    Range {
        start: usize,
        end: Option<usize>,
        step: usize,
    },
    /// Keep the whole axis
    Full,
}

impl AxisSlice {
    /// `range` taking every `step`-th element
    pub fn stepped(range: Range<usize>, step: usize) -> Self {
        AxisSlice::Range {
            start: range.start,
            end: Some(range.end),
            step,
        }
    }
}

impl From<usize> for AxisSlice {
    fn from(index: usize) -> Self {
        AxisSlice::Index(index)
    }
}

impl From<Range<usize>> for AxisSlice {
    fn from(range: Range<usize>) -> Self {
        AxisSlice::stepped(range, 1)
    }
}

impl From<RangeFrom<usize>> for AxisSlice {
    fn from(range: RangeFrom<usize>) -> Self {
        AxisSlice::Range {
            start: range.start,
            end: None,
            step: 1,
        }
    }
}

impl From<RangeTo<usize>> for AxisSlice {
    fn from(range: RangeTo<usize>) -> Self {
        AxisSlice::stepped(0..range.end, 1)
    }
}

impl From<RangeFull> for AxisSlice {
    fn from(_: RangeFull) -> Self {
        AxisSlice::Full
    }
}

/// Pointer, dims and element strides of a view, without a borrow.
///
/// Pools keep these per slot and bind them to their own lifetime on access.
#[derive(Debug, Clone)]
pub(crate) struct RawView<T> {
    ptr: NonNull<T>,
    dims: Vec<usize>,
    strides: Vec<usize>,
}

unsafe impl<T: Element> Send for RawView<T> {}
unsafe impl<T: Element> Sync for RawView<T> {}

impl<T: Element> RawView<T> {
    pub(crate) fn new(buffer: &SharedBuffer, shape: Option<&Shape>, order: Order) -> Result<Self> {
        let ptr = buffer.typed_ptr::<T>()?;
        let dims = match shape {
            Some(shape) => shape.dims().to_vec(),
            None => vec![buffer.len()],
        };
        if element_count(&dims) != Some(buffer.len()) {
            return Err(ShmPoolError::shape_mismatch(&dims, buffer.len()));
        }
        let strides = strides_for(&dims, order);
        Ok(Self { ptr, dims, strides })
    }

    /// Bind to a lifetime.
    ///
    /// Callers pick `'a` no longer than the buffer this view was built from.
    pub(crate) fn bind<'a>(&self) -> View<'a, T> {
        View {
            raw: self.clone(),
            _buffer: PhantomData,
        }
    }
}

/// Shaped, typed, non-copying projection over a shared buffer.
///
/// See the [module docs](self) for the aliasing contract.
#[derive(Debug, Clone)]
pub struct View<'a, T: Element> {
    raw: RawView<T>,
    _buffer: PhantomData<&'a SharedBuffer>,
}

unsafe impl<T: Element> Send for View<'_, T> {}
unsafe impl<T: Element> Sync for View<'_, T> {}

/// Reinterpret `buffer` as a `T` array of `shape` laid out in `order`.
///
/// Without a shape the view is flat and spans the whole buffer. Fails with
/// `ShapeMismatch` unless `product(shape)` equals the buffer's element count,
/// and with `DtypeMismatch` unless `T` is the buffer's dtype.
pub fn as_view<'a, T: Element>(
    buffer: &'a SharedBuffer,
    shape: Option<&Shape>,
    order: Order,
) -> Result<View<'a, T>> {
    RawView::new(buffer, shape, order).map(|raw| raw.bind())
}

impl<'a, T: Element> View<'a, T> {
    /// Dimensions
    pub fn shape(&self) -> &[usize] {
        &self.raw.dims
    }

    /// Element strides per axis
    pub fn strides(&self) -> &[usize] {
        &self.raw.strides
    }

    /// Number of axes
    pub fn ndim(&self) -> usize {
        self.raw.dims.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.raw.dims.iter().product()
    }

    /// True when some axis has length zero
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pointer to the element at the origin of the view
    pub fn as_ptr(&self) -> *const T {
        self.raw.ptr.as_ptr()
    }

    fn offset_of(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.raw.dims.len() {
            return None;
        }
        let mut offset = 0usize;
        for ((&i, &dim), &stride) in index.iter().zip(&self.raw.dims).zip(&self.raw.strides) {
            if i >= dim {
                return None;
            }
            offset += i * stride;
        }
        Some(offset)
    }

    /// Element at `index`, or `None` outside the view
    pub fn get(&self, index: &[usize]) -> Option<T> {
        let offset = self.offset_of(index)?;
        Some(unsafe { self.raw.ptr.as_ptr().add(offset).read() })
    }

    /// Store `value` at `index`
    pub fn set(&mut self, index: &[usize], value: T) -> Result<()> {
        let offset = self
            .offset_of(index)
            .ok_or_else(|| ShmPoolError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.raw.dims.clone(),
            })?;
        unsafe { self.raw.ptr.as_ptr().add(offset).write(value) };
        Ok(())
    }

    /// Set every element to `value`
    pub fn fill(&mut self, value: T) {
        self.as_array_mut().fill(value);
    }

    /// Copy `src` into the view in logical (row-major) order
    pub fn copy_from_slice(&mut self, src: &[T]) -> Result<()> {
        if src.len() != self.len() {
            return Err(ShmPoolError::shape_mismatch(&self.raw.dims, src.len()));
        }
        for (dst, &value) in self.as_array_mut().iter_mut().zip(src) {
            *dst = value;
        }
        Ok(())
    }

    /// Copy the elements out in logical (row-major) order
    pub fn to_vec(&self) -> Vec<T> {
        self.as_array().iter().copied().collect()
    }

    /// Borrow as an `ndarray` view
    pub fn as_array(&self) -> ArrayViewD<'_, T> {
        let shape = IxDyn(&self.raw.dims).strides(IxDyn(&self.raw.strides));
        unsafe { ArrayViewD::from_shape_ptr(shape, self.raw.ptr.as_ptr() as *const T) }
    }

    /// Borrow as a mutable `ndarray` view
    pub fn as_array_mut(&mut self) -> ArrayViewMutD<'_, T> {
        let shape = IxDyn(&self.raw.dims).strides(IxDyn(&self.raw.strides));
        unsafe { ArrayViewMutD::from_shape_ptr(shape, self.raw.ptr.as_ptr()) }
    }

    /// Sub-view selected by one [`AxisSlice`] per leading axis.
    ///
    /// Axes without a selector are kept whole.
    pub fn slice(&self, selectors: &[AxisSlice]) -> Result<View<'a, T>> {
        if selectors.len() > self.ndim() {
            return Err(ShmPoolError::invalid_parameter(
                "indices",
                format!(
                    "{} selectors for a {}-dimensional view",
                    selectors.len(),
                    self.ndim()
                ),
            ));
        }

        let mut offset = 0usize;
        let mut dims = Vec::with_capacity(self.ndim());
        let mut strides = Vec::with_capacity(self.ndim());

        for (axis, (&dim, &stride)) in self.raw.dims.iter().zip(&self.raw.strides).enumerate() {
            match selectors.get(axis).copied().unwrap_or(AxisSlice::Full) {
                AxisSlice::Index(i) => {
                    if i >= dim {
                        let mut index = vec![0; axis];
                        index.push(i);
                        return Err(ShmPoolError::IndexOutOfBounds {
                            index,
                            shape: self.raw.dims.clone(),
                        });
                    }
                    offset += i * stride;
                }
                AxisSlice::Full => {
                    dims.push(dim);
                    strides.push(stride);
                }
                AxisSlice::Range { start, end, step } => {
                    if step == 0 {
                        return Err(ShmPoolError::invalid_parameter(
                            "indices",
                            "slice step must be at least 1",
                        ));
                    }
                    let end = end.unwrap_or(dim).min(dim);
                    let start = start.min(end);
                    let count = (end - start).div_ceil(step);
                    if count > 0 {
                        offset += start * stride;
                    }
                    dims.push(count);
                    strides.push(stride * step);
                }
            }
        }

        let ptr = unsafe { NonNull::new_unchecked(self.raw.ptr.as_ptr().add(offset)) };
        Ok(View {
            raw: RawView { ptr, dims, strides },
            _buffer: PhantomData,
        })
    }

    /// Sub-view of the first `len` positions along the leading axis
    pub fn truncate(&self, len: usize) -> Result<View<'a, T>> {
        match self.raw.dims.first() {
            None => Err(ShmPoolError::invalid_parameter(
                "length",
                "cannot truncate a rank-0 view",
            )),
            Some(&capacity) if len > capacity => Err(ShmPoolError::invalid_parameter(
                "length",
                format!("length {} exceeds leading dimension {}", len, capacity),
            )),
            Some(_) => self.slice(&[AxisSlice::from(0..len)]),
        }
    }
}
