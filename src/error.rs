//! Error types and handling for shmpool

use std::time::Duration;

use crate::dtype::DType;

/// Result type alias for shmpool operations
pub type Result<T> = std::result::Result<T, ShmPoolError>;

/// Errors raised by the shared buffer pools and the pieces they are built from
#[derive(Debug, thiserror::Error)]
pub enum ShmPoolError {
    /// The requested element type has no entry in the dtype table
    #[error("Unsupported dtype: {name}")]
    UnsupportedDtype { name: String },

    /// A declared shape does not cover the buffer's element count
    #[error("Shape mismatch: shape {shape:?} does not hold exactly {elements} elements")]
    ShapeMismatch { shape: Vec<usize>, elements: usize },

    /// No free slot became available before the deadline
    #[error("Timed out after {waited:?} waiting for a free slot")]
    Timeout { waited: Duration },

    /// A typed view was requested over a buffer of another dtype
    #[error("Dtype mismatch: buffer holds {actual}, view requested {expected}")]
    DtypeMismatch { expected: DType, actual: DType },

    /// Slot id outside `[0, slot_count)`
    #[error("Invalid slot {slot}: pool has {slot_count} slots")]
    InvalidSlot { slot: u32, slot_count: u32 },

    /// Reclaim of a slot nobody holds
    #[error("Slot {slot} is not checked out")]
    SlotNotCheckedOut { slot: u32 },

    /// The free list ring has no room left
    #[error("Free list full: capacity {capacity}")]
    QueueFull { capacity: usize },

    /// Element index outside the view
    #[error("Index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },

    /// Requested record length exceeds the allocated capacity
    #[error("Length {requested} exceeds capacity {capacity} of field '{field}'")]
    LengthOutOfRange {
        field: String,
        requested: usize,
        capacity: usize,
    },

    /// Local views have not been derived since the handles were attached
    #[error("Views not built: call rebuild_views() after attaching")]
    ViewsNotBuilt,

    /// The shared region does not contain a valid free list
    #[error("Corrupt free list region: {message}")]
    CorruptQueue { message: String },

    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Memory allocation or mapping failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl ShmPoolError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an unsupported dtype error
    pub fn unsupported_dtype(name: impl Into<String>) -> Self {
        Self::UnsupportedDtype { name: name.into() }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(shape: &[usize], elements: usize) -> Self {
        Self::ShapeMismatch {
            shape: shape.to_vec(),
            elements,
        }
    }

    /// Create a timeout error
    pub fn timeout(waited: Duration) -> Self {
        Self::Timeout { waited }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Create a corrupt queue error
    pub fn corrupt_queue(message: impl Into<String>) -> Self {
        Self::CorruptQueue {
            message: message.into(),
        }
    }

    /// True for the error a bounded `get_buffer` returns when the pool stays empty
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for ShmPoolError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}
