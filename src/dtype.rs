//! Element types and the storage words that back them
//!
//! Every logical element type a pool can hold is paired with the raw word
//! used to lay it out in shared storage. The pairing lives in one immutable
//! table, [`DTYPE_TABLE`]; supporting a new type means adding an entry there
//! and an [`Element`] impl, never mutating anything at runtime.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShmPoolError};

/// Logical element type of a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 64-bit IEEE 754 floating point.
    F64,
}

/// Raw word layout used for one element in shared storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageWord {
    /// C `float`
    CFloat,
    /// C `double`
    CDouble,
}

/// One row of the dtype table.
#[derive(Debug)]
pub struct DtypeEntry {
    pub dtype: DType,
    pub word: StorageWord,
    /// Single-character storage typecode
    pub typecode: char,
    /// Names accepted by [`DType::from_name`]
    pub names: &'static [&'static str],
}

/// The registered element types.
pub static DTYPE_TABLE: [DtypeEntry; 2] = [
    DtypeEntry {
        dtype: DType::F32,
        word: StorageWord::CFloat,
        typecode: 'f',
        names: &["float32", "f32", "f4", "float"],
    },
    DtypeEntry {
        dtype: DType::F64,
        word: StorageWord::CDouble,
        typecode: 'd',
        names: &["float64", "f64", "f8", "double"],
    },
];

fn entry_for(dtype: DType) -> &'static DtypeEntry {
    match dtype {
        DType::F32 => &DTYPE_TABLE[0],
        DType::F64 => &DTYPE_TABLE[1],
    }
}

impl DType {
    /// Storage word backing this element type
    pub fn storage_word(self) -> StorageWord {
        entry_for(self).word
    }

    /// Size of one element in bytes
    pub fn size_bytes(self) -> usize {
        self.storage_word().size_bytes()
    }

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        entry_for(self).names[0]
    }

    /// Look up a logical type by name (`"float32"`, `"f8"`, ...)
    pub fn from_name(name: &str) -> Result<Self> {
        let needle = name.trim().to_ascii_lowercase();
        DTYPE_TABLE
            .iter()
            .find(|entry| entry.names.contains(&needle.as_str()))
            .map(|entry| entry.dtype)
            .ok_or_else(|| ShmPoolError::unsupported_dtype(name))
    }

    /// Logical type stored in `word`
    pub fn from_storage_word(word: StorageWord) -> Result<Self> {
        DTYPE_TABLE
            .iter()
            .find(|entry| entry.word == word)
            .map(|entry| entry.dtype)
            .ok_or_else(|| ShmPoolError::unsupported_dtype(format!("{word:?}")))
    }

    /// Logical type for a single-character storage typecode
    pub fn from_typecode(code: char) -> Result<Self> {
        StorageWord::from_typecode(code).and_then(Self::from_storage_word)
    }
}

impl StorageWord {
    /// Size of the word in bytes
    pub fn size_bytes(self) -> usize {
        match self {
            StorageWord::CFloat => std::mem::size_of::<f32>(),
            StorageWord::CDouble => std::mem::size_of::<f64>(),
        }
    }

    /// Required alignment of the word in bytes
    pub fn align(self) -> usize {
        match self {
            StorageWord::CFloat => std::mem::align_of::<f32>(),
            StorageWord::CDouble => std::mem::align_of::<f64>(),
        }
    }

    /// Parse a single-character typecode
    pub fn from_typecode(code: char) -> Result<Self> {
        DTYPE_TABLE
            .iter()
            .find(|entry| entry.typecode == code)
            .map(|entry| entry.word)
            .ok_or_else(|| ShmPoolError::unsupported_dtype(format!("typecode '{code}'")))
    }

    /// Typecode of this word
    pub fn typecode(self) -> char {
        DTYPE_TABLE
            .iter()
            .find(|entry| entry.word == self)
            .map(|entry| entry.typecode)
            .unwrap_or('?')
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = ShmPoolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Rust types that can be viewed in place over shared storage.
///
/// Sealed: the set of implementors mirrors [`DTYPE_TABLE`].
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static + sealed::Sealed {
    /// Logical dtype of this element type
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
}
