pub mod codec;
pub mod json;

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::TensorError;

/// Maximum number of tensor dimensions.
pub const MAX_NDIMS: usize = 32;

/// Named tensors of one request or response. Ordered by name so the wire
/// encoding is deterministic.
pub type TensorMap = BTreeMap<String, Tensor>;

/// Tensor element types. Tags follow the ONNX `TensorProto.DataType` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DType {
    F32 = 1,
    U8 = 2,
    I8 = 3,
    U16 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    Bool = 9,
    F64 = 11,
    U32 = 12,
    U64 = 13,
}

impl DType {
    pub const ALL: [DType; 11] = [
        DType::F32,
        DType::U8,
        DType::I8,
        DType::U16,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::Bool,
        DType::F64,
        DType::U32,
        DType::U64,
    ];

    pub fn from_u8(v: u8) -> Result<Self, TensorError> {
        Self::ALL
            .into_iter()
            .find(|d| *d as u8 == v)
            .ok_or(TensorError::UnknownDType(v))
    }

    /// Size in bytes of one element of this dtype.
    pub const fn element_size(self) -> usize {
        match self {
            DType::U8 | DType::I8 | DType::Bool => 1,
            DType::U16 | DType::I16 => 2,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::F64 | DType::I64 | DType::U64 => 8,
        }
    }

    /// numpy-style name, as used in the JSON tensor form.
    pub const fn name(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Bool => "bool",
            DType::F64 => "float64",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, TensorError> {
        Self::ALL
            .into_iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| TensorError::UnsupportedType(name.to_string()))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that map onto a [`DType`].
pub trait Element: Copy + sealed::Sealed {
    const DTYPE: DType;

    fn put_le(self, buf: &mut BytesMut);

    /// Read one element from exactly `DTYPE.element_size()` bytes.
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! numeric_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                fn put_le(self, buf: &mut BytesMut) {
                    buf.put_slice(&self.to_le_bytes());
                }

                fn from_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

numeric_element! {
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
}

impl sealed::Sealed for bool {}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn put_le(self, buf: &mut BytesMut) {
        buf.put_u8(self as u8);
    }

    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A dense N-dimensional array in little-endian row-major layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<u32>,
    data: Bytes,
}

impl Tensor {
    /// Wrap raw little-endian data, checking it matches the shape and dtype.
    pub fn new(dtype: DType, shape: Vec<u32>, data: Bytes) -> Result<Self, TensorError> {
        if shape.len() > MAX_NDIMS {
            return Err(TensorError::TooManyDims(shape.len()));
        }
        let expected = expected_data_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(TensorError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn from_vec<T: Element>(shape: Vec<u32>, values: &[T]) -> Result<Self, TensorError> {
        let mut buf = BytesMut::with_capacity(values.len() * T::DTYPE.element_size());
        for &v in values {
            v.put_le(&mut buf);
        }
        Self::new(T::DTYPE, shape, buf.freeze())
    }

    /// Copy the elements out, failing if `T` is not this tensor's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::DTypeMismatch {
                actual: self.dtype.name(),
                requested: T::DTYPE.name(),
            });
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.element_size())
            .map(T::from_le)
            .collect())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn element_count(&self) -> usize {
        self.data.len() / self.dtype.element_size()
    }
}

pub(crate) fn expected_data_len(dtype: DType, shape: &[u32]) -> Result<usize, TensorError> {
    let elem_count = shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim as usize))
        .ok_or(TensorError::ShapeOverflow)?;
    elem_count
        .checked_mul(dtype.element_size())
        .ok_or(TensorError::ShapeOverflow)
}
