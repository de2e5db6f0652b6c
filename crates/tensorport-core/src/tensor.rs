use bytes::Bytes;
use half::f16;
use smallvec::SmallVec;

use crate::{CodecError, CodecResult, DType};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }

    /// Converts a wire shape; negative dimensions are rejected.
    pub fn from_wire(dims: &[i64]) -> CodecResult<Self> {
        dims.iter()
            .map(|d| {
                usize::try_from(*d).map_err(|_| {
                    CodecError::MalformedTensor(format!("negative dimension {d} in shape {dims:?}"))
                })
            })
            .collect::<CodecResult<SmallVec<_>>>()
            .map(Self)
    }

    pub fn to_wire(&self) -> Vec<i64> {
        self.0.iter().map(|d| *d as i64).collect()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Element count. A rank-0 shape holds one element. Fails when the
    /// product does not fit in `usize`.
    pub fn numel(&self) -> CodecResult<usize> {
        if self.0.contains(&0) {
            return Ok(0);
        }
        self.0
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d))
            .ok_or_else(|| {
                CodecError::MalformedTensor(format!(
                    "shape {:?} holds more elements than fit in memory",
                    self.0.as_slice()
                ))
            })
    }
}

impl From<&[usize]> for Shape {
    fn from(d: &[usize]) -> Self {
        Self::from_slice(d)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(d: [usize; N]) -> Self {
        Self::from_slice(&d)
    }
}

/// Flat, row-major element storage. The variant fixes the datatype.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Bytes(Vec<Bytes>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::Bool,
            TensorData::I8(_) => DType::I8,
            TensorData::I16(_) => DType::I16,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::U8(_) => DType::U8,
            TensorData::U16(_) => DType::U16,
            TensorData::U32(_) => DType::U32,
            TensorData::U64(_) => DType::U64,
            TensorData::F16(_) => DType::F16,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
            TensorData::Bytes(_) => DType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::I16(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::U16(v) => v.len(),
            TensorData::U32(v) => v.len(),
            TensorData::U64(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rust element types that map onto exactly one [`DType`].
pub trait Element: Sized + Clone {
    const DTYPE: DType;

    fn into_data(values: Vec<Self>) -> TensorData;
    fn view(data: &TensorData) -> Option<&[Self]>;
}

macro_rules! element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_data(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }

            fn view(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

element!(bool, Bool);
element!(i8, I8);
element!(i16, I16);
element!(i32, I32);
element!(i64, I64);
element!(u8, U8);
element!(u16, U16);
element!(u32, U32);
element!(u64, U64);
element!(f16, F16);
element!(f32, F32);
element!(f64, F64);
element!(Bytes, Bytes);

#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: TensorData,
}

impl Tensor {
    /// Fails when the element count disagrees with `shape`.
    pub fn new(shape: Shape, data: TensorData) -> CodecResult<Self> {
        let expected = shape.numel()?;
        if data.len() != expected {
            return Err(CodecError::MalformedTensor(format!(
                "{} {} elements do not fill shape {:?} ({expected} elements)",
                data.len(),
                data.dtype(),
                shape.dims(),
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_vec<T: Element>(shape: impl Into<Shape>, values: Vec<T>) -> CodecResult<Self> {
        Self::new(shape.into(), T::into_data(values))
    }

    /// Builds a BYTES tensor from anything byte-like.
    pub fn from_byte_strings<I, B>(shape: impl Into<Shape>, items: I) -> CodecResult<Self>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let values = items
            .into_iter()
            .map(|b| Bytes::copy_from_slice(b.as_ref()))
            .collect();
        Self::new(shape.into(), TensorData::Bytes(values))
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(&self.data)
    }

    pub fn into_parts(self) -> (Shape, TensorData) {
        (self.shape, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numel_follows_plain_product() {
        assert_eq!(Shape::from_slice(&[]).numel().unwrap(), 1);
        assert_eq!(Shape::from_slice(&[2, 3]).numel().unwrap(), 6);
        assert_eq!(Shape::from_slice(&[4, 0, 2]).numel().unwrap(), 0);
    }

    #[test]
    fn numel_rejects_overflowing_shapes() {
        let huge = Shape::from_slice(&[1 << 32, 1 << 32, 2]);
        assert!(matches!(huge.numel(), Err(CodecError::MalformedTensor(_))));
        assert_eq!(Shape::from_slice(&[usize::MAX, 2, 0]).numel().unwrap(), 0);
        assert!(Tensor::from_vec(huge, Vec::<f32>::new()).is_err());
    }

    #[test]
    fn wire_shape_rejects_negative_dims() {
        assert_eq!(Shape::from_wire(&[1, 16]).unwrap(), Shape::from([1, 16]));
        assert!(matches!(
            Shape::from_wire(&[1, -1]),
            Err(CodecError::MalformedTensor(_))
        ));
    }

    #[test]
    fn tensor_rejects_mismatched_element_count() {
        let err = Tensor::from_vec([2, 2], vec![1.0f32, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedTensor(_)));
    }

    #[test]
    fn typed_view_matches_variant_only() {
        let t = Tensor::from_vec([3], vec![1i64, 2, 3]).unwrap();
        assert_eq!(t.dtype(), DType::I64);
        assert_eq!(t.as_slice::<i64>(), Some(&[1i64, 2, 3][..]));
        assert!(t.as_slice::<i32>().is_none());
    }
}
