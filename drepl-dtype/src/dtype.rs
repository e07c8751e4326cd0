use std::fmt::{Display, Formatter};
use std::sync::Arc;

use drepl_error::{DreplResult, drepl_bail};
use itertools::Itertools;

use crate::{PType, StructDType};

/// A name for a field in a struct
pub type FieldName = Arc<str>;

/// Largest byte size of any type, so that sizes and offsets fit signed 64-bit records.
pub const MAX_BYTE_SIZE: u64 = i64::MAX as u64;

/// The type of one dataset variable, or of one component of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    /// A fixed-width scalar
    Primitive(PType),
    /// A fixed-extent, possibly multi-dimensional array
    Array(Arc<ArrayDType>),
    /// An ordered list of named fields, laid out back to back
    Struct(StructDType),
}

impl DType {
    /// A fixed-length string of `len` characters, stored as `len + 1` signed bytes.
    pub fn string(len: u64) -> DreplResult<Self> {
        let Some(extent) = len.checked_add(1) else {
            drepl_bail!(Configuration: "string length {len} is too large");
        };
        Ok(DType::Array(Arc::new(ArrayDType::try_new(
            vec![extent],
            DType::Primitive(PType::I8),
        )?)))
    }

    /// Number of bytes one value of this type occupies.
    pub fn byte_size(&self) -> u64 {
        match self {
            DType::Primitive(ptype) => ptype.byte_width(),
            DType::Array(array) => array.byte_size(),
            DType::Struct(st) => st.byte_size(),
        }
    }

    /// Returns the array type if this is an array.
    pub fn as_array(&self) -> Option<&ArrayDType> {
        match self {
            DType::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Returns the struct type if this is a struct.
    pub fn as_struct(&self) -> Option<&StructDType> {
        match self {
            DType::Struct(st) => Some(st),
            _ => None,
        }
    }

    /// A short name of the kind of type, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DType::Primitive(_) => "scalar",
            DType::Array(_) => "array",
            DType::Struct(_) => "struct",
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::Primitive(ptype) => write!(f, "{ptype}"),
            DType::Array(array) => {
                write!(f, "[{}]{}", array.dims().iter().join(","), array.element())
            }
            DType::Struct(st) => write!(
                f,
                "{{{}}}",
                st.names()
                    .iter()
                    .zip(st.fields())
                    .map(|(n, dt)| format!("{n}: {dt}"))
                    .join(", ")
            ),
        }
    }
}

/// Shape and element type of an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayDType {
    dims: Vec<u64>,
    element: DType,
}

impl ArrayDType {
    /// Creates an array type, rejecting empty shapes and zero extents.
    pub fn try_new(dims: Vec<u64>, element: DType) -> DreplResult<Self> {
        if dims.is_empty() {
            drepl_bail!(Configuration: "array must have at least one dimension");
        }
        if let Some(pos) = dims.iter().position(|d| *d == 0) {
            drepl_bail!(Configuration: "array dimension {pos} has zero extent");
        }
        if element.byte_size() == 0 {
            drepl_bail!(Configuration: "array element {element} has zero size");
        }
        let size = dims
            .iter()
            .try_fold(element.byte_size(), |size, d| size.checked_mul(*d))
            .filter(|size| *size <= MAX_BYTE_SIZE);
        if size.is_none() {
            drepl_bail!(
                Configuration: "array [{}] of {element} is larger than {MAX_BYTE_SIZE} bytes",
                dims.iter().join(",")
            );
        }
        Ok(Self { dims, element })
    }

    /// Extent of each dimension.
    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Type of one element.
    pub fn element(&self) -> &DType {
        &self.element
    }

    /// Product of all extents.
    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Size of the whole array in bytes.
    pub fn byte_size(&self) -> u64 {
        self.element_count() * self.element.byte_size()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn point() -> DType {
        DType::Struct(
            StructDType::try_new(
                vec!["x".into(), "y".into()],
                vec![DType::Primitive(PType::F64), DType::Primitive(PType::F32)],
            )
            .unwrap(),
        )
    }

    #[rstest]
    #[case(DType::Primitive(PType::I16), 2)]
    #[case(point(), 12)]
    #[case(DType::Array(Arc::new(ArrayDType::try_new(vec![4, 3], point()).unwrap())), 144)]
    #[case(DType::string(15).unwrap(), 16)]
    fn byte_sizes(#[case] dtype: DType, #[case] size: u64) {
        assert_eq!(dtype.byte_size(), size);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![4, 0])]
    #[case(vec![1 << 33, 1 << 33])]
    #[case(vec![u64::MAX, 2])]
    fn invalid_shapes(#[case] dims: Vec<u64>) {
        assert!(ArrayDType::try_new(dims, DType::Primitive(PType::U8)).is_err());
    }

    #[test]
    fn display() {
        let array = DType::Array(Arc::new(ArrayDType::try_new(vec![2, 3], point()).unwrap()));
        assert_eq!(array.to_string(), "[2,3]{x: float64, y: float32}");
    }
}
