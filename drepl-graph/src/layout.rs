//! The shape of one variable inside one view.

use std::fmt::{Display, Formatter};

use drepl_dtype::{DType, FieldName, MAX_BYTE_SIZE, PType};
use drepl_error::{DreplResult, drepl_bail, drepl_err};
use itertools::Itertools;

use crate::AffineMap;

/// How a dataset variable is laid out in a particular view.
///
/// A layout mirrors the dataset type: arrays may change their extents, their dimension order and
/// which dataset elements they hold, structs may select and reorder fields. Element order itself
/// is a property of the view, not of the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Scalar(PType),
    Array(ArrayLayout),
    Struct(StructLayout),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayLayout {
    dims: Vec<u64>,
    index: Vec<AffineMap>,
    element: Box<Layout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    fields: Vec<(FieldName, Layout)>,
}

impl ArrayLayout {
    /// `index[n]` gives dataset index `n` as a function of one of the view dimensions.
    pub fn new(dims: Vec<u64>, index: Vec<AffineMap>, element: Layout) -> Self {
        Self {
            dims,
            index,
            element: Box::new(element),
        }
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn index(&self) -> &[AffineMap] {
        &self.index
    }

    pub fn element(&self) -> &Layout {
        &self.element
    }

    /// Product of the extents, saturating for layouts that failed validation.
    pub fn element_count(&self) -> u64 {
        self.dims.iter().fold(1, |n, d| n.saturating_mul(*d))
    }
}

impl StructLayout {
    pub fn new(fields: Vec<(FieldName, Layout)>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[(FieldName, Layout)] {
        &self.fields
    }
}

impl Layout {
    /// The layout that stores `dtype` exactly as the dataset declares it.
    pub fn identity(dtype: &DType) -> Self {
        match dtype {
            DType::Primitive(ptype) => Layout::Scalar(*ptype),
            DType::Array(array) => Layout::Array(ArrayLayout::new(
                array.dims().to_vec(),
                (0..array.rank()).map(AffineMap::identity).collect(),
                Layout::identity(array.element()),
            )),
            DType::Struct(st) => Layout::Struct(StructLayout::new(
                st.names()
                    .iter()
                    .zip(st.fields())
                    .map(|(name, field)| (name.clone(), Layout::identity(field)))
                    .collect(),
            )),
        }
    }

    /// Size in bytes. Exact for validated layouts, saturating otherwise.
    pub fn byte_size(&self) -> u64 {
        self.checked_byte_size().unwrap_or(u64::MAX)
    }

    /// Size in bytes, or `None` if it exceeds [`MAX_BYTE_SIZE`].
    pub fn checked_byte_size(&self) -> Option<u64> {
        match self {
            Layout::Scalar(ptype) => Some(ptype.byte_width()),
            Layout::Array(array) => array
                .dims
                .iter()
                .try_fold(array.element.checked_byte_size()?, |size, d| size.checked_mul(*d)),
            Layout::Struct(st) => st.fields.iter().try_fold(0u64, |size, (_, l)| {
                size.checked_add(l.checked_byte_size()?)
            }),
        }
        .filter(|size| *size <= MAX_BYTE_SIZE)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layout::Scalar(_) => "scalar",
            Layout::Array(_) => "array",
            Layout::Struct(_) => "struct",
        }
    }

    /// Checks that the layout can be turned into blocks and connected to other layouts of the
    /// same variable.
    ///
    /// Arrays need at least one non-zero extent, an element of non-zero size and one invertible
    /// index map per dimension whose view dimensions form a permutation of the array's own. No
    /// layout may be larger than [`MAX_BYTE_SIZE`].
    pub fn validate(&self) -> DreplResult<()> {
        match self {
            Layout::Scalar(_) => Ok(()),
            Layout::Array(array) => {
                if array.dims.is_empty() {
                    drepl_bail!(Configuration: "array must have at least one dimension");
                }
                if let Some(pos) = array.dims.iter().position(|d| *d == 0) {
                    drepl_bail!(Configuration: "array dimension {pos} has zero extent");
                }
                if array.index.len() != array.dims.len() {
                    drepl_bail!(
                        Structural: "rank mismatch: {} index expressions for {} dimensions",
                        array.index.len(),
                        array.dims.len()
                    );
                }
                let mut seen = vec![false; array.dims.len()];
                for (n, map) in array.index.iter().enumerate() {
                    let Some(dim) = map.dim().filter(|d| *d < seen.len()) else {
                        drepl_bail!(
                            Structural: "index {n} ({map}) does not read a view dimension below {}",
                            seen.len()
                        );
                    };
                    if std::mem::replace(&mut seen[dim], true) {
                        drepl_bail!(Structural: "view dimension v{dim} is used by two indices");
                    }
                    if map.inverse().is_none() {
                        drepl_bail!(Structural: "index {n} ({map}) is not invertible");
                    }
                }
                array
                    .element
                    .validate()
                    .map_err(|e| e.with_context("array element"))?;
                if array.element.byte_size() == 0 {
                    drepl_bail!(Configuration: "array element has zero size");
                }
                if self.checked_byte_size().is_none() {
                    drepl_bail!(
                        Configuration: "array [{}] of {} is larger than {MAX_BYTE_SIZE} bytes",
                        array.dims.iter().join(","),
                        array.element
                    );
                }
                Ok(())
            }
            Layout::Struct(st) => {
                if st.fields.is_empty() {
                    drepl_bail!(Configuration: "struct must have at least one field");
                }
                if let Some(dup) = st.fields.iter().map(|(n, _)| n).duplicates().next() {
                    drepl_bail!(Structural: "field '{dup}' declared twice");
                }
                for (name, field) in &st.fields {
                    field
                        .validate()
                        .map_err(|e| e.with_context(format!("field '{name}'")))?;
                }
                if self.checked_byte_size().is_none() {
                    drepl_bail!(Configuration: "struct is larger than {MAX_BYTE_SIZE} bytes");
                }
                Ok(())
            }
        }
    }

    /// Checks that the layout describes (part of) the dataset type `dtype`.
    ///
    /// The rank of an array must match the dataset's, and every struct field must exist in the
    /// dataset struct.
    pub fn check_against(&self, dtype: &DType) -> DreplResult<()> {
        match (self, dtype) {
            (Layout::Scalar(p), DType::Primitive(q)) if p == q => Ok(()),
            (Layout::Array(array), DType::Array(dt)) => {
                if array.index.len() != dt.rank() {
                    drepl_bail!(
                        Structural: "rank mismatch: dataset has {} dimensions, view declares {}",
                        dt.rank(),
                        array.index.len()
                    );
                }
                array
                    .element
                    .check_against(dt.element())
                    .map_err(|e| e.with_context("array element"))
            }
            (Layout::Struct(st), DType::Struct(dt)) => st.fields.iter().try_for_each(|(name, l)| {
                let field = dt
                    .field(name)
                    .ok_or_else(|| drepl_err!(Structural: "dataset has no field '{name}'"))?;
                l.check_against(field)
                    .map_err(|e| e.with_context(format!("field '{name}'")))
            }),
            _ => drepl_bail!(Structural: "view declares {self} for dataset type {dtype}"),
        }
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Layout::Scalar(ptype) => write!(f, "{ptype}"),
            Layout::Array(array) => write!(f, "[{}]{}", array.dims.iter().join(","), array.element),
            Layout::Struct(st) => write!(
                f,
                "{{{}}}",
                st.fields
                    .iter()
                    .map(|(n, l)| format!("{n}: {l}"))
                    .join(", ")
            ),
        }
    }
}
