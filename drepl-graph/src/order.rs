use std::fmt::{Display, Formatter};

/// Rule for converting between a linear element index and a multi-index.
///
/// Row-major varies the last dimension fastest, row-minor varies the first dimension fastest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementOrder {
    #[default]
    RowMajor,
    RowMinor,
}

impl ElementOrder {
    /// Identifier used by the binary export.
    pub const fn id(&self) -> i32 {
        match self {
            ElementOrder::RowMajor => 1,
            ElementOrder::RowMinor => 2,
        }
    }

    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(ElementOrder::RowMajor),
            2 => Some(ElementOrder::RowMinor),
            _ => None,
        }
    }

    /// Linear index of the multi-index `idx` within an array of shape `dims`.
    pub fn from_idx(&self, idx: &[u64], dims: &[u64]) -> u64 {
        debug_assert_eq!(idx.len(), dims.len());
        match self {
            ElementOrder::RowMajor => idx
                .iter()
                .zip(dims)
                .fold(0, |n, (i, d)| n * d + i),
            ElementOrder::RowMinor => idx
                .iter()
                .zip(dims)
                .rev()
                .fold(0, |n, (i, d)| n * d + i),
        }
    }

    /// Writes the multi-index of linear index `n` into `idx`.
    pub fn to_idx(&self, mut n: u64, dims: &[u64], idx: &mut [u64]) {
        debug_assert_eq!(idx.len(), dims.len());
        match self {
            ElementOrder::RowMajor => {
                for (i, d) in idx.iter_mut().zip(dims).rev() {
                    *i = n % d;
                    n /= d;
                }
            }
            ElementOrder::RowMinor => {
                for (i, d) in idx.iter_mut().zip(dims) {
                    *i = n % d;
                    n /= d;
                }
            }
        }
    }
}

impl Display for ElementOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementOrder::RowMajor => write!(f, "row_major"),
            ElementOrder::RowMinor => write!(f, "row_minor"),
        }
    }
}
