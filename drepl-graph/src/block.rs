use std::fmt::Display;
use std::ops::Deref;

use drepl_dtype::{FieldName, PType};

use crate::{AffineMap, ViewId};

/// Index of a [`Block`] in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl From<u32> for BlockId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Deref for BlockId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl BlockId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A link from one block to a block of another view.
///
/// Array edges carry one map per target dimension, each reading one dimension of the source
/// array, and a private element block whose single destination is the target's element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    target: BlockId,
    element: Option<BlockId>,
    maps: Vec<AffineMap>,
}

impl Edge {
    /// An edge without index translation, used by scalars and structs.
    pub fn to(target: BlockId) -> Self {
        Self {
            target,
            element: None,
            maps: Vec::new(),
        }
    }

    pub fn array(target: BlockId, element: BlockId, maps: Vec<AffineMap>) -> Self {
        Self {
            target,
            element: Some(element),
            maps,
        }
    }

    pub fn target(&self) -> BlockId {
        self.target
    }

    pub fn element(&self) -> Option<BlockId> {
        self.element
    }

    pub fn maps(&self) -> &[AffineMap] {
        &self.maps
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayBlock {
    pub(crate) dims: Vec<u64>,
    pub(crate) element: BlockId,
    pub(crate) element_size: u64,
    pub(crate) index: Vec<AffineMap>,
}

impl ArrayBlock {
    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    /// The element prototype shared by every element of the array.
    pub fn element(&self) -> BlockId {
        self.element
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Dataset index per dataset dimension as declared by the view.
    pub fn index(&self) -> &[AffineMap] {
        &self.index
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructBlock {
    pub(crate) names: Vec<FieldName>,
    pub(crate) fields: Vec<BlockId>,
}

impl StructBlock {
    pub fn names(&self) -> &[FieldName] {
        &self.names
    }

    pub fn fields(&self) -> &[BlockId] {
        &self.fields
    }

    pub fn find(&self, name: &str) -> Option<BlockId> {
        self.names
            .iter()
            .position(|n| n.as_ref() == name)
            .map(|idx| self.fields[idx])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Scalar(PType),
    Array(ArrayBlock),
    Struct(StructBlock),
}

impl BlockKind {
    pub fn name(&self) -> &'static str {
        match self {
            BlockKind::Scalar(_) => "scalar",
            BlockKind::Array(_) => "array",
            BlockKind::Struct(_) => "struct",
        }
    }
}

/// One contiguous region of a view's byte layout.
///
/// The offset is relative to the enclosing block, so a top-level block's offset is its position
/// in the view while a field's offset is its position inside the struct. Array elements are
/// described once, at offset zero, by the array's element prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub(crate) view: ViewId,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) kind: BlockKind,
    pub(crate) dests: Vec<Edge>,
    pub(crate) source: Option<Edge>,
    pub(crate) origin: Option<BlockId>,
}

impl Block {
    pub fn view(&self) -> ViewId {
        self.view
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn as_array(&self) -> Option<&ArrayBlock> {
        match &self.kind {
            BlockKind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructBlock> {
        match &self.kind {
            BlockKind::Struct(st) => Some(st),
            _ => None,
        }
    }

    /// Edges along which writes to this block propagate.
    pub fn dests(&self) -> &[Edge] {
        &self.dests
    }

    /// Where an unmaterialized block reads its bytes from.
    pub fn source(&self) -> Option<&Edge> {
        self.source.as_ref()
    }

    /// The block this one was cloned from.
    pub fn origin(&self) -> Option<BlockId> {
        self.origin
    }
}
