use std::fmt::Display;
use std::ops::{Deref, Range};
use std::sync::Arc;

use drepl_dtype::MAX_BYTE_SIZE;
use drepl_error::{DreplResult, drepl_bail};

use crate::{BlockId, ElementOrder};

/// Index of a [`View`] in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(u32);

impl From<u32> for ViewId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Deref for ViewId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ViewId({})", self.0)
    }
}

impl ViewId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a replica in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaId(u32);

impl From<u32> for ReplicaId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Deref for ReplicaId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReplicaId({})", self.0)
    }
}

impl ReplicaId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a view's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Stored in a replica starting at `offset`.
    Materialized { replica: ReplicaId, offset: u64 },
    /// Synthesized on demand from the materialized default view.
    Default(ViewId),
}

/// A named layout of the dataset: an ordered run of top-level blocks.
#[derive(Debug, Clone)]
pub struct View {
    pub(crate) name: Arc<str>,
    pub(crate) order: ElementOrder,
    pub(crate) readonly: bool,
    pub(crate) backing: Backing,
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) offsets: Vec<u64>,
    pub(crate) size: u64,
}

impl View {
    pub(crate) fn new(
        name: Arc<str>,
        order: ElementOrder,
        readonly: bool,
        backing: Backing,
    ) -> Self {
        Self {
            name,
            order,
            readonly,
            backing,
            blocks: Vec::new(),
            offsets: Vec::new(),
            size: 0,
        }
    }

    /// Appends a top-level block, returning its offset in the view.
    pub(crate) fn push(&mut self, block: BlockId, size: u64) -> DreplResult<u64> {
        let offset = self.size;
        let Some(end) = offset.checked_add(size).filter(|end| *end <= MAX_BYTE_SIZE) else {
            drepl_bail!(
                Configuration: "view '{}' is larger than {MAX_BYTE_SIZE} bytes",
                self.name
            );
        };
        self.blocks.push(block);
        self.offsets.push(offset);
        self.size = end;
        Ok(offset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> ElementOrder {
        self.order
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.backing, Backing::Materialized { .. })
    }

    /// The view unmaterialized reads come from.
    pub fn default_view(&self) -> Option<ViewId> {
        match self.backing {
            Backing::Default(view) => Some(view),
            Backing::Materialized { .. } => None,
        }
    }

    /// Top-level blocks in offset order.
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Positions in [`View::blocks`] of the blocks overlapping `[offset, offset + len)`.
    ///
    /// Top-level blocks are contiguous and sorted, so both ends are found by binary search.
    pub fn search(&self, offset: u64, len: u64) -> Range<usize> {
        if len == 0 || offset >= self.size {
            return 0..0;
        }
        let end = offset.saturating_add(len);
        let first = self.offsets.partition_point(|o| *o <= offset) - 1;
        let last = self.offsets.partition_point(|o| *o < end);
        first..last
    }

    pub(crate) fn is_top_level(&self, block: BlockId) -> bool {
        // top-level ids are allocated in increasing order per view
        self.blocks.binary_search(&block).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn view() -> View {
        let mut view = View::new(
            "v".into(),
            ElementOrder::RowMajor,
            false,
            Backing::Materialized {
                replica: ReplicaId::from(0),
                offset: 0,
            },
        );
        for (id, size) in [(0, 10), (3, 15), (7, 15), (9, 15)] {
            view.push(BlockId::from(id), size).unwrap();
        }
        view
    }

    #[rstest]
    #[case(12, 5, 1..2)]
    #[case(40, 20, 3..4)]
    #[case(0, 55, 0..4)]
    #[case(9, 2, 0..2)]
    #[case(10, 15, 1..2)]
    #[case(24, 1, 1..2)]
    #[case(54, 100, 3..4)]
    #[case(55, 1, 0..0)]
    #[case(3, 0, 0..0)]
    fn search_overlapping(#[case] offset: u64, #[case] len: u64, #[case] expected: Range<usize>) {
        assert_eq!(view().search(offset, len), expected);
    }

    #[test]
    fn search_starts() {
        let view = view();
        assert_eq!(view.offsets, vec![0, 10, 25, 40]);
        assert_eq!(view.size(), 55);
        assert_eq!(&view.blocks()[view.search(12, 5)], &[BlockId::from(3)]);
        assert!(view.is_top_level(BlockId::from(7)));
        assert!(!view.is_top_level(BlockId::from(8)));
    }

    #[test]
    fn oversized_view_rejected() {
        let mut view = view();
        assert!(view.push(BlockId::from(10), MAX_BYTE_SIZE).is_err());
        assert_eq!(view.size(), 55);
        assert_eq!(view.blocks().len(), 4);
    }
}
