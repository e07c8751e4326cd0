use std::fmt::{Display, Formatter};
use std::sync::Arc;

use drepl_error::{DreplResult, drepl_bail};
use drepl_graph::{BlockGraph, View, ViewId, WriteFlags};

/// Byte-range access to one view of a graph, as a file over the view's bytes.
///
/// Ranges are clamped to the view's length. Each range is split over the top-level blocks it
/// covers and every block moves its own part, so a write to a view reaches all the views its
/// variables replicate to.
#[derive(Debug, Clone)]
pub struct ViewFile {
    graph: Arc<BlockGraph>,
    view: ViewId,
}

impl ViewFile {
    pub(crate) fn new(graph: Arc<BlockGraph>, view: ViewId) -> Self {
        Self { graph, view }
    }

    pub fn id(&self) -> ViewId {
        self.view
    }

    pub fn view(&self) -> &View {
        self.graph.view(self.view)
    }

    pub fn name(&self) -> &str {
        self.view().name()
    }

    pub fn len(&self) -> u64 {
        self.view().size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the part of `[offset, offset + len)` inside the view.
    fn clamp(&self, offset: u64, len: usize) -> usize {
        let room = self.len().saturating_sub(offset);
        usize::try_from(room).map_or(len, |room| room.min(len))
    }

    /// Reads up to `buf.len()` bytes at `offset`, returning how many were read.
    ///
    /// Reading at or past the end of the view reads nothing.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> DreplResult<usize> {
        let len = self.clamp(offset, buf.len());
        let mut done = 0;
        for block in self.graph.search(self.view, offset, len as u64) {
            if done == len {
                break;
            }
            let base = self.graph.block(*block).offset();
            let n = self
                .graph
                .read(*block, &mut buf[done..len], offset + done as u64, base)?;
            done += n;
        }
        Ok(done)
    }

    /// Writes `data` at `offset` and replicates it, returning how many bytes were accepted.
    ///
    /// Writing stops at the end of the view and at the last whole element of an array. A
    /// non-empty write inside the view that accepts nothing is an error.
    pub fn write(&self, offset: u64, data: &[u8]) -> DreplResult<usize> {
        let view = self.view();
        if view.is_readonly() {
            drepl_bail!("view '{}' is readonly", view.name());
        }
        let len = self.clamp(offset, data.len());
        let mut done = 0;
        for block in self.graph.search(self.view, offset, len as u64) {
            let b = self.graph.block(*block);
            let at = offset + done as u64;
            let n = self
                .graph
                .write(*block, &data[done..len], at, b.offset(), WriteFlags::ALL)?;
            done += n;
            if done == len || at + (n as u64) < b.end() {
                break;
            }
        }

        if done == 0 && len > 0 {
            drepl_bail!(
                Addressing: "short write to view '{}': none of {len} bytes at {offset} written",
                view.name()
            );
        }
        if self.graph.options().sync_on_write() {
            self.graph.sync_view(self.view)?;
        }
        Ok(done)
    }

    /// Flushes the replica storing this view.
    pub fn sync(&self) -> DreplResult<()> {
        self.graph.sync_view(self.view)
    }
}

impl Display for ViewFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.name(), self.len())
    }
}
