use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use drepl_error::DreplResult;
use drepl_io::{Dispatcher, Replica};
use drepl_metrics::DreplMetrics;
use itertools::Itertools;

use crate::{
    Backing, Block, BlockId, BlockKind, Edge, ReplicaId, ReplicationOptions, View, ViewId,
};

/// The views of one dataset variable, one top-level block per view.
#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) name: Arc<str>,
    pub(crate) blocks: Vec<BlockId>,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }
}

/// A connected block graph over a set of views and the replicas that store them.
///
/// The topology is fixed once built; only replica bytes change afterwards. Reads and writes go
/// through [`BlockGraph::read`] and [`BlockGraph::write`] on the top-level blocks returned by
/// [`BlockGraph::search`].
pub struct BlockGraph {
    pub(crate) blocks: Vec<Block>,
    pub(crate) views: Vec<View>,
    pub(crate) replicas: Vec<Replica>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) options: ReplicationOptions,
    pub(crate) dispatcher: Option<Dispatcher>,
    pub(crate) metrics: DreplMetrics,
}

impl BlockGraph {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(idx, block)| (BlockId::from(idx as u32), block))
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn view(&self, id: ViewId) -> &View {
        &self.views[id.index()]
    }

    pub fn views(&self) -> impl Iterator<Item = (ViewId, &View)> {
        self.views
            .iter()
            .enumerate()
            .map(|(idx, view)| (ViewId::from(idx as u32), view))
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn view_by_name(&self, name: &str) -> Option<ViewId> {
        self.views()
            .find(|(_, view)| view.name() == name)
            .map(|(id, _)| id)
    }

    pub fn replica(&self, id: ReplicaId) -> &Replica {
        &self.replicas[id.index()]
    }

    pub fn replicas(&self) -> impl Iterator<Item = (ReplicaId, &Replica)> {
        self.replicas
            .iter()
            .enumerate()
            .map(|(idx, replica)| (ReplicaId::from(idx as u32), replica))
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn options(&self) -> &ReplicationOptions {
        &self.options
    }

    pub fn metrics(&self) -> &DreplMetrics {
        &self.metrics
    }

    /// The top-level blocks of `view` overlapping `[offset, offset + len)`.
    pub fn search(&self, view: ViewId, offset: u64, len: u64) -> &[BlockId] {
        let view = self.view(view);
        &view.blocks()[view.search(offset, len)]
    }

    /// The replica storing `view` and the view's offset in it.
    pub(crate) fn placement(&self, view: ViewId) -> Option<(&Replica, u64)> {
        match self.view(view).backing() {
            Backing::Materialized { replica, offset } => Some((self.replica(replica), offset)),
            Backing::Default(_) => None,
        }
    }

    /// Blocks until detached replication submitted so far has finished.
    pub fn drain(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.wait_idle();
        }
    }

    /// Flushes the dirty range of every replica.
    pub fn sync(&self) -> DreplResult<()> {
        self.replicas.iter().try_for_each(Replica::sync)
    }

    /// Flushes the replica storing `view`; unmaterialized views have nothing to flush.
    pub fn sync_view(&self, view: ViewId) -> DreplResult<()> {
        match self.placement(view) {
            Some((replica, _)) => replica.sync(),
            None => Ok(()),
        }
    }

    fn fmt_edge(
        &self,
        f: &mut Formatter<'_>,
        indent: usize,
        arrow: &str,
        edge: &Edge,
    ) -> std::fmt::Result {
        let target = self.block(edge.target());
        write!(
            f,
            "{:indent$}{arrow} {} in '{}'",
            "",
            edge.target(),
            self.view(target.view()).name()
        )?;
        if !edge.maps().is_empty() {
            write!(f, " [{}]", edge.maps().iter().join(", "))?;
        }
        if let Some(element) = edge.element() {
            write!(f, " element {element}")?;
        }
        writeln!(f)
    }

    fn fmt_block(
        &self,
        f: &mut Formatter<'_>,
        indent: usize,
        label: &str,
        id: BlockId,
    ) -> std::fmt::Result {
        let block = self.block(id);
        write!(
            f,
            "{:indent$}{label}{id} {} @{} size {}",
            "",
            block.kind().name(),
            block.offset(),
            block.size()
        )?;
        match block.kind() {
            BlockKind::Scalar(ptype) => write!(f, " {ptype}")?,
            BlockKind::Array(array) => write!(
                f,
                " [{}] index [{}]",
                array.dims().iter().join(","),
                array.index().iter().join(", ")
            )?,
            BlockKind::Struct(_) => {}
        }
        if let Some(origin) = block.origin() {
            write!(f, " clone of {origin}")?;
        }
        writeln!(f)?;

        if let Some(source) = block.source() {
            self.fmt_edge(f, indent + 2, "<-", source)?;
        }
        for dest in block.dests() {
            self.fmt_edge(f, indent + 2, "->", dest)?;
        }
        match block.kind() {
            BlockKind::Scalar(_) => Ok(()),
            BlockKind::Array(array) => self.fmt_block(f, indent + 2, "element ", array.element()),
            BlockKind::Struct(st) => st
                .names()
                .iter()
                .zip(st.fields())
                .try_for_each(|(name, field)| {
                    self.fmt_block(f, indent + 2, &format!("{name}: "), *field)
                }),
        }
    }
}

impl Display for BlockGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (id, view) in self.views() {
            write!(f, "view '{}' {} {} bytes", view.name(), view.order(), view.size())?;
            match view.backing() {
                Backing::Materialized { replica, offset } => write!(
                    f,
                    " in replica '{}' at {offset}",
                    self.replica(replica).name()
                )?,
                Backing::Default(default) => {
                    write!(f, " unmaterialized, default '{}'", self.view(default).name())?
                }
            }
            if view.is_readonly() {
                write!(f, " readonly")?;
            }
            writeln!(f)?;
            for (block, variable) in view.blocks().iter().filter_map(|b| {
                self.variables
                    .iter()
                    .find(|v| v.blocks.contains(b))
                    .map(|v| (*b, v))
            }) {
                self.fmt_block(f, 2, &format!("{}: ", variable.name()), block)?;
            }
            if id.index() + 1 < self.views.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl Debug for BlockGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockGraph")
            .field("views", &self.views.len())
            .field("replicas", &self.replicas.len())
            .field("blocks", &self.blocks.len())
            .field("options", &self.options)
            .finish()
    }
}
