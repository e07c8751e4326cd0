//! Construction of a [`BlockGraph`].
//!
//! Views are filled with one block tree per variable. When the graph is finished, every pair of
//! blocks belonging to the same variable is linked:
//!
//! * a block gets a destination edge to each block of a materialized view, unless its own view
//!   is read-only;
//! * a block of an unmaterialized view gets a source edge to the block of its default view.
//!
//! Array edges translate indices through maps derived from both views' index declarations. The
//! element prototype of an array is shared by all its elements, so every array edge carries a
//! private clone of the element connected to the target's element. Struct sources are private
//! clones of the default view's block connected to the reading block.

use std::path::PathBuf;
use std::sync::Arc;

use drepl_dtype::MAX_BYTE_SIZE;
use drepl_error::{DreplResult, drepl_bail, drepl_err};
use drepl_io::{Dispatcher, Replica};
use drepl_metrics::DreplMetrics;
use rustc_hash::FxHashMap;

use crate::graph::Variable;
use crate::{
    AffineMap, ArrayBlock, Backing, Block, BlockGraph, BlockId, BlockKind, Edge, ElementOrder,
    Layout, ReplicaId, ReplicationMode, ReplicationOptions, StructBlock, View, ViewId,
};

/// Where a replica keeps its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaStorage {
    /// A file, created if missing and resized to fit the replica's views.
    File(PathBuf),
    /// Anonymous memory, lost when the graph is dropped.
    Memory,
}

/// Where a view's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Stored in a replica, after the views already placed there.
    Replica(ReplicaId),
    /// Not stored; read from the given materialized view.
    Default(ViewId),
}

struct ReplicaDraft {
    name: Arc<str>,
    storage: ReplicaStorage,
    views: Vec<ViewId>,
}

pub struct GraphBuilder {
    options: ReplicationOptions,
    metrics: DreplMetrics,
    blocks: Vec<Block>,
    views: Vec<View>,
    replicas: Vec<ReplicaDraft>,
    variables: Vec<Variable>,
    variable_index: FxHashMap<Arc<str>, usize>,
}

impl GraphBuilder {
    pub fn new(options: ReplicationOptions) -> Self {
        Self {
            options,
            metrics: DreplMetrics::default(),
            blocks: Vec::new(),
            views: Vec::new(),
            replicas: Vec::new(),
            variables: Vec::new(),
            variable_index: FxHashMap::default(),
        }
    }

    /// Record metrics into `metrics` instead of a private registry.
    pub fn with_metrics(mut self, metrics: DreplMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn add_replica(
        &mut self,
        name: impl Into<Arc<str>>,
        storage: ReplicaStorage,
    ) -> DreplResult<ReplicaId> {
        let name = name.into();
        if self.replicas.iter().any(|r| r.name == name) {
            drepl_bail!(Structural: "replica '{name}' declared twice");
        }
        let id = ReplicaId::from(next_id(self.replicas.len())?);
        self.replicas.push(ReplicaDraft {
            name,
            storage,
            views: Vec::new(),
        });
        Ok(id)
    }

    pub fn add_view(
        &mut self,
        name: impl Into<Arc<str>>,
        order: ElementOrder,
        readonly: bool,
        placement: Placement,
    ) -> DreplResult<ViewId> {
        let name = name.into();
        if self.views.iter().any(|v| v.name == name) {
            drepl_bail!(Structural: "view '{name}' declared twice");
        }
        let id = ViewId::from(next_id(self.views.len())?);
        let backing = match placement {
            Placement::Replica(replica) => {
                let draft = self
                    .replicas
                    .get_mut(replica.index())
                    .ok_or_else(|| drepl_err!("view '{name}' placed in unknown {replica}"))?;
                draft.views.push(id);
                // the offset is known once every view of the replica is complete
                Backing::Materialized { replica, offset: 0 }
            }
            Placement::Default(default) => {
                let Some(dflt) = self.views.get(default.index()) else {
                    drepl_bail!("view '{name}' defaults to unknown {default}");
                };
                if !dflt.is_materialized() {
                    drepl_bail!(
                        Configuration: "view '{name}' defaults to '{}', which is not materialized",
                        dflt.name()
                    );
                }
                Backing::Default(default)
            }
        };
        self.views.push(View::new(name, order, readonly, backing));
        Ok(id)
    }

    /// Appends the block tree for `variable` laid out as `layout` to the end of `view`.
    ///
    /// The layout must be compatible with the layouts the variable already has: same kinds,
    /// same primitive types and same array ranks, for struct fields present in both. A view may
    /// hold several layouts of one variable, typically projections of disjoint struct fields.
    pub fn add_variable(
        &mut self,
        view: ViewId,
        variable: &str,
        layout: &Layout,
    ) -> DreplResult<BlockId> {
        let Some(view_name) = self.views.get(view.index()).map(|v| v.name.clone()) else {
            drepl_bail!("variable '{variable}' added to unknown {view}");
        };
        let context = || format!("view '{view_name}' / variable '{variable}'");

        layout.validate().map_err(|e| e.with_context(context()))?;

        let members = self
            .variable_index
            .get(variable)
            .map(|idx| self.variables[*idx].blocks.clone())
            .unwrap_or_default();

        let mark = self.blocks.len();
        let block = self.build(view, 0, layout)?;
        let placed = members
            .iter()
            .try_for_each(|other| self.check_compatible(*other, block))
            .and_then(|_| self.views[view.index()].push(block, layout.byte_size()));
        let offset = match placed {
            Ok(offset) => offset,
            Err(err) => {
                self.blocks.truncate(mark);
                return Err(err.with_context(context()));
            }
        };
        self.blocks[block.index()].offset = offset;

        match self.variable_index.get(variable) {
            Some(idx) => self.variables[*idx].blocks.push(block),
            None => {
                let name: Arc<str> = variable.into();
                self.variable_index.insert(name.clone(), self.variables.len());
                self.variables.push(Variable {
                    name,
                    blocks: vec![block],
                });
            }
        }
        Ok(block)
    }

    /// Places views in their replicas, opens the replicas and links the blocks of every
    /// variable.
    pub fn finish(mut self) -> DreplResult<Arc<BlockGraph>> {
        let drafts = std::mem::take(&mut self.replicas);
        let mut replicas = Vec::with_capacity(drafts.len());
        for (idx, draft) in drafts.into_iter().enumerate() {
            let replica = ReplicaId::from(next_id(idx)?);
            let mut len: u64 = 0;
            for view in &draft.views {
                let view = &mut self.views[view.index()];
                view.backing = Backing::Materialized {
                    replica,
                    offset: len,
                };
                len = len
                    .checked_add(view.size)
                    .filter(|len| *len <= MAX_BYTE_SIZE)
                    .ok_or_else(|| {
                        drepl_err!(
                            Configuration: "replica '{}' is larger than {MAX_BYTE_SIZE} bytes",
                            draft.name
                        )
                    })?;
            }
            let opened = match draft.storage {
                ReplicaStorage::File(path) => Replica::open(draft.name.clone(), path, len),
                ReplicaStorage::Memory => Replica::anonymous(draft.name.clone(), len),
            }
            .map_err(|e| e.with_context(format!("replica '{}'", draft.name)))?;
            replicas.push(opened);
        }

        for variable in std::mem::take(&mut self.variables) {
            for (i, b1) in variable.blocks.iter().enumerate() {
                for b2 in &variable.blocks[i + 1..] {
                    self.link(*b1, *b2)
                        .and_then(|_| self.link(*b2, *b1))
                        .map_err(|e| e.with_context(format!("variable '{}'", variable.name)))?;
                }
            }
            self.variables.push(variable);
        }

        let dispatcher = match self.options.mode() {
            ReplicationMode::Sync => None,
            ReplicationMode::Async => Some(Dispatcher::new(self.options.workers())?),
        };

        log::debug!(
            "built {} replication graph: {} views, {} replicas, {} variables, {} blocks, {} clones",
            self.options.mode(),
            self.views.len(),
            replicas.len(),
            self.variables.len(),
            self.blocks.len(),
            self.blocks.iter().filter(|b| b.origin.is_some()).count(),
        );

        Ok(Arc::new(BlockGraph {
            blocks: self.blocks,
            views: self.views,
            replicas,
            variables: self.variables,
            options: self.options,
            dispatcher,
            metrics: self.metrics,
        }))
    }

    fn push(&mut self, block: Block) -> DreplResult<BlockId> {
        let id = BlockId::from(next_id(self.blocks.len())?);
        self.blocks.push(block);
        Ok(id)
    }

    fn build(&mut self, view: ViewId, offset: u64, layout: &Layout) -> DreplResult<BlockId> {
        let kind = match layout {
            Layout::Scalar(ptype) => BlockKind::Scalar(*ptype),
            Layout::Array(array) => {
                let element = self.build(view, 0, array.element())?;
                BlockKind::Array(ArrayBlock {
                    dims: array.dims().to_vec(),
                    element,
                    element_size: self.blocks[element.index()].size,
                    index: array.index().to_vec(),
                })
            }
            Layout::Struct(st) => {
                let mut field_offset = 0;
                let mut names = Vec::with_capacity(st.fields().len());
                let mut fields = Vec::with_capacity(st.fields().len());
                for (name, field) in st.fields() {
                    let id = self.build(view, field_offset, field)?;
                    field_offset += self.blocks[id.index()].size;
                    names.push(name.clone());
                    fields.push(id);
                }
                BlockKind::Struct(StructBlock { names, fields })
            }
        };
        self.push(Block {
            view,
            offset,
            size: layout.byte_size(),
            kind,
            dests: Vec::new(),
            source: None,
            origin: None,
        })
    }

    fn check_compatible(&self, b1: BlockId, b2: BlockId) -> DreplResult<()> {
        match (&self.blocks[b1.index()].kind, &self.blocks[b2.index()].kind) {
            (BlockKind::Scalar(p), BlockKind::Scalar(q)) => {
                if p != q {
                    drepl_bail!(Structural: "{q} does not match {p} in another view");
                }
                Ok(())
            }
            (BlockKind::Array(a1), BlockKind::Array(a2)) => {
                if a1.index.len() != a2.index.len() {
                    drepl_bail!(
                        Structural: "rank mismatch: {} dimensions here, {} in another view",
                        a2.index.len(),
                        a1.index.len()
                    );
                }
                self.check_compatible(a1.element, a2.element)
                    .map_err(|e| e.with_context("array element"))
            }
            (BlockKind::Struct(s1), BlockKind::Struct(s2)) => {
                s1.names.iter().zip(&s1.fields).try_for_each(|(name, f1)| {
                    match s2.find(name) {
                        Some(f2) => self
                            .check_compatible(*f1, f2)
                            .map_err(|e| e.with_context(format!("field '{name}'"))),
                        None => Ok(()),
                    }
                })
            }
            (k1, k2) => drepl_bail!(
                Structural: "{} does not match {} in another view",
                k2.name(),
                k1.name()
            ),
        }
    }

    fn link(&mut self, b1: BlockId, b2: BlockId) -> DreplResult<()> {
        let id2 = self.blocks[b2.index()].view;
        let v1 = &self.views[self.blocks[b1.index()].view.index()];
        let v2 = &self.views[id2.index()];

        let destination = v2.is_materialized() && !v1.readonly;
        let source = v1.default_view() == Some(id2);
        if destination {
            log::trace!("{b1} in '{}' replicates to {b2} in '{}'", v1.name, v2.name);
        }
        if source {
            log::trace!("{b1} in '{}' reads from {b2} in '{}'", v1.name, v2.name);
        }

        if destination {
            self.connect_destination(b1, b2)?;
        }
        if source {
            self.connect_source(b1, b2)?;
        }
        Ok(())
    }

    /// Adds an edge along which writes to `b1` reach `b2`.
    ///
    /// Struct fields are connected in place, so a field carries one edge per destination struct.
    fn connect_destination(&mut self, b1: BlockId, b2: BlockId) -> DreplResult<()> {
        let edge = match (
            self.blocks[b1.index()].kind.clone(),
            &self.blocks[b2.index()].kind.clone(),
        ) {
            (BlockKind::Scalar(_), BlockKind::Scalar(_)) => Edge::to(b2),
            (BlockKind::Array(a1), BlockKind::Array(a2)) => {
                let maps = compose_maps(&a1.index, &a2.index)?;
                let element = self.clone_connect(a1.element, a2.element)?;
                Edge::array(b2, element, maps)
            }
            (BlockKind::Struct(s1), BlockKind::Struct(s2)) => {
                for (name, f1) in s1.names.iter().zip(&s1.fields) {
                    if let Some(f2) = s2.find(name) {
                        self.connect_destination(*f1, f2)
                            .map_err(|e| e.with_context(format!("field '{name}'")))?;
                    }
                }
                Edge::to(b2)
            }
            (k1, k2) => drepl_bail!(Structural: "cannot connect {} to {}", k1.name(), k2.name()),
        };
        self.blocks[b1.index()].dests.push(edge);
        Ok(())
    }

    /// Makes `b2`, in the default view, the source `b1` reads from.
    ///
    /// When the default view holds the variable more than once, the first block linked wins.
    fn connect_source(&mut self, b1: BlockId, b2: BlockId) -> DreplResult<()> {
        if self.blocks[b1.index()].source.is_some() {
            return Ok(());
        }
        let readonly = self.views[self.blocks[b1.index()].view.index()].readonly;
        let edge = match (
            self.blocks[b1.index()].kind.clone(),
            &self.blocks[b2.index()].kind.clone(),
        ) {
            (BlockKind::Scalar(_), BlockKind::Scalar(_)) => {
                let target = if readonly { b2 } else { self.clone_connect(b2, b1)? };
                Edge::to(target)
            }
            (BlockKind::Array(a1), BlockKind::Array(a2)) => {
                let maps = compose_maps(&a1.index, &a2.index)?;
                let element = self.clone_connect(a2.element, a1.element)?;
                let target = if readonly { b2 } else { self.clone_connect(b2, b1)? };
                Edge::array(target, element, maps)
            }
            // field correspondence lives in the clone's field edges
            (BlockKind::Struct(_), BlockKind::Struct(_)) => Edge::to(self.clone_connect(b2, b1)?),
            (k1, k2) => drepl_bail!(Structural: "cannot read {} from {}", k1.name(), k2.name()),
        };
        self.blocks[b1.index()].source = Some(edge);
        Ok(())
    }

    /// Copies `b1` and gives the copy a single destination edge to `b2`.
    ///
    /// The copy keeps `b1`'s offset and size, drops its edges and remembers `b1` as its origin.
    /// Array elements and struct fields are cloned recursively so that the copy never shares a
    /// block that carries edges for some other pair.
    fn clone_connect(&mut self, b1: BlockId, b2: BlockId) -> DreplResult<BlockId> {
        let mut clone = self.detached_copy(b1);
        let edge = match (&mut clone.kind, &self.blocks[b2.index()].kind.clone()) {
            (BlockKind::Scalar(_), BlockKind::Scalar(_)) => Edge::to(b2),
            (BlockKind::Array(a1), BlockKind::Array(a2)) => {
                let maps = compose_maps(&a1.index, &a2.index)?;
                let element = self.clone_connect(a1.element, a2.element)?;
                Edge::array(b2, element, maps)
            }
            (BlockKind::Struct(s1), BlockKind::Struct(s2)) => {
                for (name, field) in s1.names.iter().zip(s1.fields.iter_mut()) {
                    *field = match s2.find(name) {
                        Some(f2) => self.clone_connect(*field, f2)?,
                        None => self.clone_detached(*field)?,
                    };
                }
                Edge::to(b2)
            }
            (k1, k2) => drepl_bail!(Structural: "cannot connect {} to {}", k1.name(), k2.name()),
        };
        clone.dests.push(edge);
        self.push(clone)
    }

    fn clone_detached(&mut self, block: BlockId) -> DreplResult<BlockId> {
        let mut clone = self.detached_copy(block);
        if let BlockKind::Struct(st) = &mut clone.kind {
            for field in st.fields.iter_mut() {
                *field = self.clone_detached(*field)?;
            }
        }
        self.push(clone)
    }

    fn detached_copy(&self, block: BlockId) -> Block {
        let original = &self.blocks[block.index()];
        Block {
            dests: Vec::new(),
            source: None,
            origin: Some(block),
            ..original.clone()
        }
    }
}

fn next_id(len: usize) -> DreplResult<u32> {
    u32::try_from(len).map_err(|_| drepl_err!(Configuration: "graph has too many entries"))
}

/// Maps from the index space of one array to that of another.
///
/// `from` and `to` are the arrays' index declarations: entry `n` gives dataset index `n` as a
/// function of one of the array's dimensions. Target dimension `k` is found by inverting the
/// declaration that reads `k` and applying it to the source declaration for the same dataset
/// dimension.
pub(crate) fn compose_maps(from: &[AffineMap], to: &[AffineMap]) -> DreplResult<Vec<AffineMap>> {
    if from.len() != to.len() {
        drepl_bail!(
            Structural: "rank mismatch: {} index expressions against {}",
            from.len(),
            to.len()
        );
    }
    (0..to.len())
        .map(|k| {
            let n = to
                .iter()
                .position(|m| m.dim() == Some(k))
                .ok_or_else(|| drepl_err!(Structural: "view dimension v{k} is not indexed"))?;
            let inverse = to[n]
                .inverse()
                .ok_or_else(|| drepl_err!(Structural: "index {n} ({}) cannot be inverted", to[n]))?;
            inverse.compose(&from[n]).ok_or_else(|| {
                drepl_err!(
                    Structural: "index {n}: {} and {} have no exact composition",
                    from[n],
                    to[n]
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use drepl_dtype::PType;
    use drepl_error::DreplError;
    use rstest::rstest;

    use super::*;
    use crate::{ArrayLayout, StructLayout};

    fn array(dims: Vec<u64>, index: Vec<AffineMap>, element: Layout) -> Layout {
        Layout::Array(ArrayLayout::new(dims, index, element))
    }

    fn point(fields: &[&str]) -> Layout {
        Layout::Struct(StructLayout::new(
            fields
                .iter()
                .map(|f| ((*f).into(), Layout::Scalar(PType::I32)))
                .collect(),
        ))
    }

    fn builder() -> (GraphBuilder, ViewId, ViewId) {
        let mut builder = GraphBuilder::new(ReplicationOptions::default());
        let r = builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let a = builder
            .add_view("a", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let b = builder
            .add_view("b", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        (builder, a, b)
    }

    #[test]
    fn compose_transpose() {
        let from = [AffineMap::identity(0), AffineMap::identity(1)];
        let to = [AffineMap::identity(1), AffineMap::identity(0)];
        assert_eq!(
            compose_maps(&from, &to).unwrap(),
            vec![AffineMap::identity(1), AffineMap::identity(0)]
        );
    }

    #[test]
    fn compose_partial() {
        let full = [AffineMap::identity(0)];
        let even = [AffineMap::new(2, 0, 0, 1, Some(0))];
        let down = compose_maps(&full, &even).unwrap();
        assert_eq!(down[0].eval(4), Some(2));
        assert_eq!(down[0].eval(3), None);
        let up = compose_maps(&even, &full).unwrap();
        assert_eq!(up[0].eval(3), Some(6));
    }

    #[test]
    fn compose_rejects_lost_exactness() {
        // odd view indices of a halving declaration have no dataset element
        let halved = [AffineMap::new(1, 0, 0, 2, Some(0))];
        let err = compose_maps(&halved, &halved).unwrap_err();
        assert!(matches!(err.root(), DreplError::Structural(..)), "{err}");
        assert!(err.to_string().contains("no exact composition"), "{err}");

        let even = [AffineMap::new(2, 0, 0, 1, Some(0))];
        let quarter = compose_maps(&halved, &even).unwrap();
        assert_eq!(quarter[0].eval(8), Some(2));
        assert_eq!(quarter[0].eval(6), None);
    }

    #[test]
    fn views_share_replica() {
        let (mut builder, a, b) = builder();
        builder.add_variable(a, "x", &Layout::Scalar(PType::I64)).unwrap();
        builder.add_variable(a, "y", &Layout::Scalar(PType::I16)).unwrap();
        builder.add_variable(b, "y", &Layout::Scalar(PType::I16)).unwrap();
        let graph = builder.finish().unwrap();

        assert_eq!(graph.view(a).size(), 10);
        assert_eq!(
            graph.view(b).backing(),
            Backing::Materialized {
                replica: ReplicaId::from(0),
                offset: 10
            }
        );
        assert_eq!(graph.replica(ReplicaId::from(0)).len(), 12);

        let ya = graph.search(a, 8, 2)[0];
        let yb = graph.search(b, 0, 2)[0];
        assert_eq!(graph.block(ya).offset(), 8);
        assert_eq!(graph.block(ya).dests(), &[Edge::to(yb)]);
        assert_eq!(graph.block(yb).dests(), &[Edge::to(ya)]);
    }

    #[test]
    fn array_edges_carry_private_elements() {
        let (mut builder, a, b) = builder();
        let aos = array(vec![3], vec![AffineMap::identity(0)], point(&["x", "y"]));
        let reordered = array(vec![3], vec![AffineMap::identity(0)], point(&["y", "x"]));
        let ba = builder.add_variable(a, "p", &aos).unwrap();
        let bb = builder.add_variable(b, "p", &reordered).unwrap();
        let graph = builder.finish().unwrap();

        let edge = &graph.block(ba).dests()[0];
        assert_eq!(edge.target(), bb);
        assert_eq!(edge.maps(), &[AffineMap::identity(0)]);

        let proxy = graph.block(edge.element().unwrap());
        let prototype = graph.block(ba).as_array().unwrap().element();
        assert_eq!(proxy.origin(), Some(prototype));
        assert_eq!(proxy.dests().len(), 1);
        let target_element = graph.block(bb).as_array().unwrap().element();
        assert_eq!(proxy.dests()[0].target(), target_element);

        // proxy fields point at the same-named target fields
        let target_fields = graph.block(target_element).as_struct().unwrap();
        let proxy_fields = proxy.as_struct().unwrap();
        for name in ["x", "y"] {
            let field = graph.block(proxy_fields.find(name).unwrap());
            assert_eq!(field.dests()[0].target(), target_fields.find(name).unwrap());
        }
        // the shared prototype itself stays unconnected
        assert!(graph.block(prototype).dests().is_empty());
    }

    #[test]
    fn struct_fields_connect_in_place() {
        let (mut builder, a, b) = builder();
        let ba = builder.add_variable(a, "p", &point(&["x", "y", "z"])).unwrap();
        let bb = builder.add_variable(b, "p", &point(&["z", "x"])).unwrap();
        let graph = builder.finish().unwrap();

        let sa = graph.block(ba).as_struct().unwrap();
        let sb = graph.block(bb).as_struct().unwrap();
        assert_eq!(graph.block(ba).dests(), &[Edge::to(bb)]);
        assert_eq!(graph.block(sa.find("x").unwrap()).dests(), &[Edge::to(sb.find("x").unwrap())]);
        assert!(graph.block(sa.find("y").unwrap()).dests().is_empty());
        assert_eq!(graph.block(sb.find("z").unwrap()).offset(), 0);
        assert_eq!(graph.block(sa.find("z").unwrap()).offset(), 8);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn unmaterialized_views_get_sources(#[case] readonly: bool) {
        let mut builder = GraphBuilder::new(ReplicationOptions::default());
        let r = builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let d = builder
            .add_view("d", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let u = builder
            .add_view("u", ElementOrder::RowMinor, readonly, Placement::Default(d))
            .unwrap();
        let layout = array(
            vec![2, 2],
            vec![AffineMap::identity(0), AffineMap::identity(1)],
            Layout::Scalar(PType::U8),
        );
        let bd = builder.add_variable(d, "m", &layout).unwrap();
        let bu = builder.add_variable(u, "m", &layout).unwrap();
        let graph = builder.finish().unwrap();

        let source = graph.block(bu).source().unwrap();
        assert_eq!(source.maps().len(), 2);
        if readonly {
            assert_eq!(source.target(), bd);
            assert!(graph.block(bu).dests().is_empty());
        } else {
            assert_eq!(graph.block(source.target()).origin(), Some(bd));
            assert_eq!(graph.block(bu).dests()[0].target(), bd);
        }
        // nothing replicates into a view without storage
        assert!(graph.block(bd).dests().is_empty());
        assert!(graph.block(bd).source().is_none());
    }

    #[rstest]
    #[case(Layout::Scalar(PType::I32), Layout::Scalar(PType::I64))]
    #[case(Layout::Scalar(PType::I32), point(&["x"]))]
    #[case(
        array(vec![4], vec![AffineMap::identity(0)], Layout::Scalar(PType::I32)),
        array(
            vec![2, 2],
            vec![AffineMap::identity(0), AffineMap::identity(1)],
            Layout::Scalar(PType::I32)
        )
    )]
    #[case(
        point(&["x", "y"]),
        Layout::Struct(StructLayout::new(vec![("y".into(), Layout::Scalar(PType::F32))]))
    )]
    fn incompatible_layouts(#[case] first: Layout, #[case] second: Layout) {
        let (mut builder, a, b) = builder();
        builder.add_variable(a, "v", &first).unwrap();
        let before = builder.blocks.len();
        let err = builder.add_variable(b, "v", &second).unwrap_err();
        assert!(matches!(err.root(), DreplError::Structural(..)), "{err}");
        assert!(err.to_string().contains("view 'b' / variable 'v'"), "{err}");
        // the rejected tree leaves no blocks behind
        assert_eq!(builder.blocks.len(), before);
        assert!(builder.views[b.index()].blocks.is_empty());
    }

    fn bytes(len: u64) -> Layout {
        array(vec![len], vec![AffineMap::identity(0)], Layout::Scalar(PType::U8))
    }

    #[rstest]
    #[case::product(vec![array(
        vec![1 << 33, 1 << 33],
        vec![AffineMap::identity(0), AffineMap::identity(1)],
        Layout::Scalar(PType::I32),
    )])]
    #[case::nested(vec![array(vec![1 << 40], vec![AffineMap::identity(0)], bytes(1 << 40))])]
    #[case::struct_fields(vec![Layout::Struct(StructLayout::new(vec![
        ("x".into(), bytes(1 << 62)),
        ("y".into(), bytes(1 << 62)),
    ]))])]
    #[case::view_total(vec![bytes(1 << 62), bytes(1 << 62)])]
    fn oversized_layouts_rejected(#[case] layouts: Vec<Layout>) {
        let (mut builder, a, _) = builder();
        let before = builder.blocks.len();
        let err = layouts
            .iter()
            .enumerate()
            .try_for_each(|(i, layout)| builder.add_variable(a, &format!("v{i}"), layout).map(drop))
            .unwrap_err();
        assert!(matches!(err.root(), DreplError::Configuration(..)), "{err}");
        assert!(err.to_string().contains("is larger than"), "{err}");
        // only the layouts that fit stay behind
        assert_eq!(builder.views[a.index()].blocks.len(), layouts.len() - 1);
        assert_eq!(builder.blocks.len(), before + 2 * (layouts.len() - 1));
    }

    #[test]
    fn oversized_replica_rejected() {
        let (mut builder, a, b) = builder();
        builder.add_variable(a, "x", &bytes(1 << 62)).unwrap();
        builder.add_variable(b, "y", &bytes(1 << 62)).unwrap();
        let err = builder.finish().unwrap_err();
        assert!(matches!(err.root(), DreplError::Configuration(..)), "{err}");
        assert!(err.to_string().contains("replica 'r'"), "{err}");
    }

    #[test]
    fn projections_in_one_view_replicate() {
        let (mut builder, a, b) = builder();
        let aos = array(vec![2], vec![AffineMap::identity(0)], point(&["x", "y"]));
        let xs = array(vec![2], vec![AffineMap::identity(0)], point(&["x"]));
        let ys = array(vec![2], vec![AffineMap::identity(0)], point(&["y"]));
        let ba = builder.add_variable(a, "p", &aos).unwrap();
        let bx = builder.add_variable(b, "p", &xs).unwrap();
        let by = builder.add_variable(b, "p", &ys).unwrap();
        let graph = builder.finish().unwrap();

        assert_eq!(graph.block(by).offset(), 8);
        let targets: Vec<BlockId> = graph.block(ba).dests().iter().map(Edge::target).collect();
        assert_eq!(targets, vec![bx, by]);
        assert_eq!(graph.variables()[0].blocks(), &[ba, bx, by]);
    }

    #[test]
    fn default_view_must_be_materialized() {
        let mut builder = GraphBuilder::new(ReplicationOptions::default());
        let r = builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let d = builder
            .add_view("d", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let u = builder
            .add_view("u", ElementOrder::RowMajor, false, Placement::Default(d))
            .unwrap();
        let err = builder
            .add_view("w", ElementOrder::RowMajor, false, Placement::Default(u))
            .unwrap_err();
        assert!(matches!(err.root(), DreplError::Configuration(..)), "{err}");
    }

    #[test]
    fn empty_replica_rejected() {
        let mut builder = GraphBuilder::new(ReplicationOptions::default());
        builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let err = builder.finish().unwrap_err();
        assert!(matches!(err.root(), DreplError::Configuration(..)), "{err}");
    }
}
