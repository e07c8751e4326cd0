//! Data movement over a built graph.
//!
//! Offsets passed to [`BlockGraph::read`] and [`BlockGraph::write`] are positions in the block's
//! view; `base` is where the addressed instance of the block starts in that view. For top-level
//! blocks the base is simply [`Block::offset`].

use std::sync::Arc;
use std::time::Instant;

use drepl_error::{DreplResult, drepl_bail, drepl_err};
use drepl_metrics::{
    MetricId, REPLICATE_ASYNC_FAILED, REPLICATE_BYTES, REPLICATE_DURATION, REPLICATE_SKIPPED,
};
use itertools::Itertools;

use crate::affine::translate;
use crate::{ArrayBlock, Block, BlockGraph, BlockId, BlockKind, Edge, StructBlock};

/// What [`BlockGraph::write`] does with the bytes it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFlags {
    /// Store the bytes in the block's own view, if it is materialized.
    pub write: bool,
    /// Propagate the bytes along the block's destination edges.
    pub replicate: bool,
}

impl WriteFlags {
    pub const ALL: Self = Self {
        write: true,
        replicate: true,
    };
    pub const STORE_ONLY: Self = Self {
        write: true,
        replicate: false,
    };
    pub const REPLICATE_ONLY: Self = Self {
        write: false,
        replicate: true,
    };
}

impl Default for WriteFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl BlockGraph {
    /// Fills `buf` with the bytes of `block` starting at view offset `offset`.
    ///
    /// The read is clamped to the end of the block; the number of bytes read is returned.
    /// Unmaterialized blocks synthesize their bytes from the default view and fail with a
    /// no-correspondence error when an array element has no counterpart there.
    pub fn read(
        &self,
        block: BlockId,
        buf: &mut [u8],
        offset: u64,
        base: u64,
    ) -> DreplResult<usize> {
        let b = self.block(block);
        let (rel, len) = clamp(block, b, offset, base, buf.len())?;
        let buf = &mut buf[..len];
        if len == 0 {
            return Ok(0);
        }

        if let Some((replica, view_offset)) = self.placement(b.view) {
            let n = replica.read_at(view_offset + offset, buf);
            if n < len {
                drepl_bail!(
                    Addressing: "short read of {block}: {n} of {len} bytes from replica '{}'",
                    replica.name()
                );
            }
            return Ok(n);
        }

        let source = b.source().ok_or_else(|| {
            drepl_err!(
                Configuration: "{block} of unmaterialized view '{}' has no source",
                self.view(b.view).name()
            )
        })?;
        let src = self.block(source.target());
        match &b.kind {
            BlockKind::Scalar(_) => {
                self.read(source.target(), buf, src.offset + rel, src.offset)?;
            }
            BlockKind::Array(array) => self.read_elements(b, array, source, buf, rel)?,
            BlockKind::Struct(_) => {
                // no exclusion against writers landing between the read and the copy
                let edge = single_dest(source.target(), src)?;
                let mut whole = vec![0; src.size as usize];
                self.read(source.target(), &mut whole, src.offset, src.offset)?;
                let mut scratch = vec![0; b.size as usize];
                self.xform(source.target(), edge, &whole, &mut scratch)?;
                buf.copy_from_slice(&scratch[rel as usize..rel as usize + len]);
            }
        }
        Ok(len)
    }

    fn read_elements(
        &self,
        b: &Block,
        array: &ArrayBlock,
        source: &Edge,
        buf: &mut [u8],
        rel: u64,
    ) -> DreplResult<()> {
        let src = self.block(source.target());
        let src_array = as_array(source.target(), src)?;
        let element = edge_element(source)?;
        let element_edge = single_dest(element, self.block(element))?;
        let order = self.view(b.view).order();
        let src_order = self.view(src.view).order();

        let es = array.element_size;
        let src_es = src_array.element_size;
        let end = rel + buf.len() as u64;
        let mut idx = vec![0; array.dims.len()];
        let mut src_idx = vec![0; src_array.dims.len()];
        let mut src_buf = vec![0; src_es as usize];
        let mut scratch = vec![0; es as usize];

        for n in rel / es..end.div_ceil(es) {
            order.to_idx(n, &array.dims, &mut idx);
            if !translate(source.maps(), &idx, &src_array.dims, &mut src_idx) {
                drepl_bail!(
                    NoCorrespondence: "element [{}] of view '{}' is missing from view '{}'",
                    idx.iter().join(", "),
                    self.view(b.view).name(),
                    self.view(src.view).name()
                );
            }
            let at = src.offset + src_order.from_idx(&src_idx, &src_array.dims) * src_es;
            let n_read = self.read(source.target(), &mut src_buf, at, src.offset)?;
            if n_read < src_buf.len() {
                drepl_bail!(
                    Addressing: "short read of element at {at}: {n_read} of {src_es} bytes"
                );
            }

            scratch.fill(0);
            self.xform(element, element_edge, &src_buf, &mut scratch)?;
            let lo = (n * es).max(rel);
            let hi = ((n + 1) * es).min(end);
            buf[(lo - rel) as usize..(hi - rel) as usize]
                .copy_from_slice(&scratch[(lo - n * es) as usize..(hi - n * es) as usize]);
        }
        Ok(())
    }

    /// Writes `data` to the top-level `block` at view offset `offset` and replicates it.
    ///
    /// The write is clamped to the end of the block, and array writes end at the last whole
    /// element. Returns the number of bytes accepted. In asynchronous mode replication runs on
    /// the graph's worker pool after this returns; its failures are logged and counted under
    /// [`REPLICATE_ASYNC_FAILED`] rather than reported.
    pub fn write(
        self: &Arc<Self>,
        block: BlockId,
        data: &[u8],
        offset: u64,
        base: u64,
        flags: WriteFlags,
    ) -> DreplResult<usize> {
        let b = self.block(block);
        let view = self.view(b.view);
        if !view.is_top_level(block) {
            drepl_bail!("{block} is not a top-level block of view '{}'", view.name());
        }
        let (rel, mut len) = clamp(block, b, offset, base, data.len())?;
        if let BlockKind::Array(array) = &b.kind {
            let end = (rel + len as u64) / array.element_size * array.element_size;
            len = end.saturating_sub(rel) as usize;
        }
        if len == 0 {
            return Ok(0);
        }
        let data = &data[..len];

        if flags.write {
            if let Some((replica, view_offset)) = self.placement(b.view) {
                let n = replica.write_at(view_offset + offset, data);
                if n < len {
                    drepl_bail!(
                        Addressing: "short write to {block}: {n} of {len} bytes into replica '{}'",
                        replica.name()
                    );
                }
            }
        }
        if !flags.replicate || b.dests.is_empty() {
            return Ok(len);
        }

        match &self.dispatcher {
            None => self.replicate(block, data, offset, base)?,
            Some(dispatcher) => {
                let graph = Arc::clone(self);
                let data = data.to_vec();
                dispatcher.dispatch(move || {
                    if let Err(err) = graph.replicate(block, &data, offset, base) {
                        log::warn!("detached replication from {block} failed: {err}");
                        graph
                            .metrics
                            .counter(MetricId::new(REPLICATE_ASYNC_FAILED))
                            .inc();
                    }
                })?;
            }
        }
        Ok(len)
    }

    /// Propagates bytes already written to `block` along all of its destination edges.
    pub fn replicate(
        &self,
        block: BlockId,
        data: &[u8],
        offset: u64,
        base: u64,
    ) -> DreplResult<()> {
        let start = Instant::now();
        let b = self.block(block);
        let (rel, len) = clamp(block, b, offset, base, data.len())?;
        for edge in b.dests() {
            let target = self.block(edge.target());
            self.propagate(block, edge, &data[..len], rel, target.offset)?;
        }
        self.metrics
            .timer(MetricId::new(REPLICATE_DURATION))
            .update(start.elapsed());
        Ok(())
    }

    /// Carries `data`, found at `rel` within `block`, along `edge` into the target instance
    /// starting at view offset `dst_base`.
    fn propagate(
        &self,
        block: BlockId,
        edge: &Edge,
        data: &[u8],
        rel: u64,
        dst_base: u64,
    ) -> DreplResult<()> {
        let b = self.block(block);
        match &b.kind {
            BlockKind::Scalar(_) => self.store(edge.target(), dst_base + rel, data),
            BlockKind::Array(array) => {
                let target = self.block(edge.target());
                let target_array = as_array(edge.target(), target)?;
                let element = edge_element(edge)?;
                let element_edge = single_dest(element, self.block(element))?;
                let order = self.view(b.view).order();
                let target_order = self.view(target.view).order();

                let es = array.element_size;
                let end = rel + data.len() as u64;
                let mut idx = vec![0; array.dims.len()];
                let mut target_idx = vec![0; target_array.dims.len()];
                for n in rel / es..end.div_ceil(es) {
                    order.to_idx(n, &array.dims, &mut idx);
                    if !translate(edge.maps(), &idx, &target_array.dims, &mut target_idx) {
                        self.metrics.counter(MetricId::new(REPLICATE_SKIPPED)).inc();
                        continue;
                    }
                    let tn = target_order.from_idx(&target_idx, &target_array.dims);
                    let lo = (n * es).max(rel);
                    let hi = ((n + 1) * es).min(end);
                    self.propagate(
                        element,
                        element_edge,
                        &data[(lo - rel) as usize..(hi - rel) as usize],
                        lo - n * es,
                        dst_base + tn * target_array.element_size,
                    )?;
                }
                Ok(())
            }
            BlockKind::Struct(st) => {
                let target = as_struct(edge.target(), self.block(edge.target()))?;
                let end = rel + data.len() as u64;
                for field in &st.fields {
                    let f = self.block(*field);
                    let lo = f.offset.max(rel);
                    let hi = f.end().min(end);
                    if lo >= hi {
                        continue;
                    }
                    for field_edge in f
                        .dests()
                        .iter()
                        .filter(|e| target.fields.contains(&e.target()))
                    {
                        self.propagate(
                            *field,
                            field_edge,
                            &data[(lo - rel) as usize..(hi - rel) as usize],
                            lo - f.offset,
                            dst_base + self.block(field_edge.target()).offset,
                        )?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Rewrites the whole-block bytes `src` of `block` into the layout of `edge`'s target.
    ///
    /// Array elements without an exact counterpart in the target are skipped, so `dst` keeps
    /// whatever it held for them.
    pub fn xform(
        &self,
        block: BlockId,
        edge: &Edge,
        src: &[u8],
        dst: &mut [u8],
    ) -> DreplResult<()> {
        let b = self.block(block);
        match &b.kind {
            BlockKind::Scalar(_) => {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
            }
            BlockKind::Array(array) => {
                let target = self.block(edge.target());
                let target_array = as_array(edge.target(), target)?;
                let element = edge_element(edge)?;
                let element_edge = single_dest(element, self.block(element))?;
                let order = self.view(b.view).order();
                let target_order = self.view(target.view).order();

                let es = array.element_size as usize;
                let tes = target_array.element_size as usize;
                let mut idx = vec![0; array.dims.len()];
                let mut target_idx = vec![0; target_array.dims.len()];
                for n in 0..array.element_count() {
                    order.to_idx(n, &array.dims, &mut idx);
                    if !translate(edge.maps(), &idx, &target_array.dims, &mut target_idx) {
                        continue;
                    }
                    let s = n as usize * es;
                    let d = target_order.from_idx(&target_idx, &target_array.dims) as usize * tes;
                    self.xform(element, element_edge, &src[s..s + es], &mut dst[d..d + tes])?;
                }
            }
            BlockKind::Struct(st) => {
                let target = as_struct(edge.target(), self.block(edge.target()))?;
                for field in &st.fields {
                    let f = self.block(*field);
                    for field_edge in f
                        .dests()
                        .iter()
                        .filter(|e| target.fields.contains(&e.target()))
                    {
                        let t = self.block(field_edge.target());
                        self.xform(
                            *field,
                            field_edge,
                            &src[f.offset as usize..f.end() as usize],
                            &mut dst[t.offset as usize..t.end() as usize],
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stores replicated bytes into the materialized view of `target` at view offset `at`.
    fn store(&self, target: BlockId, at: u64, data: &[u8]) -> DreplResult<()> {
        let view = self.block(target).view;
        let (replica, view_offset) = self.placement(view).ok_or_else(|| {
            drepl_err!(
                Configuration: "replication target {target} in view '{}' is not materialized",
                self.view(view).name()
            )
        })?;
        let n = replica.write_at(view_offset + at, data);
        if n < data.len() {
            drepl_bail!(
                Addressing: "short write replicating to {target}: {n} of {} bytes in replica '{}'",
                data.len(),
                replica.name()
            );
        }
        self.metrics
            .counter(MetricId::new(REPLICATE_BYTES))
            .add(n as i64);
        Ok(())
    }
}

/// Position of `offset` within the block instance at `base` and the length that fits.
fn clamp(
    id: BlockId,
    block: &Block,
    offset: u64,
    base: u64,
    len: usize,
) -> DreplResult<(u64, usize)> {
    let Some(rel) = offset.checked_sub(base).filter(|rel| *rel <= block.size) else {
        drepl_bail!(
            "offset {offset} is outside {id} at {base}..{}",
            base + block.size
        );
    };
    let room = usize::try_from(block.size - rel).unwrap_or(usize::MAX);
    Ok((rel, len.min(room)))
}

fn as_array(id: BlockId, block: &Block) -> DreplResult<&ArrayBlock> {
    block
        .as_array()
        .ok_or_else(|| drepl_err!(Structural: "{id} is a {}, not an array", block.kind().name()))
}

fn as_struct(id: BlockId, block: &Block) -> DreplResult<&StructBlock> {
    block
        .as_struct()
        .ok_or_else(|| drepl_err!(Structural: "{id} is a {}, not a struct", block.kind().name()))
}

fn edge_element(edge: &Edge) -> DreplResult<BlockId> {
    edge.element()
        .ok_or_else(|| drepl_err!(Structural: "array edge to {} has no element", edge.target()))
}

/// The one edge of a block cloned for a specific connection.
fn single_dest(id: BlockId, block: &Block) -> DreplResult<&Edge> {
    block
        .dests()
        .first()
        .ok_or_else(|| drepl_err!(Structural: "{id} is not connected"))
}

#[cfg(test)]
mod tests {
    use drepl_dtype::PType;
    use drepl_error::DreplError;
    use rstest::rstest;

    use super::*;
    use crate::{
        AffineMap, ArrayLayout, ElementOrder, GraphBuilder, Layout, Placement, ReplicaStorage,
        ReplicationMode, ReplicationOptions, StructLayout, ViewId,
    };

    fn options(mode: ReplicationMode) -> ReplicationOptions {
        ReplicationOptions::default()
            .with_mode(mode)
            .with_workers(2)
    }

    fn array(dims: Vec<u64>, index: Vec<AffineMap>, element: Layout) -> Layout {
        Layout::Array(ArrayLayout::new(dims, index, element))
    }

    fn vector(n: u64, ptype: PType) -> Layout {
        array(vec![n], vec![AffineMap::identity(0)], Layout::Scalar(ptype))
    }

    fn fields(names: &[(&str, PType)]) -> Layout {
        Layout::Struct(StructLayout::new(
            names
                .iter()
                .map(|(n, p)| ((*n).into(), Layout::Scalar(*p)))
                .collect(),
        ))
    }

    fn write(graph: &Arc<BlockGraph>, block: BlockId, rel: u64, data: &[u8]) -> usize {
        let base = graph.block(block).offset();
        graph
            .write(block, data, base + rel, base, WriteFlags::ALL)
            .unwrap()
    }

    fn read(graph: &BlockGraph, block: BlockId, rel: u64, len: usize) -> DreplResult<Vec<u8>> {
        let base = graph.block(block).offset();
        let mut buf = vec![0; len];
        let n = graph.read(block, &mut buf, base + rel, base)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn i32s(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Two materialized views in separate replicas.
    fn pair(mode: ReplicationMode, a: &Layout, b: &Layout) -> (Arc<BlockGraph>, BlockId, BlockId) {
        let mut builder = GraphBuilder::new(options(mode));
        let ra = builder.add_replica("ra", ReplicaStorage::Memory).unwrap();
        let rb = builder.add_replica("rb", ReplicaStorage::Memory).unwrap();
        let va = builder
            .add_view("a", ElementOrder::RowMajor, false, Placement::Replica(ra))
            .unwrap();
        let vb = builder
            .add_view("b", ElementOrder::RowMajor, false, Placement::Replica(rb))
            .unwrap();
        let ba = builder.add_variable(va, "v", a).unwrap();
        let bb = builder.add_variable(vb, "v", b).unwrap();
        (builder.finish().unwrap(), ba, bb)
    }

    #[rstest]
    fn scalar_round_trip(
        #[values(ReplicationMode::Sync, ReplicationMode::Async)] mode: ReplicationMode,
    ) {
        let layout = Layout::Scalar(PType::I32);
        let (graph, a, b) = pair(mode, &layout, &layout);

        assert_eq!(write(&graph, a, 0, &i32s(&[42])), 4);
        graph.drain();
        assert_eq!(read(&graph, b, 0, 4).unwrap(), i32s(&[42]));

        assert_eq!(write(&graph, b, 2, &[0xff]), 1);
        graph.drain();
        assert_eq!(read(&graph, a, 0, 4).unwrap(), i32s(&[42 | 0xff << 16]));
        assert_eq!(graph.metrics().count(REPLICATE_BYTES), 5);
    }

    #[test]
    fn partial_array_replication() {
        let even = array(
            vec![2],
            vec![AffineMap::new(2, 0, 0, 1, Some(0))],
            Layout::Scalar(PType::I32),
        );
        let (graph, full, half) = pair(ReplicationMode::Sync, &vector(4, PType::I32), &even);

        assert_eq!(write(&graph, full, 0, &i32s(&[10, 11, 12, 13])), 16);
        assert_eq!(read(&graph, half, 0, 8).unwrap(), i32s(&[10, 12]));
        assert_eq!(graph.metrics().count(REPLICATE_SKIPPED), 2);

        // odd elements have no counterpart and are skipped without error
        assert_eq!(write(&graph, full, 4, &i32s(&[-1])), 4);
        assert_eq!(read(&graph, half, 0, 8).unwrap(), i32s(&[10, 12]));
        assert_eq!(graph.metrics().count(REPLICATE_SKIPPED), 3);

        assert_eq!(write(&graph, half, 4, &i32s(&[99])), 4);
        assert_eq!(read(&graph, full, 0, 16).unwrap(), i32s(&[10, -1, 99, 13]));
    }

    #[test]
    fn transposed_orders() {
        let mut builder = GraphBuilder::new(options(ReplicationMode::Sync));
        let r = builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let transposed = array(
            vec![3, 2],
            vec![AffineMap::identity(1), AffineMap::identity(0)],
            Layout::Scalar(PType::U8),
        );
        let rows = array(
            vec![2, 3],
            vec![AffineMap::identity(0), AffineMap::identity(1)],
            Layout::Scalar(PType::U8),
        );
        let mut blocks = Vec::new();
        for (name, order, layout) in [
            ("rows", ElementOrder::RowMajor, &rows),
            ("cols_minor", ElementOrder::RowMinor, &transposed),
            ("cols", ElementOrder::RowMajor, &transposed),
        ] {
            let view = builder
                .add_view(name, order, false, Placement::Replica(r))
                .unwrap();
            blocks.push(builder.add_variable(view, "m", layout).unwrap());
        }
        let graph = builder.finish().unwrap();

        assert_eq!(write(&graph, blocks[0], 0, &[0, 1, 2, 3, 4, 5]), 6);
        // a transposed array stored row-minor has the original bytes
        assert_eq!(read(&graph, blocks[1], 0, 6).unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(read(&graph, blocks[2], 0, 6).unwrap(), vec![0, 3, 1, 4, 2, 5]);

        // cols[2][0] is m[0][2]
        assert_eq!(write(&graph, blocks[2], 4, &[40]), 1);
        assert_eq!(read(&graph, blocks[0], 0, 6).unwrap(), vec![0, 1, 40, 3, 4, 5]);
        assert_eq!(read(&graph, blocks[1], 0, 6).unwrap(), vec![0, 1, 40, 3, 4, 5]);
    }

    struct Synthesized {
        graph: Arc<BlockGraph>,
        default: [BlockId; 3],
        virt: [BlockId; 3],
    }

    fn synthesized(readonly: bool) -> Synthesized {
        let mut builder = GraphBuilder::new(options(ReplicationMode::Sync));
        let r = builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let d = builder
            .add_view("d", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let u = builder
            .add_view("u", ElementOrder::RowMajor, readonly, Placement::Default(d))
            .unwrap();

        let matrix = array(
            vec![2, 3],
            vec![AffineMap::identity(0), AffineMap::identity(1)],
            Layout::Scalar(PType::U8),
        );
        let transposed = array(
            vec![3, 2],
            vec![AffineMap::identity(1), AffineMap::identity(0)],
            Layout::Scalar(PType::U8),
        );
        let point = fields(&[("x", PType::I32), ("y", PType::I16), ("z", PType::U8)]);
        let projected = fields(&[("z", PType::U8), ("x", PType::I32)]);

        let add = |builder: &mut GraphBuilder, view: ViewId, layouts: [&Layout; 3]| {
            let mut ids = [BlockId::from(0); 3];
            for ((id, name), layout) in ids.iter_mut().zip(["s", "m", "p"]).zip(layouts) {
                *id = builder.add_variable(view, name, layout).unwrap();
            }
            ids
        };
        let scalar = Layout::Scalar(PType::I16);
        let default = add(&mut builder, d, [&scalar, &matrix, &point]);
        let virt = add(&mut builder, u, [&scalar, &transposed, &projected]);
        Synthesized {
            graph: builder.finish().unwrap(),
            default,
            virt,
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn unmaterialized_view_synthesis(#[case] readonly: bool) {
        let Synthesized { graph, default, virt } = synthesized(readonly);
        let u = graph.block(virt[0]).view();
        assert_eq!(graph.view(u).size(), 2 + 6 + 5);

        write(&graph, default[0], 0, &0x1234_i16.to_le_bytes());
        write(&graph, default[1], 0, &[0, 1, 2, 3, 4, 5]);
        let mut point = i32s(&[7]);
        point.extend_from_slice(&(-1_i16).to_le_bytes());
        point.push(9);
        write(&graph, default[2], 0, &point);

        assert_eq!(read(&graph, virt[0], 0, 2).unwrap(), 0x1234_i16.to_le_bytes());
        assert_eq!(read(&graph, virt[1], 0, 6).unwrap(), vec![0, 3, 1, 4, 2, 5]);
        assert_eq!(read(&graph, virt[1], 1, 2).unwrap(), vec![3, 1]);
        let mut projected = vec![9];
        projected.extend(i32s(&[7]));
        assert_eq!(read(&graph, virt[2], 0, 5).unwrap(), projected);
        assert_eq!(read(&graph, virt[2], 1, 8).unwrap(), i32s(&[7]));

        // the view is never written by replication
        assert!(graph.placement(u).is_none());
    }

    #[test]
    fn writes_through_unmaterialized_view() {
        let Synthesized { graph, default, virt } = synthesized(false);

        // u.m[0][1] is m[1][0]
        assert_eq!(write(&graph, virt[1], 1, &[77]), 1);
        assert_eq!(read(&graph, default[1], 0, 6).unwrap(), vec![0, 0, 0, 77, 0, 0]);
        assert_eq!(read(&graph, virt[1], 0, 6).unwrap(), vec![0, 77, 0, 0, 0, 0]);

        assert_eq!(write(&graph, virt[2], 0, &[5]), 1);
        assert_eq!(read(&graph, default[2], 6, 1).unwrap(), vec![5]);
    }

    #[test]
    fn readonly_view_does_not_replicate() {
        let Synthesized { graph, default, virt } = synthesized(true);
        assert_eq!(write(&graph, virt[0], 0, &[1, 2]), 2);
        assert_eq!(read(&graph, default[0], 0, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn missing_element_fails_read() {
        let mut builder = GraphBuilder::new(options(ReplicationMode::Sync));
        let r = builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let d = builder
            .add_view("d", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let u = builder
            .add_view("u", ElementOrder::RowMajor, true, Placement::Default(d))
            .unwrap();
        let even = array(
            vec![2],
            vec![AffineMap::new(2, 0, 0, 1, Some(0))],
            Layout::Scalar(PType::I32),
        );
        let half = builder.add_variable(d, "v", &even).unwrap();
        let full = builder.add_variable(u, "v", &vector(4, PType::I32)).unwrap();
        let graph = builder.finish().unwrap();

        write(&graph, half, 0, &i32s(&[6, 8]));
        assert_eq!(read(&graph, full, 0, 4).unwrap(), i32s(&[6]));
        assert_eq!(read(&graph, full, 8, 4).unwrap(), i32s(&[8]));
        let err = read(&graph, full, 4, 4).unwrap_err();
        assert!(matches!(err.root(), DreplError::NoCorrespondence(..)), "{err}");
        assert!(read(&graph, full, 0, 16).is_err());
    }

    #[test]
    fn struct_field_write_reaches_projections() {
        let mut builder = GraphBuilder::new(options(ReplicationMode::Sync));
        let r = builder.add_replica("r", ReplicaStorage::Memory).unwrap();
        let aos = builder
            .add_view("aos", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let soa = builder
            .add_view("soa", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let element = |names: &[&str]| {
            array(
                vec![3],
                vec![AffineMap::identity(0)],
                fields(&names.iter().map(|n| (*n, PType::I32)).collect::<Vec<_>>()),
            )
        };
        let points = builder.add_variable(aos, "p", &element(&["x", "y"])).unwrap();
        let xs = builder.add_variable(soa, "p", &element(&["x"])).unwrap();
        let ys = builder.add_variable(soa, "p", &element(&["y"])).unwrap();
        let graph = builder.finish().unwrap();

        // y of element 1 only
        assert_eq!(write(&graph, points, 12, &i32s(&[5])), 4);
        assert_eq!(read(&graph, ys, 0, 12).unwrap(), i32s(&[0, 5, 0]));
        assert_eq!(read(&graph, xs, 0, 12).unwrap(), i32s(&[0, 0, 0]));

        assert_eq!(write(&graph, xs, 0, &i32s(&[1, 2, 3])), 12);
        assert_eq!(read(&graph, points, 0, 24).unwrap(), i32s(&[1, 0, 2, 5, 3, 0]));
    }

    #[rstest]
    fn repeated_writes_are_idempotent(
        #[values(ReplicationMode::Sync, ReplicationMode::Async)] mode: ReplicationMode,
    ) {
        let layout = vector(8, PType::U16);
        let (graph, a, b) = pair(mode, &layout, &layout);
        let data: Vec<u8> = (0..16).collect();
        for _ in 0..2 {
            write(&graph, a, 0, &data);
            graph.drain();
            assert_eq!(read(&graph, b, 0, 16).unwrap(), data);
        }
        assert_eq!(graph.metrics().count(REPLICATE_ASYNC_FAILED), 0);
    }

    #[test]
    fn array_writes_end_on_whole_elements() {
        let layout = vector(4, PType::I32);
        let (graph, a, b) = pair(ReplicationMode::Sync, &layout, &layout);
        assert_eq!(write(&graph, a, 0, &[1; 6]), 4);
        assert_eq!(write(&graph, a, 4, &[1; 3]), 0);
        assert_eq!(write(&graph, a, 14, &[2; 10]), 2);
        assert_eq!(read(&graph, b, 0, 16).unwrap(), [
            1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 2
        ]);
    }

    #[test]
    fn element_blocks_are_not_writable() {
        let layout = vector(4, PType::I32);
        let (graph, a, _) = pair(ReplicationMode::Sync, &layout, &layout);
        let element = graph.block(a).as_array().unwrap().element();
        assert!(graph.write(element, &[0; 4], 0, 0, WriteFlags::ALL).is_err());
        assert!(graph.read(a, &mut [0; 4], 17, 0).is_err());
    }

    #[test]
    fn store_only_skips_replication() {
        let layout = Layout::Scalar(PType::U8);
        let (graph, a, b) = pair(ReplicationMode::Sync, &layout, &layout);
        let base = graph.block(a).offset();
        graph.write(a, &[3], base, base, WriteFlags::STORE_ONLY).unwrap();
        assert_eq!(read(&graph, b, 0, 1).unwrap(), vec![0]);
        graph.replicate(a, &[3], base, base).unwrap();
        assert_eq!(read(&graph, b, 0, 1).unwrap(), vec![3]);
    }
}
