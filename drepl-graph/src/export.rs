//! Flat binary export of a graph for out-of-process consumers such as a mount helper.
//!
//! The stream is a header followed by replica, view and block records. Integers are
//! little-endian: counts and ids are `i32`, offsets, sizes and map coefficients are `i64`.
//! Ids are one-based with zero meaning "none"; strings are an `i32` length and UTF-8 bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use drepl_error::{DreplResult, drepl_bail, drepl_err};

use crate::{
    AffineMap, Backing, BlockGraph, BlockId, BlockKind, Edge, ElementOrder, ReplicationMode,
};

/// View flag: writes replicate asynchronously.
pub const VIEW_FLAG_ASYNC: i32 = 0x1;
/// View flag: writes through the view do not replicate.
pub const VIEW_FLAG_READONLY: i32 = 0x2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedGraph {
    pub replicas: Vec<ExportedReplica>,
    pub views: Vec<ExportedView>,
    pub blocks: Vec<ExportedBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedReplica {
    pub id: u32,
    pub name: String,
    /// Empty for replicas without a backing file.
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedView {
    pub id: u32,
    pub name: String,
    pub flags: i32,
    pub replica: u32,
    pub offset: u64,
    pub order: ElementOrder,
    pub default: u32,
    pub blocks: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedEdge {
    pub maps: Vec<AffineMap>,
    pub target: u32,
    pub element: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedBlock {
    pub id: u32,
    pub view: u32,
    pub offset: u64,
    pub size: u64,
    pub source: Option<ExportedEdge>,
    pub dests: Vec<ExportedEdge>,
    /// Empty unless the block is an array.
    pub dims: Vec<u64>,
    pub element_size: u64,
    pub element_count: u64,
    pub element: u32,
    /// Empty unless the block is a struct.
    pub fields: Vec<u32>,
}

/// Appends the export of `graph` to `out`.
pub fn write_graph(graph: &BlockGraph, out: &mut impl BufMut) -> DreplResult<()> {
    let nrepl = count(graph.replicas().count())?;
    let nview = count(graph.num_views())?;
    let nblk = count(graph.num_blocks())?;
    out.put_i32_le(nrepl);
    out.put_i32_le(nview);
    out.put_i32_le(nblk);

    for (id, replica) in graph.replicas() {
        out.put_i32_le(one_based(*id));
        put_str(out, replica.name());
        put_str(
            out,
            &replica
                .path()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
    }

    let async_flag = match graph.options().mode() {
        ReplicationMode::Sync => 0,
        ReplicationMode::Async => VIEW_FLAG_ASYNC,
    };
    for (id, view) in graph.views() {
        out.put_i32_le(one_based(*id));
        put_str(out, view.name());
        let readonly = if view.is_readonly() { VIEW_FLAG_READONLY } else { 0 };
        out.put_i32_le(async_flag | readonly);
        let (replica, offset, default) = match view.backing() {
            Backing::Materialized { replica, offset } => (one_based(*replica), offset, 0),
            Backing::Default(default) => (0, 0, one_based(*default)),
        };
        out.put_i32_le(replica);
        out.put_i64_le(offset as i64);
        out.put_i32_le(view.order().id());
        out.put_i32_le(default);
        out.put_i32_le(count(view.blocks().len())?);
        for block in view.blocks() {
            out.put_i32_le(one_based(**block));
        }
    }

    for (id, block) in graph.blocks() {
        out.put_i32_le(one_based(*id));
        out.put_i32_le(one_based(*block.view()));
        out.put_i64_le(block.offset() as i64);
        out.put_i64_le(block.size() as i64);
        put_edge(out, block.source())?;
        out.put_i32_le(count(block.dests().len())?);
        for dest in block.dests() {
            put_edge(out, Some(dest))?;
        }

        match block.kind() {
            BlockKind::Array(array) => {
                out.put_i32_le(count(array.dims().len())?);
                for dim in array.dims() {
                    out.put_i64_le(*dim as i64);
                }
                out.put_i64_le(array.element_size() as i64);
                out.put_i64_le(array.element_count() as i64);
                out.put_i32_le(one_based(*array.element()));
            }
            _ => {
                out.put_i32_le(0);
                out.put_i64_le(0);
                out.put_i64_le(0);
                out.put_i32_le(0);
            }
        }
        match block.kind() {
            BlockKind::Struct(st) => {
                out.put_i32_le(count(st.fields().len())?);
                for field in st.fields() {
                    out.put_i32_le(one_based(**field));
                }
            }
            _ => out.put_i32_le(0),
        }
    }
    Ok(())
}

/// The export of `graph` as one buffer.
pub fn to_bytes(graph: &BlockGraph) -> DreplResult<Bytes> {
    let mut buf = BytesMut::new();
    write_graph(graph, &mut buf)?;
    Ok(buf.freeze())
}

/// Decodes an export back into plain records.
pub fn read_graph(buf: impl Buf) -> DreplResult<ExportedGraph> {
    let mut reader = Reader { buf };
    let nrepl = reader.count()?;
    let nview = reader.count()?;
    let nblk = reader.count()?;

    let replicas = (0..nrepl)
        .map(|_| {
            Ok(ExportedReplica {
                id: reader.id()?,
                name: reader.string()?,
                file: reader.string()?,
            })
        })
        .collect::<DreplResult<Vec<_>>>()?;

    let views = (0..nview)
        .map(|_| {
            let id = reader.id()?;
            let name = reader.string()?;
            let flags = reader.i32()?;
            let replica = reader.id()?;
            let offset = reader.u64()?;
            let order_id = reader.i32()?;
            let order = ElementOrder::from_id(order_id)
                .ok_or_else(|| drepl_err!("view '{name}' has unknown element order {order_id}"))?;
            let default = reader.id()?;
            let n = reader.count()?;
            let blocks = (0..n).map(|_| reader.id()).collect::<DreplResult<Vec<_>>>()?;
            Ok(ExportedView {
                id,
                name,
                flags,
                replica,
                offset,
                order,
                default,
                blocks,
            })
        })
        .collect::<DreplResult<Vec<_>>>()?;

    let blocks = (0..nblk)
        .map(|_| {
            let id = reader.id()?;
            let view = reader.id()?;
            let offset = reader.u64()?;
            let size = reader.u64()?;
            let source = reader.edge()?;
            let ndest = reader.count()?;
            let dests = (0..ndest)
                .map(|_| {
                    reader.edge()?.ok_or_else(|| {
                        drepl_err!("block {id} has a destination edge without target")
                    })
                })
                .collect::<DreplResult<Vec<_>>>()?;
            let ndim = reader.count()?;
            let dims = (0..ndim).map(|_| reader.u64()).collect::<DreplResult<Vec<_>>>()?;
            let element_size = reader.u64()?;
            let element_count = reader.u64()?;
            let element = reader.id()?;
            let nfld = reader.count()?;
            let fields = (0..nfld).map(|_| reader.id()).collect::<DreplResult<Vec<_>>>()?;
            Ok(ExportedBlock {
                id,
                view,
                offset,
                size,
                source,
                dests,
                dims,
                element_size,
                element_count,
                element,
                fields,
            })
        })
        .collect::<DreplResult<Vec<_>>>()?;

    Ok(ExportedGraph {
        replicas,
        views,
        blocks,
    })
}

fn count(n: usize) -> DreplResult<i32> {
    i32::try_from(n)
        .map_err(|_| drepl_err!(Configuration: "{n} entries do not fit the export format"))
}

fn one_based(id: u32) -> i32 {
    // ids are bounded by `count` before they are written
    (id + 1) as i32
}

fn put_str(out: &mut impl BufMut, s: &str) {
    out.put_i32_le(s.len() as i32);
    out.put_slice(s.as_bytes());
}

fn put_edge(out: &mut impl BufMut, edge: Option<&Edge>) -> DreplResult<()> {
    let Some(edge) = edge else {
        out.put_i32_le(0);
        out.put_i32_le(0);
        out.put_i32_le(0);
        return Ok(());
    };
    out.put_i32_le(count(edge.maps().len())?);
    for map in edge.maps() {
        let (a, b, c, d) = map.coefficients();
        out.put_i64_le(a);
        out.put_i64_le(b);
        out.put_i64_le(c);
        out.put_i64_le(d);
        out.put_i32_le(map.dim().map_or(-1, |dim| dim as i32));
    }
    out.put_i32_le(one_based(*edge.target()));
    out.put_i32_le(edge.element().map_or(0, |e: BlockId| one_based(*e)));
    Ok(())
}

struct Reader<B> {
    buf: B,
}

impl<B: Buf> Reader<B> {
    fn need(&self, n: usize) -> DreplResult<()> {
        if self.buf.remaining() < n {
            drepl_bail!(
                Addressing: "export truncated: need {n} bytes, {} left",
                self.buf.remaining()
            );
        }
        Ok(())
    }

    fn i32(&mut self) -> DreplResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    fn i64(&mut self) -> DreplResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    fn u64(&mut self) -> DreplResult<u64> {
        let v = self.i64()?;
        u64::try_from(v).map_err(|_| drepl_err!("negative offset or size {v} in export"))
    }

    fn count(&mut self) -> DreplResult<usize> {
        let v = self.i32()?;
        usize::try_from(v).map_err(|_| drepl_err!("negative count {v} in export"))
    }

    fn id(&mut self) -> DreplResult<u32> {
        let v = self.i32()?;
        u32::try_from(v).map_err(|_| drepl_err!("negative id {v} in export"))
    }

    fn string(&mut self) -> DreplResult<String> {
        let len = self.count()?;
        self.need(len)?;
        let bytes = self.buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|e| drepl_err!("invalid string in export: {e}"))
    }

    fn edge(&mut self) -> DreplResult<Option<ExportedEdge>> {
        let nexpr = self.count()?;
        let maps = (0..nexpr)
            .map(|_| {
                let (a, b, c, d) = (self.i64()?, self.i64()?, self.i64()?, self.i64()?);
                let dim = self.i32()?;
                Ok(AffineMap::new(a, b, c, d, usize::try_from(dim).ok()))
            })
            .collect::<DreplResult<Vec<_>>>()?;
        let target = self.id()?;
        let element = self.id()?;
        Ok((target != 0).then_some(ExportedEdge {
            maps,
            target,
            element,
        }))
    }
}

#[cfg(test)]
mod tests {
    use drepl_dtype::PType;
    use drepl_error::DreplError;

    use super::*;
    use crate::{
        ArrayLayout, GraphBuilder, Layout, Placement, ReplicaStorage, ReplicationOptions,
    };

    fn graph() -> std::sync::Arc<BlockGraph> {
        let mut builder = GraphBuilder::new(ReplicationOptions::default());
        let r = builder.add_replica("mem", ReplicaStorage::Memory).unwrap();
        let a = builder
            .add_view("a", ElementOrder::RowMajor, false, Placement::Replica(r))
            .unwrap();
        let b = builder
            .add_view("b", ElementOrder::RowMinor, true, Placement::Default(a))
            .unwrap();
        let layout = Layout::Array(ArrayLayout::new(
            vec![2],
            vec![AffineMap::identity(0)],
            Layout::Scalar(PType::U16),
        ));
        builder.add_variable(a, "arr", &layout).unwrap();
        builder.add_variable(b, "arr", &layout).unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn header_and_replica_layout() {
        let bytes = to_bytes(&graph()).unwrap();
        let mut expected = BytesMut::new();
        expected.put_i32_le(1);
        expected.put_i32_le(2);
        // two arrays, two element prototypes and one element proxy
        expected.put_i32_le(5);
        expected.put_i32_le(1);
        expected.put_i32_le(3);
        expected.put_slice(b"mem");
        expected.put_i32_le(0);
        assert_eq!(&bytes[..expected.len()], &expected[..]);
    }

    #[test]
    fn decodes_records() {
        let exported = read_graph(to_bytes(&graph()).unwrap()).unwrap();
        assert_eq!(
            exported.replicas,
            vec![ExportedReplica {
                id: 1,
                name: "mem".to_string(),
                file: String::new(),
            }]
        );

        let b = &exported.views[1];
        assert_eq!(b.name, "b");
        assert_eq!(b.flags, VIEW_FLAG_READONLY);
        assert_eq!((b.replica, b.default), (0, 1));
        assert_eq!(b.order, ElementOrder::RowMinor);

        let arr = exported
            .blocks
            .iter()
            .find(|blk| blk.id == b.blocks[0])
            .unwrap();
        assert_eq!(arr.size, 4);
        assert_eq!(arr.dims, vec![2]);
        assert_eq!((arr.element_size, arr.element_count), (2, 2));
        assert!(arr.dests.is_empty());
        let source = arr.source.as_ref().unwrap();
        assert_eq!(source.target, exported.views[0].blocks[0]);
        assert_eq!(source.maps, vec![AffineMap::identity(0)]);
        assert_ne!(source.element, 0);

        let proxy = exported
            .blocks
            .iter()
            .find(|blk| blk.id == source.element)
            .unwrap();
        assert_eq!(proxy.dests[0].target, arr.element);
        assert!(proxy.fields.is_empty());
    }

    #[test]
    fn truncated_input_rejected() {
        let bytes = to_bytes(&graph()).unwrap();
        for len in [0, 11, bytes.len() - 1] {
            let err = read_graph(bytes.slice(..len)).unwrap_err();
            assert!(matches!(err.root(), DreplError::Addressing(..)), "{err}");
        }
    }
}
