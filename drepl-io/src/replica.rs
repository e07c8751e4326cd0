use std::fmt::{Debug, Formatter};
use std::fs::OpenOptions;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drepl_error::{DreplResult, drepl_bail, drepl_err};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;

/// A byte store hosting one or more views.
///
/// All views and blocks backed by a replica share its mapped buffer. Writes are plain
/// offset-addressed copies; the replica remembers the byte range touched since the last
/// [`Replica::sync`] so that a flush only covers what changed.
pub struct Replica {
    name: Arc<str>,
    path: Option<PathBuf>,
    len: usize,
    state: RwLock<ReplicaState>,
}

struct ReplicaState {
    map: MmapMut,
    dirty: Option<Range<usize>>,
}

impl Replica {
    /// Maps the file at `path`, creating it if needed and resizing it to `len` bytes.
    ///
    /// Existing contents within the first `len` bytes are preserved.
    pub fn open(name: impl Into<Arc<str>>, path: impl AsRef<Path>, len: u64) -> DreplResult<Self> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();
        let map_len = Self::map_len(&name, len)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                drepl_err!(IOError: e).with_context(format!(
                    "opening replica '{name}' at {}",
                    path.display()
                ))
            })?;
        file.set_len(len)?;

        // SAFETY: the file was sized to `len` above and the mapping never outlives `self`.
        // Modifications by other processes are not synchronized; a replica file is owned by
        // exactly one graph.
        let map = unsafe { MmapOptions::new().len(map_len).map_mut(&file) }.map_err(|e| {
            drepl_err!(IOError: e).with_context(format!(
                "mapping {len} bytes of replica '{name}'"
            ))
        })?;

        log::debug!("mapped replica '{name}' ({len} bytes) at {}", path.display());

        Ok(Self {
            name,
            path: Some(path),
            len: map_len,
            state: RwLock::new(ReplicaState { map, dirty: None }),
        })
    }

    /// A replica backed by anonymous memory, zero-filled.
    pub fn anonymous(name: impl Into<Arc<str>>, len: u64) -> DreplResult<Self> {
        let name = name.into();
        let map_len = Self::map_len(&name, len)?;
        let map = MmapMut::map_anon(map_len)?;
        Ok(Self {
            name,
            path: None,
            len: map_len,
            state: RwLock::new(ReplicaState { map, dirty: None }),
        })
    }

    fn map_len(name: &str, len: u64) -> DreplResult<usize> {
        if len == 0 {
            drepl_bail!(Configuration: "replica '{name}' hosts no data");
        }
        usize::try_from(len).map_err(|_| {
            drepl_err!(Configuration: "replica '{name}' of {len} bytes cannot be mapped")
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, `None` for anonymous replicas.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> u64 {
        self.len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, which is short when the range runs past the end of
    /// the replica and zero when `offset` is beyond it.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Some(start) = self.position(offset) else {
            return 0;
        };
        let state = self.state.read();
        let n = buf.len().min(self.len - start);
        buf[..n].copy_from_slice(&state.map[start..start + n]);
        n
    }

    /// Copies `data` into the replica at `offset` and extends the dirty range.
    ///
    /// Returns the number of bytes stored, short when the range runs past the end.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> usize {
        let Some(start) = self.position(offset) else {
            return 0;
        };
        let n = data.len().min(self.len - start);
        if n == 0 {
            return 0;
        }

        let mut state = self.state.write();
        state.map[start..start + n].copy_from_slice(&data[..n]);
        let end = start + n;
        state.dirty = Some(match state.dirty.take() {
            Some(dirty) => dirty.start.min(start)..dirty.end.max(end),
            None => start..end,
        });
        n
    }

    /// Range written since the last sync.
    pub fn dirty_range(&self) -> Option<Range<u64>> {
        self.state
            .read()
            .dirty
            .as_ref()
            .map(|r| r.start as u64..r.end as u64)
    }

    /// Flushes the dirty range to stable storage and clears it.
    pub fn sync(&self) -> DreplResult<()> {
        let Some(dirty) = self.state.write().dirty.take() else {
            return Ok(());
        };
        if self.path.is_none() {
            return Ok(());
        }

        log::trace!(
            "flushing replica '{}' bytes {}..{}",
            self.name,
            dirty.start,
            dirty.end
        );
        self.state
            .read()
            .map
            .flush_range(dirty.start, dirty.len())
            .map_err(|e| {
                drepl_err!(IOError: e).with_context(format!("syncing replica '{}'", self.name))
            })
    }

    fn position(&self, offset: u64) -> Option<usize> {
        usize::try_from(offset).ok().filter(|start| *start <= self.len)
    }
}

impl Debug for Replica {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}
