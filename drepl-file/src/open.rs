use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use drepl_error::{DreplResult, drepl_bail, drepl_err};
use drepl_graph::{
    BlockGraph, GraphBuilder, Placement, ReplicaStorage, ReplicationOptions, ViewId, export,
};
use drepl_metrics::DreplMetrics;
use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::resolve::Resolver;
use crate::{Description, ViewDesc, ViewFile};

/// Turns a [`Description`] into a running [`DreplFile`].
#[derive(Debug, Clone, Default)]
pub struct DreplOpenOptions {
    replication: Option<ReplicationOptions>,
    base_dir: Option<PathBuf>,
    in_memory: bool,
    metrics: Option<DreplMetrics>,
}

impl DreplOpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `options` instead of the ones the document carries.
    pub fn with_replication(mut self, options: ReplicationOptions) -> Self {
        self.replication = Some(options);
        self
    }

    /// Directory that replica files are relative to.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Back every replica with anonymous memory instead of its file.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn with_metrics(mut self, metrics: DreplMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Reads the document at `path` and opens it, resolving replica files next to it.
    pub fn open_path(mut self, path: impl AsRef<Path>) -> DreplResult<DreplFile> {
        let path = path.as_ref();
        let desc = Description::from_path(path)?;
        if self.base_dir.is_none() {
            self.base_dir = path.parent().map(Path::to_path_buf);
        }
        self.open(&desc)
    }

    /// Validates `desc`, builds its block graph and maps its replicas.
    pub fn open(self, desc: &Description) -> DreplResult<DreplFile> {
        let resolver = Resolver::new(&desc.constants);
        let options = self
            .replication
            .or_else(|| desc.options.clone())
            .unwrap_or_default();
        let mut builder = GraphBuilder::new(options);
        if let Some(metrics) = self.metrics {
            builder = builder.with_metrics(metrics);
        }

        let mut dtypes = FxHashMap::default();
        for variable in &desc.dataset.variables {
            let dtype = resolver
                .dtype(&variable.dtype)
                .map_err(|e| e.with_context(format!("dataset variable '{}'", variable.name)))?;
            if dtypes.insert(variable.name.as_str(), dtype).is_some() {
                drepl_bail!(Structural: "dataset variable '{}' declared twice", variable.name);
            }
        }

        if let Some(dup) = desc.views.iter().map(|v| v.name.as_str()).duplicates().next() {
            drepl_bail!(Structural: "view '{dup}' declared twice");
        }

        // materialized views first, in storage order, so unmaterialized views can name a default
        let mut views: Vec<(ViewId, &ViewDesc)> = Vec::with_capacity(desc.views.len());
        let mut hosted = FxHashSet::default();
        for replica in &desc.replicas {
            let storage = match (&self.base_dir, self.in_memory) {
                (_, true) => ReplicaStorage::Memory,
                (Some(dir), false) => ReplicaStorage::File(dir.join(&replica.file)),
                (None, false) => ReplicaStorage::File(replica.file.clone()),
            };
            let id = builder.add_replica(replica.name.as_str(), storage)?;
            for name in &replica.views {
                let view = desc.view(name).ok_or_else(|| {
                    drepl_err!(Structural: "replica '{}' hosts unknown view '{name}'", replica.name)
                })?;
                if !hosted.insert(name.as_str()) {
                    drepl_bail!(Structural: "view '{name}' is hosted by two replicas");
                }
                let vid = builder.add_view(
                    name.as_str(),
                    view.order,
                    view.readonly,
                    Placement::Replica(id),
                )?;
                views.push((vid, view));
            }
        }

        let unmaterialized = desc
            .views
            .iter()
            .filter(|v| !hosted.contains(v.name.as_str()))
            .collect_vec();
        if !unmaterialized.is_empty() {
            let default = match desc.views.iter().filter(|v| v.default).collect_vec()[..] {
                [default] => default,
                [] => drepl_bail!(
                    Configuration: "view '{}' is not materialized and no view is marked default",
                    unmaterialized[0].name
                ),
                [..] => drepl_bail!(Configuration: "more than one view is marked default"),
            };
            let Some((default_id, _)) = views.iter().find(|(_, v)| v.name == default.name) else {
                drepl_bail!(
                    Configuration: "default view '{}' is not materialized",
                    default.name
                );
            };
            let default_id = *default_id;
            for view in unmaterialized {
                let vid = builder.add_view(
                    view.name.as_str(),
                    view.order,
                    view.readonly,
                    Placement::Default(default_id),
                )?;
                views.push((vid, view));
            }
        }

        for (vid, view) in &views {
            if let Some(dup) = view.variables.iter().map(|v| v.name.as_str()).duplicates().next() {
                drepl_bail!(Structural: "view '{}' / variable '{dup}' declared twice", view.name);
            }
            for member in &view.variables {
                let path = || format!("view '{}' / variable '{}'", view.name, member.name);
                let dtype = dtypes.get(member.variable()).ok_or_else(|| {
                    drepl_err!(Structural: "unknown dataset variable '{}'", member.variable())
                        .with_context(path())
                })?;
                let layout = resolver
                    .layout(member.layout.as_ref(), dtype)
                    .and_then(|layout| layout.check_against(dtype).map(|_| layout))
                    .map_err(|e| e.with_context(path()))?;
                builder.add_variable(*vid, member.variable(), &layout)?;
            }
        }

        let graph = builder.finish()?;
        log::info!(
            "opened {} views over {} replicas ({} replication)",
            graph.num_views(),
            desc.replicas.len(),
            graph.options().mode()
        );
        Ok(DreplFile { graph })
    }
}

/// An opened description: the block graph and its mapped replicas.
#[derive(Debug, Clone)]
pub struct DreplFile {
    graph: Arc<BlockGraph>,
}

impl DreplFile {
    pub fn graph(&self) -> &Arc<BlockGraph> {
        &self.graph
    }

    /// Byte-range access to the view named `name`.
    pub fn view(&self, name: &str) -> DreplResult<ViewFile> {
        let view = self
            .graph
            .view_by_name(name)
            .ok_or_else(|| drepl_err!("no view named '{name}'"))?;
        Ok(ViewFile::new(self.graph.clone(), view))
    }

    pub fn views(&self) -> impl Iterator<Item = ViewFile> + '_ {
        self.graph
            .views()
            .map(|(id, _)| ViewFile::new(self.graph.clone(), id))
    }

    /// The graph in the binary export format.
    pub fn export(&self) -> DreplResult<Bytes> {
        export::to_bytes(&self.graph)
    }

    /// Waits for detached replication and flushes every replica.
    pub fn flush(&self) -> DreplResult<()> {
        self.graph.drain();
        self.graph.sync()
    }
}
