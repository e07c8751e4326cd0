#![deny(missing_docs)]
//! Metrics recorded while replicating writes between views.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use witchcraft_metrics::{MetricRegistry, Metrics, MetricsIter};
// re-export exposed metric types
pub use witchcraft_metrics::{Counter, Metric, MetricId, Tags, Timer};

/// Detached replication tasks that failed. Their errors never reach the writer.
pub const REPLICATE_ASYNC_FAILED: &str = "drepl.replicate.async.failed";
/// Array elements that had no exact counterpart in a destination and were skipped.
pub const REPLICATE_SKIPPED: &str = "drepl.replicate.skipped";
/// Bytes stored into destination views by replication.
pub const REPLICATE_BYTES: &str = "drepl.replicate.bytes";
/// Wall time of one replicate walk from a top-level block.
pub const REPLICATE_DURATION: &str = "drepl.replicate.duration";

/// A metric registry shared by everything attached to one replication graph.
#[derive(Default, Clone)]
pub struct DreplMetrics {
    registry: Arc<MetricRegistry>,
    default_tags: Arc<DefaultTags>,
}

/// Tags applied to every metric when a snapshot is taken.
#[derive(Default)]
pub struct DefaultTags(BTreeMap<Cow<'static, str>, Cow<'static, str>>);

impl<K, V> From<&[(K, V)]> for DefaultTags
where
    K: Clone + Into<Cow<'static, str>>,
    V: Clone + Into<Cow<'static, str>>,
{
    fn from(pairs: &[(K, V)]) -> Self {
        DefaultTags(
            pairs
                .iter()
                .map(|(k, v)| (k.clone().into(), v.clone().into()))
                .collect(),
        )
    }
}

impl DreplMetrics {
    /// An empty registry whose snapshots carry `default_tags`.
    pub fn with_tags(default_tags: impl Into<DefaultTags>) -> Self {
        Self {
            registry: Arc::default(),
            default_tags: Arc::new(default_tags.into()),
        }
    }

    /// Returns the counter with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a counter.
    pub fn counter<T>(&self, id: T) -> Arc<Counter>
    where
        T: Into<MetricId>,
    {
        self.registry.counter(id)
    }

    /// Returns the timer with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a timer.
    pub fn timer<T>(&self, id: T) -> Arc<Timer>
    where
        T: Into<MetricId>,
    {
        self.registry.timer(id)
    }

    /// Current value of the counter `id`, zero if it was never touched.
    pub fn count(&self, id: &'static str) -> i64 {
        self.counter(MetricId::new(id)).count()
    }

    /// Returns a snapshot of the metrics in the registry.
    ///
    /// Later modifications to the registry do not affect the returned snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot<'_> {
        MetricsSnapshot {
            snapshot: self.registry.metrics(),
            default_tags: &self.default_tags,
        }
    }
}

impl Debug for DreplMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DreplMetrics")
            .field("metrics", &self.registry.metrics().iter().count())
            .finish()
    }
}

/// A point-in-time copy of the registry.
pub struct MetricsSnapshot<'a> {
    snapshot: Metrics,
    default_tags: &'a DefaultTags,
}

impl MetricsSnapshot<'_> {
    /// Iterate the snapshot with default tags applied.
    pub fn iter(&self) -> DreplMetricsIter<'_> {
        DreplMetricsIter {
            iter: self.snapshot.iter(),
            default_tags: self.default_tags,
        }
    }
}

/// Iterator over a [`MetricsSnapshot`].
pub struct DreplMetricsIter<'a> {
    iter: MetricsIter<'a>,
    default_tags: &'a DefaultTags,
}

impl<'a> Iterator for DreplMetricsIter<'a> {
    type Item = (MetricId, &'a Metric);

    #[inline]
    fn next(&mut self) -> Option<(MetricId, &'a Metric)> {
        self.iter.next().map(|(id, metric)| {
            let id = self
                .default_tags
                .0
                .iter()
                .fold(id.clone(), |id, (k, v)| id.with_tag(k.clone(), v.clone()));
            (id, metric)
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}
