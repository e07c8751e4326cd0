use drepl::metrics::{DreplMetrics, Metric, MetricId};
use itertools::Itertools;

/// Prints one line per counter and timer in the graph's registry.
pub fn print_metrics(metrics: &DreplMetrics) {
    let snapshot = metrics.snapshot();
    for (id, metric) in snapshot.iter().sorted_by(|(a, _), (b, _)| a.name().cmp(b.name())) {
        match metric {
            Metric::Counter(counter) => println!("{} {}", label(&id), counter.count()),
            Metric::Timer(timer) => {
                let snapshot = timer.snapshot();
                println!(
                    "{} count={} min_ns={} max_ns={}",
                    label(&id),
                    timer.count(),
                    snapshot.min(),
                    snapshot.max()
                );
            }
            _ => {}
        }
    }
}

fn label(id: &MetricId) -> String {
    let tags = id.tags().iter().map(|(k, v)| format!("{k}={v}")).join(",");
    if tags.is_empty() {
        id.name().to_string()
    } else {
        format!("{}{{{tags}}}", id.name())
    }
}
