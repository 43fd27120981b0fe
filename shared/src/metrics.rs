use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type Tags<'a> = &'a [(&'static str, &'static str)];

/// A counter series family. Every increment carries a value for each key in
/// `tag_keys`.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub tag_keys: &'static [&'static str],
    pub description: &'static str,
}

enum MetricsBackend {
    /// Forwards to whichever recorder is installed behind the `metrics` facade
    Recorder,
    /// Keeps counts in process, keyed by name and tags
    InMemory(Mutex<HashMap<String, u64>>),
    Noop,
}

/// Counter sink handed to components that emit metrics.
///
/// Cheap to clone; every clone shares the same backend.
#[derive(Clone)]
pub struct Metrics {
    backend: Arc<MetricsBackend>,
}

impl Metrics {
    /// Create a Metrics client backed by the global `metrics` recorder
    pub fn from_recorder() -> Self {
        Metrics {
            backend: Arc::new(MetricsBackend::Recorder),
        }
    }

    /// Create a Metrics client that keeps counts in memory
    pub fn new_in_memory() -> Self {
        Metrics {
            backend: Arc::new(MetricsBackend::InMemory(Mutex::new(HashMap::new()))),
        }
    }

    /// Create a no-op Metrics client that discards all metrics
    pub fn new_noop() -> Self {
        Metrics {
            backend: Arc::new(MetricsBackend::Noop),
        }
    }

    /// Increment a counter metric by 1
    /// metrics.incr(&RESPONSE_RECEIVED, &[("role", "primary")]);
    pub fn incr(&self, metric: &MetricDef, tags: Tags<'_>) {
        match self.backend.as_ref() {
            MetricsBackend::Recorder => {
                let labels: Vec<metrics::Label> = tags
                    .iter()
                    .map(|(key, value)| metrics::Label::new(*key, *value))
                    .collect();
                metrics::counter!(metric.name, labels).increment(1);
            }
            MetricsBackend::InMemory(counts) => {
                let mut counts = match counts.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *counts.entry(series_key(metric.name, tags)).or_default() += 1;
            }
            MetricsBackend::Noop => {}
        }
    }

    /// Current value of a counter series.
    ///
    /// Only the in-memory backend keeps values; the others always report 0.
    pub fn count(&self, metric: &MetricDef, tags: Tags<'_>) -> u64 {
        match self.backend.as_ref() {
            MetricsBackend::InMemory(counts) => {
                let counts = match counts.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                counts
                    .get(&series_key(metric.name, tags))
                    .copied()
                    .unwrap_or(0)
            }
            MetricsBackend::Recorder | MetricsBackend::Noop => 0,
        }
    }
}

fn series_key(name: &str, tags: Tags<'_>) -> String {
    let mut tags = tags.to_vec();
    tags.sort_unstable();

    let mut key = name.to_string();
    for (k, v) in tags {
        key.push('|');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}
