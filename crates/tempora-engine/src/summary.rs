//! Cross-replication summary registry owned by an experiment.

use indexmap::IndexMap;
use parking_lot::Mutex;
use tempora_core::SummaryStatistic;

/// Map from statistic description to its cross-replication summary.
///
/// The first value recorded under a description creates its
/// [`SummaryStatistic`]; later replications feed the same one. Iteration
/// follows first-recorded order.
#[derive(Debug, Default)]
pub struct SummaryRegistry {
    entries: Mutex<IndexMap<String, SummaryStatistic>>,
}

impl SummaryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one replication's final value for `description`.
    pub fn record(&self, description: &str, value: f64) {
        let mut entries = self.entries.lock();
        match entries.get_mut(description) {
            Some(summary) => summary.ingest(value),
            None => {
                let mut summary = SummaryStatistic::new();
                summary.ingest(value);
                entries.insert(description.to_owned(), summary);
            }
        }
    }

    /// Summary for `description`, if any replication recorded one.
    pub fn get(&self, description: &str) -> Option<SummaryStatistic> {
        self.entries.lock().get(description).cloned()
    }

    /// Copy of every summary.
    pub fn snapshot(&self) -> IndexMap<String, SummaryStatistic> {
        self.entries.lock().clone()
    }

    /// Number of descriptions recorded.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forget every summary.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
