//! One concrete execution context bound to a treatment.
//!
//! A [`Replication`] owns its [`RunControl`], a statistics namespace into
//! which collectors bind themselves by description, and (when created by
//! an experiment) an [`ExperimentContext`] carrying the cross-replication
//! summary registry. It also hands out deterministic random streams.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempora_core::{ConfigError, Timeline};

use crate::summary::SummaryRegistry;
use crate::treatment::RunControl;

// ── Statistics namespace ───────────────────────────────────────────

/// A statistic bound into a replication's namespace.
pub trait Statistic: Send + Sync + 'static {
    /// Unique description within the replication.
    fn description(&self) -> &str;

    /// Observations accepted since the last reset.
    fn count(&self) -> u64;

    /// Current mean, `None` without observations.
    fn mean(&self) -> Option<f64>;
}

/// The statistics namespace of one replication.
pub struct StatisticsContext {
    replication_id: Arc<str>,
    entries: RwLock<IndexMap<String, Arc<dyn Statistic>>>,
}

impl StatisticsContext {
    fn new(replication_id: Arc<str>) -> Self {
        Self {
            replication_id,
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Bind `statistic` under its description.
    ///
    /// Fails with [`ConfigError::DuplicateStatistic`] if the description
    /// is already taken in this replication.
    pub fn bind(&self, statistic: Arc<dyn Statistic>) -> Result<(), ConfigError> {
        let description = statistic.description().to_owned();
        let mut entries = self.entries.write();
        if entries.contains_key(&description) {
            return Err(ConfigError::DuplicateStatistic {
                description,
                replication: self.replication_id.to_string(),
            });
        }
        entries.insert(description, statistic);
        Ok(())
    }

    /// Look up a bound statistic.
    pub fn get(&self, description: &str) -> Option<Arc<dyn Statistic>> {
        self.entries.read().get(description).cloned()
    }

    /// Descriptions in binding order.
    pub fn descriptions(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of bound statistics.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Unbind everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl fmt::Debug for StatisticsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticsContext")
            .field("replication_id", &self.replication_id)
            .field("descriptions", &self.descriptions())
            .finish()
    }
}

// ── Experiment back-reference ──────────────────────────────────────

/// What a replication knows about the experiment that created it.
#[derive(Clone, Debug)]
pub struct ExperimentContext {
    id: Arc<str>,
    replications: usize,
    summaries: Arc<SummaryRegistry>,
}

impl ExperimentContext {
    pub(crate) fn new(id: Arc<str>, replications: usize, summaries: Arc<SummaryRegistry>) -> Self {
        Self {
            id,
            replications,
            summaries,
        }
    }

    /// Experiment identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Total replications the experiment runs.
    pub fn replications(&self) -> usize {
        self.replications
    }

    /// Cross-replication summaries, keyed by statistic description.
    pub fn summaries(&self) -> &Arc<SummaryRegistry> {
        &self.summaries
    }
}

// ── Replication ────────────────────────────────────────────────────

/// One independent execution of a model under a fixed treatment.
pub struct Replication<T: Timeline> {
    id: Arc<str>,
    index: usize,
    treatment: RunControl<T>,
    seed: u64,
    experiment: Option<ExperimentContext>,
    statistics: StatisticsContext,
}

impl<T: Timeline> Replication<T> {
    /// A standalone replication, not owned by any experiment.
    pub fn new(id: impl Into<String>, treatment: RunControl<T>) -> Result<Self, ConfigError> {
        let id: String = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyId {
                field: "replication id",
            });
        }
        Ok(Self::build(Arc::from(id), 0, treatment, 0, None))
    }

    /// Use `seed` for this replication's random streams.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub(crate) fn for_experiment(
        id: Arc<str>,
        index: usize,
        treatment: RunControl<T>,
        base_seed: u64,
        experiment: ExperimentContext,
    ) -> Self {
        Self::build(id, index, treatment, base_seed, Some(experiment))
    }

    fn build(
        id: Arc<str>,
        index: usize,
        treatment: RunControl<T>,
        seed: u64,
        experiment: Option<ExperimentContext>,
    ) -> Self {
        let statistics = StatisticsContext::new(Arc::clone(&id));
        Self {
            id,
            index,
            treatment,
            seed,
            experiment,
            statistics,
        }
    }

    /// Identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn shared_id(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    /// 0-based index within the experiment (0 when standalone).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Timing parameters.
    pub fn treatment(&self) -> &RunControl<T> {
        &self.treatment
    }

    /// The owning experiment, if any.
    pub fn experiment(&self) -> Option<&ExperimentContext> {
        self.experiment.as_ref()
    }

    /// The statistics namespace.
    pub fn statistics(&self) -> &StatisticsContext {
        &self.statistics
    }

    /// A random stream named `name`.
    ///
    /// Deterministic in (seed, replication index, name): asking twice for
    /// the same name yields identical sequences, different names or
    /// indices yield independent ones.
    pub fn stream(&self, name: &str) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(mix(self.seed, self.index as u64));
        rng.set_stream(fnv1a(name.as_bytes()));
        rng
    }
}

impl<T: Timeline> fmt::Debug for Replication<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replication")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("treatment", &self.treatment)
            .field("seed", &self.seed)
            .finish()
    }
}

/// SplitMix64 finalizer over `seed ^ index`.
fn mix(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xCBF2_9CE4_8422_2325, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01B3)
    })
}
