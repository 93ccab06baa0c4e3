//! In-process metric registry.
//!
//! Instruments are registered by name in a [`Registry`] and fan out into one
//! observer per distinct [`Attributes`] set. Observers are cheap handles that
//! share state with every clone for the same attributes, so call sites can
//! stash a recorder at construction time and record lock-free later.
//!
//! There is deliberately no exposition endpoint here; tests and embedders
//! read instruments back through [`Registry::get_instrument`].
#![warn(missing_docs)]

use parking_lot::Mutex;
use std::{
    any::Any,
    borrow::Cow,
    collections::{btree_map::Entry, BTreeMap},
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;

/// A registry of named instruments.
///
/// Registering an existing name returns the existing instrument, so multiple
/// components can share a metric without coordinating construction order.
#[derive(Debug, Default)]
pub struct Registry {
    instruments: Mutex<BTreeMap<&'static str, Box<dyn Instrument>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or look up) the metric `name`.
    ///
    /// # Panics
    ///
    /// If `name` was previously registered with a different observer type.
    pub fn register_metric<T: MetricObserver>(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Metric<T> {
        let mut instruments = self.instruments.lock();
        match instruments.entry(name) {
            Entry::Occupied(o) => match o.get().as_any().downcast_ref::<Metric<T>>() {
                Some(metric) => metric.clone(),
                None => panic!("metric type mismatch for instrument {name}"),
            },
            Entry::Vacant(v) => {
                let metric = Metric::new(name, description);
                v.insert(Box::new(metric.clone()));
                metric
            }
        }
    }

    /// Look up a previously registered instrument by name.
    pub fn get_instrument<I: Instrument + Clone>(&self, name: &str) -> Option<I> {
        let instruments = self.instruments.lock();
        instruments
            .get(name)
            .and_then(|i| i.as_any().downcast_ref::<I>())
            .cloned()
    }
}

/// A type-erased instrument stored in a [`Registry`].
pub trait Instrument: Debug + Send + Sync + 'static {
    /// Upcast, so [`Registry::get_instrument`] can downcast back to the
    /// concrete [`Metric`].
    fn as_any(&self) -> &dyn Any;
}

impl<T: MetricObserver> Instrument for Metric<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Types that observe values for one attribute set of a [`Metric`].
///
/// Clones share state: recording through any clone is visible through all
/// clones for the same attributes.
pub trait MetricObserver: Clone + Default + Debug + Send + Sync + 'static {}

/// A named metric producing one observer per distinct attribute set.
#[derive(Debug)]
pub struct Metric<T: MetricObserver> {
    /// The instrument name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    shared: Arc<MetricShared<T>>,
}

#[derive(Debug)]
struct MetricShared<T> {
    observers: Mutex<BTreeMap<Attributes, T>>,
}

impl<T: MetricObserver> Clone for Metric<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            description: self.description,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: MetricObserver> Metric<T> {
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            shared: Arc::new(MetricShared {
                observers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Return the observer for `attributes`, creating it on first use.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T {
        let attributes = attributes.into();
        let mut observers = self.shared.observers.lock();
        observers.entry(attributes).or_default().clone()
    }

    /// Return the observer for `attributes`, or `None` if it was never
    /// created by [`Self::recorder`].
    pub fn get_observer(&self, attributes: &Attributes) -> Option<T> {
        let observers = self.shared.observers.lock();
        observers.get(attributes).cloned()
    }
}

/// A monotonic `u64` counter.
#[derive(Debug, Clone, Default)]
pub struct U64Counter {
    state: Arc<AtomicU64>,
}

impl U64Counter {
    /// Add `count`.
    pub fn inc(&self, count: u64) {
        self.state.fetch_add(count, Ordering::Relaxed);
    }

    /// Current value.
    pub fn fetch(&self) -> u64 {
        self.state.load(Ordering::Relaxed)
    }
}

impl MetricObserver for U64Counter {}

/// Aggregates duration samples: count and running total.
#[derive(Debug, Clone, Default)]
pub struct DurationHistogram {
    state: Arc<Mutex<DurationHistogramState>>,
}

#[derive(Debug, Default)]
struct DurationHistogramState {
    sample_count: u64,
    total: Duration,
}

impl DurationHistogram {
    /// Record one sample.
    pub fn record(&self, value: Duration) {
        let mut state = self.state.lock();
        state.sample_count += 1;
        state.total += value;
    }

    /// Snapshot the aggregate.
    pub fn fetch(&self) -> DurationHistogramObservation {
        let state = self.state.lock();
        DurationHistogramObservation {
            sample_count: state.sample_count,
            total: state.total,
        }
    }
}

impl MetricObserver for DurationHistogram {}

/// Point-in-time aggregate of a [`DurationHistogram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationHistogramObservation {
    sample_count: u64,
    total: Duration,
}

impl DurationHistogramObservation {
    /// Number of recorded samples.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Sum of all recorded samples.
    pub fn total(&self) -> Duration {
        self.total
    }
}

/// A sorted key-value set identifying one observer of a [`Metric`].
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attributes(BTreeMap<&'static str, Cow<'static, str>>);

impl Attributes {
    /// Insert or replace `key`.
    pub fn insert(&mut self, key: &'static str, value: impl Into<Cow<'static, str>>) {
        self.0.insert(key, value.into());
    }
}

impl<const N: usize> From<[(&'static str, &'static str); N]> for Attributes {
    fn from(pairs: [(&'static str, &'static str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k, Cow::Borrowed(v)))
                .collect(),
        )
    }
}

impl<const N: usize> From<&[(&'static str, &'static str); N]> for Attributes {
    fn from(pairs: &[(&'static str, &'static str); N]) -> Self {
        Self(
            pairs
                .iter()
                .map(|&(k, v)| (k, Cow::Borrowed(v)))
                .collect(),
        )
    }
}
