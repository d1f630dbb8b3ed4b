//! Gauge registry
//!
//! Owns every gauge the exporter publishes. Gauges are registered once at
//! startup and written by the transformation pipeline at runtime; the HTTP
//! endpoint only reads snapshots.
//!
//! # Example
//!
//! ```ignore
//! use std::collections::BTreeMap;
//! use mqtt_exporter::registry::{CardinalityPolicy, GaugeRegistry, MetricIdentity};
//!
//! let registry = GaugeRegistry::new(CardinalityPolicy::Unbounded);
//! let handle = registry.register(MetricIdentity::new("mqtt", "temperature", ["room"]))?;
//!
//! let labels = BTreeMap::from([("room".to_string(), "kitchen".to_string())]);
//! registry.set(&handle, &labels, 21.3)?;
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::transformer::{MetricType, PrometheusMetric};

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Same fully qualified name and label set registered twice
    #[error("metric '{name}' is already registered")]
    Duplicate { name: String },

    /// Same fully qualified name registered with a different label set
    #[error(
        "metric '{name}' is already registered with labels [{existing}], \
         cannot register it again with labels [{requested}]"
    )]
    ConflictingLabels {
        name: String,
        existing: String,
        requested: String,
    },

    /// Update with a label set that differs from the registered one
    #[error("labels [{got}] do not match the registered labels [{expected}] of metric '{name}'")]
    LabelMismatch {
        name: String,
        expected: String,
        got: String,
    },
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// How many label combinations a single gauge may track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardinalityPolicy {
    /// Keep every label combination ever written
    #[default]
    Unbounded,
    /// Keep at most N combinations per gauge, evicting the least recently
    /// written one when a new combination arrives
    Lru(NonZeroUsize),
}

impl CardinalityPolicy {
    /// Build a policy from a configured limit, where 0 means unbounded
    pub fn from_limit(limit: usize) -> Self {
        match NonZeroUsize::new(limit) {
            Some(n) => CardinalityPolicy::Lru(n),
            None => CardinalityPolicy::Unbounded,
        }
    }

    fn new_cache(&self) -> LruCache<Vec<String>, f64> {
        match self {
            CardinalityPolicy::Unbounded => LruCache::unbounded(),
            CardinalityPolicy::Lru(n) => LruCache::new(*n),
        }
    }
}

/// Identity of a gauge: namespace, name and the set of label names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricIdentity {
    /// Metric namespace (prefix), may be empty
    pub namespace: String,
    /// Metric name within the namespace
    pub name: String,
    /// Label names every update must provide
    pub label_names: BTreeSet<String>,
    /// Optional help text for the scrape output
    pub help: Option<String>,
}

impl MetricIdentity {
    /// Create a new identity
    pub fn new<I, S>(namespace: impl Into<String>, name: impl Into<String>, label_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            label_names: label_names.into_iter().map(Into::into).collect(),
            help: None,
        }
    }

    /// Set the help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Fully qualified metric name, `namespace_name`
    pub fn fq_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.namespace, self.name)
        }
    }
}

struct GaugeFamily {
    name: String,
    help: Option<String>,
    /// Sorted label names
    label_names: Vec<String>,
    series: Mutex<LruCache<Vec<String>, f64>>,
    evicted: AtomicU64,
}

impl GaugeFamily {
    fn label_values(&self, labels: &BTreeMap<String, String>) -> RegistryResult<Vec<String>> {
        if labels.len() != self.label_names.len()
            || !labels.keys().eq(self.label_names.iter())
        {
            return Err(RegistryError::LabelMismatch {
                name: self.name.clone(),
                expected: self.label_names.join(","),
                got: labels.keys().cloned().collect::<Vec<_>>().join(","),
            });
        }

        Ok(labels.values().cloned().collect())
    }

    fn set(&self, labels: &BTreeMap<String, String>, value: f64) -> RegistryResult<()> {
        let key = self.label_values(labels)?;

        let mut series = self.series.lock();
        if let Some(existing) = series.get_mut(&key) {
            *existing = value;
            return Ok(());
        }

        if let Some((evicted, _)) = series.push(key, value) {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                metric = %self.name,
                labels = ?evicted,
                "Series limit reached, evicted least recently updated series"
            );
        }

        Ok(())
    }

    fn get(&self, labels: &BTreeMap<String, String>) -> Option<f64> {
        let key = self.label_values(labels).ok()?;
        self.series.lock().peek(&key).copied()
    }

    fn snapshot(&self) -> GaugeSnapshot {
        let mut series: Vec<(Vec<String>, f64)> = {
            let guard = self.series.lock();
            guard.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        series.sort_by(|a, b| a.0.cmp(&b.0));

        GaugeSnapshot {
            name: self.name.clone(),
            help: self.help.clone(),
            label_names: self.label_names.clone(),
            series,
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Handle returned by registration, used for updates
#[derive(Clone)]
pub struct GaugeHandle(Arc<GaugeFamily>);

impl GaugeHandle {
    /// Fully qualified metric name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Registered label names, sorted
    pub fn label_names(&self) -> &[String] {
        &self.0.label_names
    }
}

impl std::fmt::Debug for GaugeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeHandle")
            .field("name", &self.0.name)
            .field("label_names", &self.0.label_names)
            .finish()
    }
}

/// Point-in-time copy of one gauge and all of its series
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSnapshot {
    /// Fully qualified metric name
    pub name: String,
    /// Help text
    pub help: Option<String>,
    /// Sorted label names
    pub label_names: Vec<String>,
    /// Label values (in `label_names` order) and current value, sorted
    pub series: Vec<(Vec<String>, f64)>,
    /// Number of series evicted by the cardinality policy
    pub evicted: u64,
}

/// Cardinality figures of one gauge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesStats {
    /// Fully qualified metric name
    pub name: String,
    /// Number of label combinations currently stored
    pub series: usize,
    /// Number of label combinations evicted so far
    pub evicted: u64,
}

/// Thread-safe gauge registry
pub struct GaugeRegistry {
    policy: CardinalityPolicy,
    families: RwLock<BTreeMap<String, Arc<GaugeFamily>>>,
}

impl GaugeRegistry {
    /// Create an empty registry with the given cardinality policy
    pub fn new(policy: CardinalityPolicy) -> Self {
        Self {
            policy,
            families: RwLock::new(BTreeMap::new()),
        }
    }

    /// The cardinality policy applied to every gauge
    pub fn policy(&self) -> CardinalityPolicy {
        self.policy
    }

    /// Register a single gauge
    ///
    /// # Errors
    ///
    /// Fails if a gauge with the same fully qualified name already exists.
    pub fn register(&self, identity: MetricIdentity) -> RegistryResult<GaugeHandle> {
        let mut handles = self.register_all(std::slice::from_ref(&identity))?;
        Ok(handles.remove(0))
    }

    /// Register several gauges at once
    ///
    /// Either every identity is registered or none is.
    pub fn register_all(&self, identities: &[MetricIdentity]) -> RegistryResult<Vec<GaugeHandle>> {
        let mut families = self.families.write();

        let mut pending: HashMap<String, &MetricIdentity> = HashMap::new();
        for identity in identities {
            let name = identity.fq_name();
            let existing = families
                .get(&name)
                .map(|f| f.label_names.iter().cloned().collect::<BTreeSet<_>>())
                .or_else(|| pending.get(&name).map(|i| i.label_names.clone()));

            if let Some(existing) = existing {
                if existing == identity.label_names {
                    return Err(RegistryError::Duplicate { name });
                }
                return Err(RegistryError::ConflictingLabels {
                    name,
                    existing: existing.into_iter().collect::<Vec<_>>().join(","),
                    requested: identity
                        .label_names
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(","),
                });
            }

            pending.insert(name, identity);
        }

        let handles = identities
            .iter()
            .map(|identity| {
                let family = Arc::new(GaugeFamily {
                    name: identity.fq_name(),
                    help: identity.help.clone(),
                    label_names: identity.label_names.iter().cloned().collect(),
                    series: Mutex::new(self.policy.new_cache()),
                    evicted: AtomicU64::new(0),
                });
                families.insert(family.name.clone(), Arc::clone(&family));
                GaugeHandle(family)
            })
            .collect();

        Ok(handles)
    }

    /// Set a gauge value for a label combination
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::LabelMismatch` when the label keys differ from
    /// the registered label names. Nothing is written in that case.
    pub fn set(
        &self,
        handle: &GaugeHandle,
        labels: &BTreeMap<String, String>,
        value: f64,
    ) -> RegistryResult<()> {
        handle.0.set(labels, value)
    }

    /// Current value for a label combination, without touching LRU order
    pub fn get(&self, handle: &GaugeHandle, labels: &BTreeMap<String, String>) -> Option<f64> {
        handle.0.get(labels)
    }

    /// Number of registered gauges
    pub fn len(&self) -> usize {
        self.families.read().len()
    }

    /// Check if no gauge is registered
    pub fn is_empty(&self) -> bool {
        self.families.read().is_empty()
    }

    /// Snapshot every gauge, ordered by name
    pub fn gather(&self) -> Vec<GaugeSnapshot> {
        let families: Vec<Arc<GaugeFamily>> = self.families.read().values().cloned().collect();
        families.iter().map(|f| f.snapshot()).collect()
    }

    /// Series count and eviction count of every gauge, ordered by name
    pub fn series_stats(&self) -> Vec<SeriesStats> {
        self.families
            .read()
            .values()
            .map(|f| SeriesStats {
                name: f.name.clone(),
                series: f.series.lock().len(),
                evicted: f.evicted.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Convert the current state into metrics ready for formatting
    pub fn to_prometheus_metrics(&self) -> Vec<PrometheusMetric> {
        let mut metrics = Vec::new();

        for snapshot in self.gather() {
            for (values, value) in &snapshot.series {
                let mut metric =
                    PrometheusMetric::new(&snapshot.name, *value).with_type(MetricType::Gauge);
                if let Some(help) = &snapshot.help {
                    metric = metric.with_help(help);
                }
                for (name, label_value) in snapshot.label_names.iter().zip(values) {
                    metric = metric.with_label(name, label_value);
                }
                metrics.push(metric);
            }
        }

        metrics
    }
}

impl Default for GaugeRegistry {
    fn default() -> Self {
        Self::new(CardinalityPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fq_name() {
        assert_eq!(
            MetricIdentity::new("mqtt", "temp", Vec::<String>::new()).fq_name(),
            "mqtt_temp"
        );
        assert_eq!(
            MetricIdentity::new("", "temp", Vec::<String>::new()).fq_name(),
            "temp"
        );
    }

    #[test]
    fn test_register_and_set() {
        let registry = GaugeRegistry::default();
        let handle = registry
            .register(MetricIdentity::new("mqtt", "temp", ["room"]))
            .unwrap();

        let kitchen = labels(&[("room", "kitchen")]);
        registry.set(&handle, &kitchen, 21.3).unwrap();
        assert_eq!(registry.get(&handle, &kitchen), Some(21.3));

        registry.set(&handle, &kitchen, 19.0).unwrap();
        assert_eq!(registry.get(&handle, &kitchen), Some(19.0));
        assert_eq!(registry.gather()[0].series.len(), 1);
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = GaugeRegistry::default();
        registry
            .register(MetricIdentity::new("mqtt", "temp", ["room"]))
            .unwrap();

        let err = registry
            .register(MetricIdentity::new("mqtt", "temp", ["room"]))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                name: "mqtt_temp".to_string()
            }
        );

        let err = registry
            .register(MetricIdentity::new("mqtt", "temp", ["floor"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ConflictingLabels { .. }));
    }

    #[test]
    fn test_register_all_is_atomic() {
        let registry = GaugeRegistry::default();
        let result = registry.register_all(&[
            MetricIdentity::new("mqtt", "a", Vec::<String>::new()),
            MetricIdentity::new("mqtt", "b", Vec::<String>::new()),
            MetricIdentity::new("mqtt", "a", Vec::<String>::new()),
        ]);
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_label_mismatch_rejected() {
        let registry = GaugeRegistry::default();
        let handle = registry
            .register(MetricIdentity::new("mqtt", "temp", ["room", "floor"]))
            .unwrap();

        let partial = labels(&[("room", "kitchen")]);
        assert!(matches!(
            registry.set(&handle, &partial, 1.0),
            Err(RegistryError::LabelMismatch { .. })
        ));

        let wrong = labels(&[("room", "kitchen"), ("house", "1")]);
        assert!(registry.set(&handle, &wrong, 1.0).is_err());
        assert!(registry.gather()[0].series.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let registry = GaugeRegistry::new(CardinalityPolicy::from_limit(2));
        let handle = registry
            .register(MetricIdentity::new("mqtt", "temp", ["room"]))
            .unwrap();

        registry.set(&handle, &labels(&[("room", "a")]), 1.0).unwrap();
        registry.set(&handle, &labels(&[("room", "b")]), 2.0).unwrap();
        // Refresh "a" so that "b" becomes the least recently written series
        registry.set(&handle, &labels(&[("room", "a")]), 3.0).unwrap();
        registry.set(&handle, &labels(&[("room", "c")]), 4.0).unwrap();

        assert_eq!(registry.get(&handle, &labels(&[("room", "a")])), Some(3.0));
        assert_eq!(registry.get(&handle, &labels(&[("room", "b")])), None);
        assert_eq!(registry.get(&handle, &labels(&[("room", "c")])), Some(4.0));

        let snapshot = &registry.gather()[0];
        assert_eq!(snapshot.series.len(), 2);
        assert_eq!(snapshot.evicted, 1);

        let stats = registry.series_stats();
        assert_eq!(stats[0].series, 2);
        assert_eq!(stats[0].evicted, 1);
    }

    #[test]
    fn test_policy_from_limit() {
        assert_eq!(CardinalityPolicy::from_limit(0), CardinalityPolicy::Unbounded);
        assert!(matches!(
            CardinalityPolicy::from_limit(10),
            CardinalityPolicy::Lru(n) if n.get() == 10
        ));
    }

    #[test]
    fn test_gather_is_sorted() {
        let registry = GaugeRegistry::default();
        let b = registry
            .register(MetricIdentity::new("mqtt", "b", ["k"]))
            .unwrap();
        let a = registry
            .register(MetricIdentity::new("mqtt", "a", Vec::<String>::new()))
            .unwrap();

        registry.set(&b, &labels(&[("k", "z")]), 1.0).unwrap();
        registry.set(&b, &labels(&[("k", "y")]), 2.0).unwrap();
        registry.set(&a, &BTreeMap::new(), 3.0).unwrap();

        let snapshots = registry.gather();
        assert_eq!(snapshots[0].name, "mqtt_a");
        assert_eq!(snapshots[1].name, "mqtt_b");
        assert_eq!(snapshots[1].series[0].0, vec!["y".to_string()]);
    }

    #[test]
    fn test_to_prometheus_metrics() {
        let registry = GaugeRegistry::default();
        let handle = registry
            .register(MetricIdentity::new("mqtt", "temp", ["room"]).with_help("Temperature"))
            .unwrap();
        registry
            .set(&handle, &labels(&[("room", "kitchen")]), 21.5)
            .unwrap();

        let metrics = registry.to_prometheus_metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "mqtt_temp");
        assert_eq!(metrics[0].value, 21.5);
        assert_eq!(metrics[0].metric_type, MetricType::Gauge);
        assert_eq!(metrics[0].help.as_deref(), Some("Temperature"));
        assert_eq!(metrics[0].labels.get("room").map(String::as_str), Some("kitchen"));
    }

    #[test]
    fn test_concurrent_writers() {
        let registry = Arc::new(GaugeRegistry::default());
        let handle = registry
            .register(MetricIdentity::new("mqtt", "temp", ["room"]))
            .unwrap();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let room = format!("room{}", j % 10);
                        registry
                            .set(&handle, &labels(&[("room", room.as_str())]), i as f64)
                            .unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.gather()[0].series.len(), 10);
    }
}
