//! Metric mappings and comparison direction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name → scalar mapping produced by training, validation, and evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// The `loss` entry, checked per micro-step for numerical divergence.
    pub fn loss(&self) -> Option<f64> {
        self.get("loss")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of these metrics with every name prefixed (e.g. `val_`).
    pub fn prefixed(&self, prefix: &str) -> Metrics {
        self.0
            .iter()
            .map(|(k, v)| (format!("{prefix}{k}"), *v))
            .collect()
    }

    pub fn extend(&mut self, other: Metrics) {
        self.0.extend(other.0);
    }

    /// Arithmetic mean over metrics present in every entry of `all`.
    pub fn mean(all: &[Metrics]) -> Metrics {
        let Some(first) = all.first() else {
            return Metrics::new();
        };
        first
            .names()
            .filter(|name| all.iter().all(|m| m.get(name).is_some()))
            .map(|name| {
                let sum: f64 = all.iter().filter_map(|m| m.get(name)).sum();
                (name.to_string(), sum / all.len() as f64)
            })
            .collect()
    }
}

impl FromIterator<(String, f64)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, f64>> for Metrics {
    fn from(map: BTreeMap<String, f64>) -> Self {
        Self(map)
    }
}

/// Running per-name mean over the micro-steps of one epoch.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    sums: BTreeMap<String, f64>,
    counts: BTreeMap<String, usize>,
}

impl MetricsAccumulator {
    pub fn add(&mut self, metrics: &Metrics) {
        for (name, value) in metrics.iter() {
            *self.sums.entry(name.to_string()).or_default() += value;
            *self.counts.entry(name.to_string()).or_default() += 1;
        }
    }

    pub fn mean(&self) -> Metrics {
        self.sums
            .iter()
            .map(|(name, sum)| {
                let count = self.counts.get(name).copied().unwrap_or(1).max(1);
                (name.clone(), sum / count as f64)
            })
            .collect()
    }
}

/// Which way a monitored metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Lower is better (losses).
    #[serde(rename = "min")]
    ImprovesIfLess,
    /// Higher is better (accuracies).
    #[serde(rename = "max")]
    ImprovesIfGreater,
}

impl Direction {
    /// Whether `candidate` beats `best` by strictly more than `min_delta`.
    /// NaN never improves.
    pub fn improves(self, candidate: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Direction::ImprovesIfLess => candidate < best - min_delta,
            Direction::ImprovesIfGreater => candidate > best + min_delta,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ImprovesIfLess => write!(f, "min"),
            Direction::ImprovesIfGreater => write!(f, "max"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_direction_improves() {
        assert!(Direction::ImprovesIfLess.improves(0.9, 1.0, 0.0));
        assert!(!Direction::ImprovesIfLess.improves(1.0, 1.0, 0.0));
        assert!(!Direction::ImprovesIfLess.improves(0.95, 1.0, 0.1));
        assert!(Direction::ImprovesIfGreater.improves(0.8, 0.7, 0.05));
        assert!(!Direction::ImprovesIfGreater.improves(f64::NAN, 0.7, 0.0));
    }

    #[test]
    fn test_prefixed_and_extend() {
        let mut epoch = Metrics::new().with("loss", 0.5);
        epoch.extend(Metrics::new().with("loss", 0.7).prefixed("val_"));
        assert_eq!(epoch.get("loss"), Some(0.5));
        assert_eq!(epoch.get("val_loss"), Some(0.7));
        assert_eq!(epoch.len(), 2);
    }

    #[test]
    fn test_mean_skips_partial_metrics() {
        let folds = vec![
            Metrics::new().with("accuracy", 0.75).with("loss", 0.2),
            Metrics::new().with("accuracy", 0.25),
        ];
        let mean = Metrics::mean(&folds);
        assert_eq!(mean, Metrics::new().with("accuracy", 0.5));
        assert!(Metrics::mean(&[]).is_empty());
    }

    #[test]
    fn test_accumulator_means_per_name() {
        let mut acc = MetricsAccumulator::default();
        acc.add(&Metrics::new().with("loss", 1.0));
        acc.add(&Metrics::new().with("loss", 3.0).with("accuracy", 0.5));
        let mean = acc.mean();
        assert_eq!(mean.get("loss"), Some(2.0));
        assert_eq!(mean.get("accuracy"), Some(0.5));
    }

    #[test]
    fn test_direction_serde_names() {
        assert_eq!(
            serde_json::to_string(&Direction::ImprovesIfLess).unwrap(),
            "\"min\""
        );
        let parsed: Direction = serde_json::from_str("\"max\"").unwrap();
        assert_eq!(parsed, Direction::ImprovesIfGreater);
    }
}
