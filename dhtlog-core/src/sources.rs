//! Known sources and response columns
//!
//! The deployment has a small fixed set of sensor nodes. Each node is
//! identified on the wire by its host address and shown to people under a
//! short alias (`in`, `out`). Aggregation responses flatten the
//! `{source, metric}` matrix into columns named `<alias>_<label>`:
//!
//! ```text
//!             temp        hum
//! in  -> in_temp     in_humidity
//! out -> out_temp    out_humidity
//! ```
//!
//! The same registry decides which hosts ingestion accepts and how the
//! latest-value endpoint labels its entries.

use std::str::FromStr;

use crate::errors::ValidationError;
use crate::reading::{SourceId, HUMIDITY, TEMPERATURE};

/// One known sensor node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Identity on the wire (the node's host address)
    pub id: SourceId,
    /// Human-friendly alias used in responses
    pub alias: String,
}

impl Source {
    /// Source `id` shown as `alias`
    pub fn new(id: impl Into<SourceId>, alias: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: alias.into(),
        }
    }
}

impl FromStr for Source {
    type Err = ValidationError;

    /// Parse `HOST=ALIAS`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((host, alias)) if !host.trim().is_empty() && !alias.trim().is_empty() => {
                Ok(Self::new(host.trim(), alias.trim()))
            }
            _ => Err(ValidationError::InvalidSourceSpec(s.to_string())),
        }
    }
}

/// One flattened response column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// `<alias>_<label>`
    pub name: String,
    /// Source the column reads from
    pub source: SourceId,
    /// Metric the column reads from
    pub metric: String,
}

/// Registry of known sources and tracked metrics
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRegistry {
    sources: Vec<Source>,
    metrics: Vec<(String, String)>,
}

impl Default for SourceRegistry {
    /// The two-node indoor/outdoor deployment
    fn default() -> Self {
        Self::new([
            Source::new("10.0.0.32", "in"),
            Source::new("10.0.0.31", "out"),
        ])
    }
}

impl SourceRegistry {
    /// Registry tracking temperature and humidity for `sources`
    ///
    /// A later entry with an already registered id replaces the earlier one.
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        let mut registry = Self {
            sources: Vec::new(),
            metrics: vec![
                (TEMPERATURE.to_string(), "temp".to_string()),
                (HUMIDITY.to_string(), "humidity".to_string()),
            ],
        };
        for source in sources {
            registry.add_source(source);
        }
        registry
    }

    /// Register (or re-alias) a source
    pub fn add_source(&mut self, source: Source) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => existing.alias = source.alias,
            None => self.sources.push(source),
        }
    }

    /// Track an additional metric under a response label
    pub fn with_metric(mut self, metric: impl Into<String>, label: impl Into<String>) -> Self {
        let metric = metric.into();
        let label = label.into();
        match self.metrics.iter_mut().find(|(m, _)| *m == metric) {
            Some(existing) => existing.1 = label,
            None => self.metrics.push((metric, label)),
        }
        self
    }

    /// Look up a source by its wire identity
    pub fn resolve(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id.as_str() == id)
    }

    /// Alias of a known source
    pub fn alias(&self, id: &SourceId) -> Option<&str> {
        self.resolve(id.as_str()).map(|s| s.alias.as_str())
    }

    /// Known sources in registration order
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Tracked metrics as `(metric, label)` pairs
    pub fn metrics(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metrics.iter().map(|(m, l)| (m.as_str(), l.as_str()))
    }

    /// Whether `metric` is tracked
    pub fn tracks_metric(&self, metric: &str) -> bool {
        self.metrics.iter().any(|(m, _)| m == metric)
    }

    /// Response columns, sources outer, metrics inner
    pub fn columns(&self) -> Vec<Column> {
        self.sources
            .iter()
            .flat_map(|source| {
                self.metrics.iter().map(move |(metric, label)| Column {
                    name: format!("{}_{}", source.alias, label),
                    source: source.id.clone(),
                    metric: metric.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_columns() {
        let names: Vec<_> = SourceRegistry::default()
            .columns()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["in_temp", "in_humidity", "out_temp", "out_humidity"]);
    }

    #[test]
    fn resolve_known_and_unknown() {
        let registry = SourceRegistry::default();
        assert_eq!(registry.resolve("10.0.0.31").map(|s| s.alias.as_str()), Some("out"));
        assert!(registry.resolve("10.0.0.99").is_none());
        assert_eq!(registry.alias(&"10.0.0.32".into()), Some("in"));
    }

    #[test]
    fn parse_source_spec() {
        let source: Source = "10.0.0.40 = garage".parse().unwrap();
        assert_eq!(source, Source::new("10.0.0.40", "garage"));

        for bad in ["10.0.0.40", "=garage", "10.0.0.40=", ""] {
            assert!(matches!(
                bad.parse::<Source>(),
                Err(ValidationError::InvalidSourceSpec(_))
            ));
        }
    }

    #[test]
    fn re_registering_replaces_alias() {
        let mut registry = SourceRegistry::new([Source::new("a", "one")]);
        registry.add_source(Source::new("a", "uno"));
        assert_eq!(registry.sources().len(), 1);
        assert_eq!(registry.alias(&"a".into()), Some("uno"));
    }

    #[test]
    fn extra_metric_adds_columns() {
        let registry = SourceRegistry::new([Source::new("a", "lab")]).with_metric("co2", "co2");
        assert!(registry.tracks_metric("co2"));
        let names: Vec<_> = registry.columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["lab_temp", "lab_humidity", "lab_co2"]);
    }
}
