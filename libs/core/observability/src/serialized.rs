//! The serialized-metrics envelope.
//!
//! Collectors package backend-derived metrics into a self-describing opaque
//! byte blob. The orchestrator stores the blob next to the scrape result and
//! passes it back later for re-emission as live Prometheus metrics. Between
//! serialization and re-emission the live metric may have gained or lost
//! labels; re-emission rewrites each sample's label values through an index
//! mapping from the serialized label keys to the live ones, with missing
//! labels becoming empty strings.

use std::collections::BTreeMap;

use metrics::{gauge, Label};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SerializedMetricsError {
    #[error("cannot decode serialized metrics: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("sample for metric {metric} has {got} label values, expected {expected}")]
    LabelArity {
        metric: String,
        got: usize,
        expected: usize,
    },
}

/// One sample inside a serialized metric family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedSample {
    #[serde(rename = "Labels")]
    pub labels: Vec<String>,
    #[serde(rename = "Value")]
    pub value: f64,
}

/// One metric family: the label keys shared by all samples, and the samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SerializedMetricFamily {
    #[serde(rename = "lk")]
    pub label_keys: Vec<String>,
    #[serde(rename = "m")]
    pub samples: Vec<SerializedSample>,
}

impl SerializedMetricFamily {
    pub fn new(label_keys: Vec<String>) -> Self {
        Self {
            label_keys,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, labels: Vec<String>, value: f64) {
        self.samples.push(SerializedSample { labels, value });
    }
}

/// A full serialized-metrics blob: metric name to family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SerializedMetrics(pub BTreeMap<String, SerializedMetricFamily>);

impl SerializedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a blob. An empty blob decodes to an empty envelope, so old
    /// scrape rows without metrics remain readable.
    pub fn parse(blob: &[u8]) -> Result<Self, SerializedMetricsError> {
        if blob.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(blob)?)
    }

    /// Encodes the envelope. Empty envelopes encode to an empty blob to keep
    /// the stored representation minimal.
    pub fn to_blob(&self) -> Vec<u8> {
        if self.0.is_empty() {
            return Vec::new();
        }
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn insert(&mut self, name: impl Into<String>, family: SerializedMetricFamily) {
        self.0.insert(name.into(), family);
    }

    pub fn family(&self, name: &str) -> Option<&SerializedMetricFamily> {
        self.0.get(name)
    }

    /// Re-emits one metric family as live gauges.
    ///
    /// `live_label_keys` is the label-key list the metric carries today;
    /// `constant_labels` (such as `domain_id`, `project_id`, `capacitor_id`)
    /// are prepended to every sample. Absent metric names yield no output.
    pub fn emit(
        &self,
        name: &str,
        live_label_keys: &[&str],
        constant_labels: &[(&str, &str)],
    ) -> Result<(), SerializedMetricsError> {
        let Some(family) = self.0.get(name) else {
            return Ok(());
        };

        // One position lookup per live key, reused for every sample.
        let permutation: Vec<Option<usize>> = live_label_keys
            .iter()
            .map(|key| family.label_keys.iter().position(|have| have == key))
            .collect();

        for sample in &family.samples {
            if sample.labels.len() != family.label_keys.len() {
                return Err(SerializedMetricsError::LabelArity {
                    metric: name.to_string(),
                    got: sample.labels.len(),
                    expected: family.label_keys.len(),
                });
            }
            let values = remap_label_values(&permutation, &sample.labels);

            let mut labels: Vec<Label> = constant_labels
                .iter()
                .map(|(key, value)| Label::new(key.to_string(), value.to_string()))
                .collect();
            labels.extend(
                live_label_keys
                    .iter()
                    .zip(values)
                    .map(|(key, value)| Label::new(key.to_string(), value)),
            );

            gauge!(name.to_string(), labels).set(sample.value);
        }
        Ok(())
    }
}

/// Rewrites one sample's label values into the live key order. A `None` in
/// the permutation means the live key did not exist when the blob was
/// serialized; its value becomes the empty string.
fn remap_label_values(permutation: &[Option<usize>], values: &[String]) -> Vec<String> {
    permutation
        .iter()
        .map(|position| match position {
            Some(index) => values[*index].clone(),
            None => String::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> SerializedMetrics {
        let mut family = SerializedMetricFamily::new(vec!["az".into(), "flavor".into()]);
        family.push(vec!["az-1".into(), "small".into()], 3.0);
        family.push(vec!["az-2".into(), "big".into()], 5.0);

        let mut envelope = SerializedMetrics::new();
        envelope.insert("hypervisor_placements", family);
        envelope
    }

    #[test]
    fn blob_round_trip() {
        let envelope = sample_envelope();
        let blob = envelope.to_blob();
        let back = SerializedMetrics::parse(&blob).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn empty_blob_is_an_empty_envelope() {
        let envelope = SerializedMetrics::parse(b"").unwrap();
        assert!(envelope.0.is_empty());
        assert!(envelope.to_blob().is_empty());
    }

    #[test]
    fn wire_format_uses_short_keys() {
        let blob = sample_envelope().to_blob();
        let value: serde_json::Value = serde_json::from_slice(&blob).unwrap();
        assert_eq!(
            value["hypervisor_placements"]["lk"],
            serde_json::json!(["az", "flavor"])
        );
        assert_eq!(
            value["hypervisor_placements"]["m"][0]["Labels"],
            serde_json::json!(["az-1", "small"])
        );
        assert_eq!(
            value["hypervisor_placements"]["m"][0]["Value"],
            serde_json::json!(3.0)
        );
    }

    #[test]
    fn label_remapping_handles_added_and_removed_keys() {
        // Serialized with [az, flavor]; live metric now has [flavor, node, az].
        let family = SerializedMetricFamily {
            label_keys: vec!["az".into(), "flavor".into()],
            samples: vec![SerializedSample {
                labels: vec!["az-1".into(), "small".into()],
                value: 1.0,
            }],
        };
        let live = ["flavor", "node", "az"];
        let permutation: Vec<Option<usize>> = live
            .iter()
            .map(|key| family.label_keys.iter().position(|have| have == key))
            .collect();

        let values = remap_label_values(&permutation, &family.samples[0].labels);
        assert_eq!(values, vec!["small".to_string(), String::new(), "az-1".to_string()]);
    }

    #[test]
    fn emitting_absent_metric_is_a_no_op() {
        let envelope = sample_envelope();
        envelope.emit("no_such_metric", &["az"], &[]).unwrap();
    }

    #[test]
    fn emitting_detects_arity_mismatch() {
        let mut family = SerializedMetricFamily::new(vec!["az".into()]);
        family.samples.push(SerializedSample {
            labels: vec!["az-1".into(), "extra".into()],
            value: 1.0,
        });
        let mut envelope = SerializedMetrics::new();
        envelope.insert("broken", family);

        assert!(envelope.emit("broken", &["az"], &[]).is_err());
    }
}
