//! Plaintext data model: lift metrics, shards, visibility policy and the
//! final aggregation result.

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Add,
};

use serde::{Deserialize, Serialize};

use crate::exec::Role;

/// Advertising lift measurement counts for one group of users.
///
/// Plaintext before sharing, a tuple of oblivious integers after. All counts
/// must be non-negative and fit in the configured bit width; out-of-range
/// values are truncated at share time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftMetrics {
    /// Number of ad impressions attributed to the group.
    pub impressions: i64,
    /// Number of conversions attributed to the group.
    pub conversions: i64,
    /// Number of users in the group's test population.
    pub test_population: i64,
    /// Number of users in the group's control population.
    pub control_population: i64,
}

impl LiftMetrics {
    /// Returns the value of the given metric field.
    pub fn field(&self, field: MetricField) -> i64 {
        match field {
            MetricField::Impressions => self.impressions,
            MetricField::Conversions => self.conversions,
            MetricField::TestPopulation => self.test_population,
            MetricField::ControlPopulation => self.control_population,
        }
    }
}

impl Add for LiftMetrics {
    type Output = LiftMetrics;

    fn add(self, rhs: LiftMetrics) -> LiftMetrics {
        LiftMetrics {
            impressions: self.impressions + rhs.impressions,
            conversions: self.conversions + rhs.conversions,
            test_population: self.test_population + rhs.test_population,
            control_population: self.control_population + rhs.control_population,
        }
    }
}

/// One metric field of [`LiftMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricField {
    /// The `impressions` field.
    Impressions,
    /// The `conversions` field.
    Conversions,
    /// The `test_population` field.
    TestPopulation,
    /// The `control_population` field.
    ControlPopulation,
}

impl MetricField {
    /// All metric fields, in their fixed protocol order.
    pub const ALL: [MetricField; 4] = [
        MetricField::Impressions,
        MetricField::Conversions,
        MetricField::TestPopulation,
        MetricField::ControlPopulation,
    ];

    /// The position of this field in [`MetricField::ALL`].
    pub fn index(self) -> usize {
        match self {
            MetricField::Impressions => 0,
            MetricField::Conversions => 1,
            MetricField::TestPopulation => 2,
            MetricField::ControlPopulation => 3,
        }
    }
}

/// Public configuration stating which metric fields may be revealed to both
/// parties at the end of the run.
///
/// Fields not in the policy are never materialized as plaintext: their
/// oblivious sums are simply dropped without a reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityPolicy {
    visible: BTreeSet<MetricField>,
}

impl VisibilityPolicy {
    /// A policy revealing every metric field.
    pub fn all() -> Self {
        VisibilityPolicy {
            visible: MetricField::ALL.into_iter().collect(),
        }
    }

    /// A policy revealing only the given metric fields.
    pub fn only(fields: impl IntoIterator<Item = MetricField>) -> Self {
        VisibilityPolicy {
            visible: fields.into_iter().collect(),
        }
    }

    /// Whether the given field may be revealed.
    pub fn allows(&self, field: MetricField) -> bool {
        self.visible.contains(&field)
    }
}

/// A mapping from public group keys to lift metrics.
///
/// Group keys are public configuration; only the metric values are secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedLiftMetrics {
    /// The per-group metrics, keyed by the public group key.
    pub groups: BTreeMap<String, LiftMetrics>,
}

impl GroupedLiftMetrics {
    /// Projects the metrics onto a fixed public ordering of group keys,
    /// filling in zero metrics for groups absent from this mapping.
    pub fn aligned(&self, group_keys: &[String]) -> Vec<LiftMetrics> {
        group_keys
            .iter()
            .map(|k| self.groups.get(k).copied().unwrap_or_default())
            .collect()
    }
}

impl Add for GroupedLiftMetrics {
    type Output = GroupedLiftMetrics;

    fn add(self, rhs: GroupedLiftMetrics) -> GroupedLiftMetrics {
        let mut groups = self.groups;
        for (key, metrics) in rhs.groups {
            let entry = groups.entry(key).or_default();
            *entry = *entry + metrics;
        }
        GroupedLiftMetrics { groups }
    }
}

/// One partition of the overall dataset.
///
/// A shard is owned exclusively by the party that produced it; the non-owning
/// party holds only the placeholder variant for protocol alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    /// The party that owns this shard's plaintext.
    pub owner: Role,
    /// The shard's metrics; `None` on the non-owning side.
    pub data: Option<GroupedLiftMetrics>,
}

impl Shard {
    /// A shard with local plaintext data, for the owning party.
    pub fn owned(owner: Role, data: GroupedLiftMetrics) -> Self {
        Shard {
            owner,
            data: Some(data),
        }
    }

    /// A declared placeholder for a shard owned by the other party.
    pub fn placeholder(owner: Role) -> Self {
        Shard { owner, data: None }
    }
}

/// The revealed metrics of one group, holding plaintext only for fields the
/// visibility policy permitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedMetrics {
    /// Revealed `impressions` sum, if visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impressions: Option<i64>,
    /// Revealed `conversions` sum, if visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversions: Option<i64>,
    /// Revealed `test_population` sum, if visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_population: Option<i64>,
    /// Revealed `control_population` sum, if visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_population: Option<i64>,
}

impl RevealedMetrics {
    pub(crate) fn set(&mut self, field: MetricField, value: i64) {
        match field {
            MetricField::Impressions => self.impressions = Some(value),
            MetricField::Conversions => self.conversions = Some(value),
            MetricField::TestPopulation => self.test_population = Some(value),
            MetricField::ControlPopulation => self.control_population = Some(value),
        }
    }

    /// Returns the revealed value of the given metric field, if visible.
    pub fn field(&self, field: MetricField) -> Option<i64> {
        match field {
            MetricField::Impressions => self.impressions,
            MetricField::Conversions => self.conversions,
            MetricField::TestPopulation => self.test_population,
            MetricField::ControlPopulation => self.control_population,
        }
    }
}

/// The final plaintext result of one aggregation run.
///
/// Any group whose population stayed below the threshold has all its fields
/// replaced by the suppression marker (zero); fields excluded by the
/// visibility policy are absent entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// The public k-anonymity threshold the run was executed with.
    pub threshold: i64,
    /// The revealed per-group metric sums, keyed by the public group key.
    pub groups: BTreeMap<String, RevealedMetrics>,
}
