// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Feature sets and selector/filter queries.
//
// Every derived image carries the set of transformations already applied to it
// ("binarized", "despeckled", ...). On disk the set is a comma-joined string;
// in memory it is an ordered list with set semantics for matching.

use serde::{Deserialize, Serialize};

/// Ordered set of feature labels.
///
/// Insertion order is kept for serialization only. Equality, subset and
/// disjointness tests ignore order. Empty labels and duplicates are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FeatureSet {
    labels: Vec<String>,
}

impl FeatureSet {
    /// The empty feature set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list such as `"binarized,despeckled"`.
    ///
    /// Whitespace around labels is trimmed.
    pub fn parse(text: &str) -> Self {
        let mut set = Self::new();
        for label in text.split(',') {
            set.insert(label);
        }
        set
    }

    /// Add a label at the end unless it is empty or already present.
    /// Returns `true` if the set changed.
    pub fn insert(&mut self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() || self.contains(label) {
            return false;
        }
        self.labels.push(label.to_owned());
        true
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, label: &str) -> Self {
        self.insert(label);
        self
    }

    /// All labels of `self` followed by the labels of `other` not yet present.
    pub fn union(&self, other: &FeatureSet) -> FeatureSet {
        let mut merged = self.clone();
        for label in &other.labels {
            merged.insert(label);
        }
        merged
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// `true` when every label of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &FeatureSet) -> bool {
        self.labels.iter().all(|l| other.contains(l))
    }

    /// `true` when `self` and `other` share no label.
    pub fn is_disjoint(&self, other: &FeatureSet) -> bool {
        !self.labels.iter().any(|l| other.contains(l))
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl PartialEq for FeatureSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset_of(other)
    }
}

impl Eq for FeatureSet {}

impl std::fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.labels.join(","))
    }
}

impl From<String> for FeatureSet {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<&str> for FeatureSet {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<FeatureSet> for String {
    fn from(set: FeatureSet) -> Self {
        set.to_string()
    }
}

/// Selector/filter pair used to choose among the derived images of a node.
///
/// A feature set matches iff every selector label is present and no filter
/// label is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Labels that must be present.
    pub selector: FeatureSet,
    /// Labels that must be absent.
    pub filter: FeatureSet,
}

impl Query {
    pub fn new(selector: impl Into<FeatureSet>, filter: impl Into<FeatureSet>) -> Self {
        Self {
            selector: selector.into(),
            filter: filter.into(),
        }
    }

    /// Query that matches every feature set.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, features: &FeatureSet) -> bool {
        self.selector.is_subset_of(features) && self.filter.is_disjoint(features)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "selector '{}', filter '{}'", self.selector, self.filter)
    }
}
