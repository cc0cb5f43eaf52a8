//! Dispatch hints: pass-through routing metadata for the identity provider.
//!
//! The relay attaches no meaning to any hint. `labels` travels as the
//! `X-Labels` header; every selector travels as a query parameter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque bag of optional string-valued hints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchHints {
    /// Value for the `X-Labels` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    /// Query-string selectors, forwarded in key order.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,
}

impl DispatchHints {
    /// Empty hint bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the labels header value.
    #[must_use]
    pub fn with_labels(mut self, labels: impl Into<String>) -> Self {
        self.labels = Some(labels.into());
        self
    }

    /// Add one selector. Blank values are dropped.
    #[must_use]
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            let _ = self.selectors.insert(key.into(), value);
        }
        self
    }

    /// Collect selectors from request query parameters, skipping `reserved`
    /// keys (identifiers the relay consumes itself) and blank values.
    pub fn from_query<'a, I>(params: I, reserved: &[&str]) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        params
            .into_iter()
            .filter(|(key, _)| !reserved.contains(&key.as_str()))
            .fold(Self::new(), |hints, (key, value)| {
                hints.with_selector(key.clone(), value.clone())
            })
    }

    /// Layer `self` over `defaults`: keys present in `self` win.
    #[must_use]
    pub fn over(self, defaults: &Self) -> Self {
        let mut selectors = defaults.selectors.clone();
        selectors.extend(self.selectors);
        Self {
            labels: self.labels.or_else(|| defaults.labels.clone()),
            selectors,
        }
    }

    /// Whether no hint is set.
    pub fn is_empty(&self) -> bool {
        self.labels.is_none() && self.selectors.is_empty()
    }

    /// Selectors as `(key, value)` query pairs.
    pub fn query_pairs(&self) -> Vec<(&str, &str)> {
        self.selectors
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}
