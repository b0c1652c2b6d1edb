//! Deterministic cache keys built from request filters
//!
//! Two filter sets that describe the same request must produce the same key no
//! matter in which order fields were added or list values were supplied.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Canonical serialization of a filter set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterKey(Arc<str>);

impl FilterKey {
    /// Start building a key for `scope` (e.g. `"timeline"`)
    #[inline]
    #[must_use]
    pub fn builder(scope: impl Into<String>) -> FilterKeyBuilder {
        FilterKeyBuilder {
            scope: scope.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Key as a string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builder for [`FilterKey`]
#[derive(Debug, Clone)]
pub struct FilterKeyBuilder {
    scope: String,
    fields: BTreeMap<String, String>,
}

impl FilterKeyBuilder {
    /// Add a scalar filter
    #[must_use]
    pub fn field(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.fields
            .insert(name.to_string(), escape(&value.to_string()));
        self
    }

    /// Add a scalar filter only when present
    #[must_use]
    pub fn optional(self, name: &str, value: Option<impl fmt::Display>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    /// Add a list-valued filter; values are sorted before joining
    #[must_use]
    pub fn list<I>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let mut values: Vec<String> = values
            .into_iter()
            .map(|v| escape(&v.to_string()))
            .collect();
        values.sort();
        self.fields.insert(name.to_string(), values.join(","));
        self
    }

    /// Produce the key
    #[must_use]
    pub fn build(self) -> FilterKey {
        let query = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), v))
            .collect::<Vec<_>>()
            .join("&");
        FilterKey(Arc::from(format!("{}?{}", self.scope, query)))
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            ',' => out.push_str("%2C"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn list_order_does_not_matter() {
        let a = FilterKey::builder("timeline")
            .list("lines", ["L2", "L1", "L3"])
            .field("from", "2024-05-01")
            .build();
        let b = FilterKey::builder("timeline")
            .field("from", "2024-05-01")
            .list("lines", ["L3", "L2", "L1"])
            .build();

        assert_eq!(a, b);
        assert_eq!(a.as_str(), "timeline?from=2024-05-01&lines=L1,L2,L3");
    }

    #[test]
    fn optional_fields_are_skipped() {
        let key = FilterKey::builder("oee")
            .optional("shift", None::<&str>)
            .optional("line", Some("L1"))
            .build();
        assert_eq!(key.as_str(), "oee?line=L1");
    }

    #[test]
    fn separators_in_values_cannot_collide() {
        let a = FilterKey::builder("t").list("lines", ["a,b"]).build();
        let b = FilterKey::builder("t").list("lines", ["a", "b"]).build();
        assert_ne!(a, b);
    }

    #[test]
    fn scopes_are_distinct() {
        let a = FilterKey::builder("timeline").field("line", "L1").build();
        let b = FilterKey::builder("history").field("line", "L1").build();
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn prop_permuted_lists_produce_equal_keys(
            mut lines in proptest::collection::vec("[A-Z][0-9]{1,3}", 0..8),
            seed in any::<u64>(),
        ) {
            let original = FilterKey::builder("timeline").list("lines", &lines).build();

            let len = lines.len();
            if len > 1 {
                lines.rotate_left((seed as usize) % len);
            }
            lines.reverse();
            let permuted = FilterKey::builder("timeline").list("lines", &lines).build();

            prop_assert_eq!(original, permuted);
        }
    }
}
