//! Deterministic request keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::Arc;

use url::form_urlencoded::byte_serialize;

/// Identity of a logical, deduplicable request.
///
/// Built from an operation name and its normalized parameters: id lists are
/// sorted and deduplicated and parameters are ordered by name, so two calls
/// with the same effective parameters always produce the same key regardless
/// of argument order. The operation, parameter names and values are
/// form-encoded, so a separator inside a value can never be mistaken for a
/// parameter boundary.
///
/// # Example
///
/// ```rust
/// use market_data_client::coordinator::RequestKey;
///
/// let a = RequestKey::builder("quotes").ids([1027, 1]).param("convert", "USD").build();
/// let b = RequestKey::builder("quotes").param("convert", "USD").ids([1, 1027, 1]).build();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "quotes|convert=USD|ids=1,1027");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    /// Start building a key for an operation.
    pub fn builder(operation: impl Into<String>) -> RequestKeyBuilder {
        RequestKeyBuilder::new(operation)
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for RequestKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

/// Builder for [`RequestKey`].
#[derive(Debug, Clone)]
pub struct RequestKeyBuilder {
    operation: String,
    params: BTreeMap<String, String>,
}

impl RequestKeyBuilder {
    /// Create a builder for an operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a named parameter. Setting the same name twice keeps the last value.
    pub fn param(self, name: impl AsRef<str>, value: impl Display) -> Self {
        let value = encode(&value.to_string());
        self.insert_encoded(name, value)
    }

    /// Add a parameter only when it is present.
    pub fn param_opt(self, name: impl AsRef<str>, value: Option<impl Display>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Add an id list under the `ids` parameter, sorted and deduplicated.
    pub fn ids<I, T>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Ord + Display,
    {
        let ids: BTreeSet<T> = ids.into_iter().collect();
        let joined = ids
            .iter()
            .map(|id| encode(&id.to_string()))
            .collect::<Vec<_>>()
            .join(",");
        self.insert_encoded("ids", joined)
    }

    fn insert_encoded(mut self, name: impl AsRef<str>, value: String) -> Self {
        self.params.insert(encode(name.as_ref()), value);
        self
    }

    /// Build the key.
    pub fn build(self) -> RequestKey {
        let mut key = encode(&self.operation);
        for (name, value) in &self.params {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        RequestKey::from(key)
    }
}

fn encode(raw: &str) -> String {
    byte_serialize(raw.as_bytes()).collect()
}
