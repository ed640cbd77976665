//! Custom serde helpers for upstream serialization formats.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serializer};

/// Serialize/deserialize a `BTreeSet<T>` as a comma-separated string.
///
/// Used for id lists such as `id=1,825,1027`. The set keeps ids sorted and
/// unique, so equal lists always serialize identically.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeSet;
/// use serde::{Serialize, Deserialize};
/// use market_data_client::types::serde_helpers::comma_separated;
///
/// #[derive(Serialize, Deserialize, Debug, PartialEq)]
/// struct Query {
///     #[serde(with = "comma_separated")]
///     id: BTreeSet<u64>,
/// }
///
/// let query = Query { id: [1027, 1, 825].into_iter().collect() };
/// assert_eq!(serde_urlencoded::to_string(&query).unwrap(), "id=1%2C825%2C1027");
/// ```
pub mod comma_separated {
    use super::*;

    /// Serialize a BTreeSet as a comma-separated string.
    pub fn serialize<T, S>(set: &BTreeSet<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        let s = set
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        serializer.serialize_str(&s)
    }

    /// Deserialize a comma-separated string into a BTreeSet.
    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<BTreeSet<T>, D::Error>
    where
        T: FromStr + Ord,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(BTreeSet::new());
        }
        s.split(',')
            .map(|part| part.trim().parse().map_err(de::Error::custom))
            .collect()
    }
}

/// Helper for empty strings that should be deserialized as None.
///
/// CoinMarketCap returns `""` for missing logos and descriptions.
pub mod empty_string_as_none {
    use super::*;

    /// Deserialize a string, returning None if empty.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.filter(|s| !s.is_empty()))
    }
}
