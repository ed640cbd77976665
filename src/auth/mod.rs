//! API key management for upstreams that require one.
//!
//! CoinMarketCap authenticates every request with an API key sent in the
//! `X-CMC_PRO_API_KEY` header. The key is held in a [`secrecy::SecretString`]
//! and only exposed when the header is built.

mod credentials;

pub use credentials::{ApiKey, ApiKeyProvider, EnvApiKey, StaticApiKey};
