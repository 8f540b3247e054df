//! Turning configuration parameters into typed parameter structs.
//!
//! Every reference process has a `*Parameters` struct with a `Default`
//! impl and `#[serde(default)]`, so configuration only names the values
//! it changes. Parameters arrive as a plain [`State`] map and go through
//! `serde_json` to reach the typed struct.

use serde::de::DeserializeOwned;
use vivarium_types::State;

use crate::error::RegistryError;

/// Deserialize `parameters` into `T`, naming `kind` on failure.
pub fn parse<T: DeserializeOwned>(kind: &str, parameters: &State) -> Result<T, RegistryError> {
    serde_json::to_value(parameters)
        .and_then(serde_json::from_value)
        .map_err(|source| RegistryError::InvalidParameters {
            kind: kind.to_owned(),
            source,
        })
}
