//! Structured-text (YAML) helpers shared by export and mapping-file loading.

use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

pub fn to_yaml<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| Error::Conversion(format!("serializing YAML: {}", e)))
}

pub fn from_yaml<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_yaml::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))
}
