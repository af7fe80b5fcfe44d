//! Spec field validation against the declared schema fields.

use std::collections::BTreeSet;

use metrics::counter;
use versa_core::{Error, FieldError, FieldErrors, JsonMap, Result};

use crate::{build_gvk_key, SchemaStore};

const NOT_ALLOWED: &str = "not allowed by OpenAPI schema";

/// Reject every top-level key of `spec` that is not in `valid`. All violations are reported together.
pub fn validate_fields<I, S>(spec: &JsonMap, valid: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let valid: BTreeSet<String> = valid.into_iter().map(|s| s.as_ref().to_string()).collect();
    let violations: Vec<FieldError> = spec
        .keys()
        .filter(|k| !valid.contains(k.as_str()))
        .map(|k| FieldError { field: format!("spec[{}]", k), value: k.clone(), detail: NOT_ALLOWED.to_string() })
        .collect();
    if violations.is_empty() {
        return Ok(());
    }
    counter!("validation_violations_total", violations.len() as u64);
    Err(Error::Validation(FieldErrors(violations)))
}

impl SchemaStore {
    /// Validate `spec` against the fields this store's document declares for group/version/kind.
    pub fn validate_spec(&self, spec: &JsonMap, group: &str, version: &str, kind: &str) -> Result<()> {
        let fields = self.extract_spec_fields(&build_gvk_key(group, version, kind))?;
        validate_fields(spec, &fields)
    }
}

/// [`SchemaStore::validate_spec`] on the process-wide schema snapshot.
pub fn validate_spec_from_schema(spec: &JsonMap, group: &str, version: &str, kind: &str) -> Result<()> {
    SchemaStore::global().validate_spec(spec, group, version, kind)
}
