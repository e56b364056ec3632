//! # Value Resolver
//!
//! Computes, for one definition, which destination values need writing on
//! this attempt. Inputs are the annotated [`Definition`], the destination
//! store (read for existing values) and an immutable [`SourceSnapshot`] of
//! the source namespace taken at the start of the attempt.
//!
//! Per field, in precedence order:
//! 1. **template** — re-rendered every run; a missing reference substitutes
//!    the empty string and marks the field unresolved (retryable), while the
//!    partial output is still written when it changed. Syntax or evaluation
//!    faults are terminal.
//! 2. **literal copy** — re-read from the snapshot every run; a missing or
//!    empty source marks the field unresolved.
//! 3. **existing value** — a field with neither template nor source keeps a
//!    non-empty stored value untouched, so generated credentials stay stable
//!    across runs.
//! 4. **defaultValue**, then **generator** — only reached when the
//!    destination holds nothing.
//!
//! A candidate byte-equal to the stored value is never written.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, StoreError};
use crate::schemas::{Definition, FieldSpec, Generator};
use crate::store::SecretStore;
use crate::templater;

const DEFAULT_PASSWORD_LENGTH: usize = 20;
const DEFAULT_HMAC_BYTES: usize = 20;

/// One value the driver should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecretValue {
    pub location: String,
    pub scope: String,
    pub property: String,
    pub value: String,
}

/// Outcome of one resolve attempt over a whole definition.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Values that differ from what the destination holds
    pub values: Vec<ResolvedSecretValue>,
    /// Field names still waiting on absent sources; retryable
    pub unresolved: Vec<String>,
    /// Fields that needed no write on this attempt
    pub unchanged: usize,
}

/// Immutable view of every secret in the source namespace, captured once per
/// attempt so template lookups and literal copies read consistent data.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    secrets: BTreeMap<String, BTreeMap<String, String>>,
}

impl SourceSnapshot {
    pub async fn capture(store: &dyn SecretStore, namespace: &str) -> Result<Self, StoreError> {
        let mut secrets = BTreeMap::new();
        for scope in store.list(namespace).await? {
            if let Some(properties) = store.get_properties(namespace, &scope).await? {
                secrets.insert(scope, properties);
            }
        }
        Ok(Self { secrets })
    }

    pub fn get(&self, name: &str, property: &str) -> Option<String> {
        self.secrets.get(name).and_then(|props| props.get(property)).cloned()
    }

    #[cfg(test)]
    pub fn insert(&mut self, name: &str, property: &str, value: &str) {
        self.secrets
            .entry(name.to_string())
            .or_default()
            .insert(property.to_string(), value.to_string());
    }
}

fn generate(generator: Generator, length: Option<usize>) -> String {
    let mut rng = rand::thread_rng();
    match generator {
        Generator::Password => (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(length.unwrap_or(DEFAULT_PASSWORD_LENGTH))
            .map(char::from)
            .collect(),
        Generator::Hmac => {
            let bytes = length.unwrap_or(DEFAULT_HMAC_BYTES);
            (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
        }
    }
}

enum Candidate {
    Value(String),
    Unresolved,
    Nothing,
}

async fn resolve_field(
    definition: &Definition,
    field: &FieldSpec,
    destination: &dyn SecretStore,
    snapshot: &Arc<SourceSnapshot>,
    unresolved: &mut Vec<String>,
) -> Result<Candidate, Error> {
    if let Some(ref body) = field.template {
        let lookup_snapshot = Arc::clone(snapshot);
        let rendered = templater::render(&field.name, body, &field.allowed_secrets, move |name, property| {
            lookup_snapshot.get(name, property)
        })?;
        if !rendered.all_refs_satisfied {
            unresolved.push(field.name.clone());
        }
        return Ok(Candidate::Value(rendered.text));
    }

    if let Some((ref source_key, ref source_property)) = field.source {
        return match snapshot.get(source_key, source_property) {
            Some(value) if !value.is_empty() => Ok(Candidate::Value(value)),
            _ => {
                unresolved.push(field.name.clone());
                Ok(Candidate::Unresolved)
            }
        };
    }

    // Default and generated material is only created once; an existing value
    // always wins so credentials stay stable across runs.
    let existing = destination
        .get_value(&definition.location, &field.scope, &field.property)
        .await?;
    if existing.as_deref().is_some_and(|v| !v.is_empty()) {
        return Ok(Candidate::Nothing);
    }

    if let Some(ref default) = field.default_value {
        return Ok(Candidate::Value(default.clone()));
    }
    if let Some(generator) = field.generator {
        debug!(definition = %definition.name, field = %field.name, generator = %generator, "generating value");
        return Ok(Candidate::Value(generate(generator, field.length)));
    }

    Ok(Candidate::Nothing)
}

/// Run one resolve attempt for every field of `definition`.
pub async fn resolve(
    definition: &Definition,
    destination: &dyn SecretStore,
    snapshot: Arc<SourceSnapshot>,
) -> Result<Resolution, Error> {
    let mut resolution = Resolution::default();

    for field in &definition.fields {
        let candidate =
            resolve_field(definition, field, destination, &snapshot, &mut resolution.unresolved)
                .await?;

        match candidate {
            Candidate::Value(value) => {
                let stored = destination
                    .get_value(&definition.location, &field.scope, &field.property)
                    .await?;
                if stored.as_deref() == Some(value.as_str()) {
                    resolution.unchanged += 1;
                } else {
                    resolution.values.push(ResolvedSecretValue {
                        location: definition.location.clone(),
                        scope: field.scope.clone(),
                        property: field.property.clone(),
                        value,
                    });
                }
            }
            Candidate::Unresolved => {}
            Candidate::Nothing => resolution.unchanged += 1,
        }
    }

    Ok(resolution)
}
