//! # Schema Annotation
//!
//! A schema document describes, per secret object and property, where a value
//! comes from when no source mapping supplies it: a fixed `defaultValue`, a
//! `generator` producing random credential material, or a `template`
//! composing the value from other secrets. Annotation merges an
//! [`ExternalSecret`]'s data mappings with the matching schema object into a
//! validated [`Definition`], the form the resolver works on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::crd::{BackendType, ExternalSecret};
use crate::error::Error;

/// Schema document, loaded from YAML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub objects: Vec<SchemaObject>,
}

/// Annotations for one secret object, matched by definition name.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaObject {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<SchemaProperty>,
}

/// Annotations for one property of a secret object.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaProperty {
    pub name: String,
    /// Fixed value used when the destination holds nothing yet
    #[serde(default)]
    pub default_value: Option<String>,
    /// Random-material generator used when the destination holds nothing yet
    #[serde(default)]
    pub generator: Option<Generator>,
    /// Template body composing the value from other secrets
    #[serde(default)]
    pub template: Option<String>,
    /// Secret names the template may read; empty means unrestricted
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Generated value length override
    #[serde(default)]
    pub length: Option<usize>,
}

/// Supported random-material generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Generator {
    /// Alphanumeric password
    #[serde(rename = "password")]
    Password,
    /// Hex-encoded webhook HMAC key
    #[serde(rename = "hmac")]
    Hmac,
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password => write!(f, "password"),
            Self::Hmac => write!(f, "hmac"),
        }
    }
}

impl Schema {
    pub fn object(&self, name: &str) -> Option<&SchemaObject> {
        self.objects.iter().find(|o| o.name == name)
    }
}

impl SchemaObject {
    pub fn property(&self, name: &str) -> Option<&SchemaProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Load a schema document from a YAML file.
pub fn load_schema_file(path: &Path) -> Result<Schema, Error> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_str(&text).map_err(|e| Error::Yaml {
        path: path.display().to_string(),
        source: e,
    })
}

/// Annotated, validated definition the resolver consumes. Built fresh each
/// run; resolution never mutates it.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub namespace: String,
    pub backend: BackendType,
    /// Backend location: project id, vault name, or namespace
    pub location: String,
    pub fields: Vec<FieldSpec>,
}

/// One destination field with every way its value can be obtained.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    /// Destination scope (path or secret name) within the backend
    pub scope: String,
    /// Destination property within the scope
    pub property: String,
    /// Literal-copy source `(secret name, property)` in the source namespace
    pub source: Option<(String, String)>,
    pub default_value: Option<String>,
    pub generator: Option<Generator>,
    pub template: Option<String>,
    /// Allow-list for template lookups; empty means unrestricted
    pub allowed_secrets: Vec<String>,
    pub length: Option<usize>,
}

impl Definition {
    /// Composed fields depend on other secrets, so definitions carrying any
    /// are resolved after all literal-only definitions.
    pub fn has_composed_fields(&self) -> bool {
        self.fields.iter().any(|f| f.template.is_some())
    }
}

fn annotate_one(secret: &ExternalSecret, schema: &Schema) -> Result<Definition, Error> {
    secret.validate()?;

    let object = schema.object(secret.name());
    let mut fields = Vec::with_capacity(secret.spec.data.len());
    for mapping in &secret.spec.data {
        let annotation = object.and_then(|o| o.property(&mapping.name));
        let source = mapping.source_key.as_ref().map(|key| {
            (
                key.clone(),
                mapping
                    .source_property
                    .clone()
                    .unwrap_or_else(|| mapping.property.clone()),
            )
        });
        fields.push(FieldSpec {
            name: mapping.name.clone(),
            scope: secret.destination_scope(mapping),
            property: mapping.property.clone(),
            source,
            default_value: annotation.and_then(|a| a.default_value.clone()),
            generator: annotation.and_then(|a| a.generator),
            template: annotation.and_then(|a| a.template.clone()),
            allowed_secrets: annotation.map(|a| a.secrets.clone()).unwrap_or_default(),
            length: annotation.and_then(|a| a.length),
        });
    }

    Ok(Definition {
        name: secret.name().to_string(),
        namespace: secret.namespace().to_string(),
        backend: secret.spec.backend_type,
        location: secret.location(),
        fields,
    })
}

/// Merge loaded definitions with the schema. A failed entry stays a failure;
/// a definition that fails validation becomes one, and the batch continues
/// either way.
pub fn annotate(
    secrets: Vec<Result<ExternalSecret, Error>>,
    schema: &Schema,
) -> Vec<Result<Definition, Error>> {
    secrets
        .into_iter()
        .map(|entry| entry.and_then(|secret| annotate_one(&secret, schema)))
        .collect()
}
