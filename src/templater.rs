//! # Templating Adapter
//!
//! Renders composed secret values with [`tera`], exposing a `secret` lookup
//! function and an `xml_escape` filter to template bodies.
//!
//! A template reads other secrets through
//! `{{ secret(name="nexus", property="password") }}`. A lookup that finds no
//! value substitutes the empty string and flips
//! [`Rendered::all_refs_satisfied`] to `false` — the driver uses that flag to
//! retry the field on a later pass instead of failing the render. Lookups
//! outside the declared allow-list, and any template syntax or evaluation
//! fault, are render errors and are not retried.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tera::{Context, Tera, Value};

use crate::error::Error;

/// Result of rendering one composed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// False whenever any `secret(...)` lookup found nothing, even though the
    /// template still produced output with empty substitution.
    pub all_refs_satisfied: bool,
}

struct SecretFn<F> {
    lookup: F,
    allowed: Option<HashSet<String>>,
    missing: Arc<AtomicBool>,
}

impl<F> tera::Function for SecretFn<F>
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("secret() requires a string `name` argument"))?;
        let property = args
            .get("property")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("secret() requires a string `property` argument"))?;

        if let Some(ref allowed) = self.allowed {
            if !allowed.contains(name) {
                return Err(tera::Error::msg(format!(
                    "template is not allowed to read secret {name:?}"
                )));
            }
        }

        match (self.lookup)(name, property) {
            Some(value) if !value.is_empty() => Ok(Value::String(value)),
            _ => {
                self.missing.store(true, Ordering::Relaxed);
                Ok(Value::String(String::new()))
            }
        }
    }

    fn is_safe(&self) -> bool {
        false
    }
}

/// Escape a value for embedding as an XML text node or attribute.
fn xml_escape(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("xml_escape expects a string"))?;
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    Ok(Value::String(escaped))
}

/// Render one template body.
///
/// `field` is used only for error attribution. `allowed` restricts which
/// secret names the template may read; an empty slice means unrestricted.
pub fn render<F>(field: &str, body: &str, allowed: &[String], lookup: F) -> Result<Rendered, Error>
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
{
    let missing = Arc::new(AtomicBool::new(false));
    let allowed = if allowed.is_empty() {
        None
    } else {
        Some(allowed.iter().cloned().collect::<HashSet<_>>())
    };

    let mut tera = Tera::default();
    tera.register_function(
        "secret",
        SecretFn { lookup, allowed, missing: Arc::clone(&missing) },
    );
    tera.register_filter("xml_escape", xml_escape);

    tera.add_raw_template(field, body).map_err(|e| Error::TemplateRender {
        field: field.to_string(),
        message: e.to_string(),
    })?;

    let text = tera.render(field, &Context::new()).map_err(|e| {
        // Tera wraps the function error; surface the innermost cause.
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(inner) = source {
            message = inner.to_string();
            source = inner.source();
        }
        Error::TemplateRender { field: field.to_string(), message }
    })?;

    Ok(Rendered { text, all_refs_satisfied: !missing.load(Ordering::Relaxed) })
}
