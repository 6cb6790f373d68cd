//! `${VAR}` substitution for manifest templates.
//!
//! Templates reference configuration with `${NAME}`. Every referenced
//! variable must be defined; a missing one is reported by name rather than
//! silently rendered as an empty string.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{PlatformError, Result};

// Pattern: ${NAME}
static PLACEHOLDER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());

/// Substitute every `${NAME}` in `template` with `vars[NAME]`.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let placeholder = PLACEHOLDER_RE
        .as_ref()
        .ok_or_else(|| PlatformError::Template("placeholder pattern failed to compile".to_string()))?;
    let mut missing: Vec<String> = Vec::new();
    let rendered = placeholder.replace_all(template, |caps: &Captures<'_>| {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(PlatformError::Template(format!(
            "missing variables: {}",
            missing.join(", ")
        )))
    }
}

/// Read and render a template file.
pub async fn render_file(path: &Path, vars: &BTreeMap<String, String>) -> Result<String> {
    let template = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PlatformError::Template(format!("cannot read {}: {}", path.display(), e)))?;
    render(&template, vars)
}
