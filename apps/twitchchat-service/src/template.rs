//! `{{ .path.to.field }}` placeholder substitution over a JSON document.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder at byte {0}")]
    Unclosed(usize),
    #[error("invalid placeholder `{0}`")]
    InvalidPlaceholder(String),
    #[error("no value for `{0}`")]
    Missing(String),
}

/// Renders `template` against `data`.
///
/// A placeholder is a dotted path starting with `.`; `{{ . }}` is the whole
/// document. Strings render bare, other scalars and objects render as JSON.
pub fn render(template: &str, data: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(TemplateError::Unclosed(offset + start))?;
        let expr = after[..end].trim();
        out.push_str(&lookup(expr, data)?);
        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(expr: &str, data: &Value) -> Result<String, TemplateError> {
    let path = expr
        .strip_prefix('.')
        .ok_or_else(|| TemplateError::InvalidPlaceholder(expr.to_string()))?;
    let mut node = data;
    if !path.is_empty() {
        for segment in path.split('.') {
            if segment.is_empty() || segment.contains(char::is_whitespace) {
                return Err(TemplateError::InvalidPlaceholder(expr.to_string()));
            }
            node = node
                .get(segment)
                .ok_or_else(|| TemplateError::Missing(expr.to_string()))?;
        }
    }
    match node {
        Value::Null => Err(TemplateError::Missing(expr.to_string())),
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}
