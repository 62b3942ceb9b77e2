use crate::errors::TransportError;
use std::collections::BTreeMap;

/// Names referenced as `{{name}}` in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let tail = &rest[start + 2..];
        let Some(end) = tail.find("}}") else {
            break;
        };
        let name = tail[..end].trim().to_string();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
        rest = &tail[end + 2..];
    }
    out
}

/// Substitutes every `{{name}}`; an unknown name is an error rather than an empty string.
pub fn render(template: &str, vars: &BTreeMap<&str, String>) -> Result<String, TransportError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (prefix, tail) = rest.split_at(start);
        out.push_str(prefix);
        let Some(end) = tail.find("}}") else {
            out.push_str(tail);
            rest = "";
            break;
        };
        let name = tail[2..end].trim();
        let value = vars.get(name).ok_or_else(|| {
            TransportError::invalid_params(format!("template variable '{}' is not set", name))
                .with_details(serde_json::json!({ "template": template }))
        })?;
        out.push_str(value);
        rest = &tail[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
