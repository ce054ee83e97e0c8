//! The `{{alert.*}}` notification template language.
//!
//! Deliberately tiny: the only recognized form is `{{alert.KEY}}` (or
//! `{{alert.metadata.KEY}}`). Other brace sequences pass through
//! verbatim, `\{{` escapes a literal `{{`, and missing keys expand to the
//! empty string. Rendering never fails.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::state::AlertState;

/// The values a notification template can reference.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub name: String,
    pub description: String,
    /// New lifecycle state, rendered lower-case.
    pub state: AlertState,
    pub value: Option<f64>,
    pub threshold: f64,
    pub operator: String,
    pub observed_at: DateTime<Utc>,
    /// Stable URL to the rule's status page in the management API.
    pub url_to_rule: String,
    /// Rule metadata, referenced as `metadata.KEY`.
    pub metadata: HashMap<String, String>,
}

impl AlertContext {
    /// Resolve a context key to its formatted string value. `None` means
    /// the key is unknown, which renders as the empty string.
    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(meta_key) = key.strip_prefix("metadata.") {
            return self.metadata.get(meta_key).cloned();
        }
        match key {
            "name" => Some(self.name.clone()),
            "description" => Some(self.description.clone()),
            "state" => Some(self.state.as_lower().to_owned()),
            "value" => self.value.map(format_number),
            "threshold" => Some(format_number(self.threshold)),
            "operator" => Some(self.operator.clone()),
            "observed_at" => Some(
                self.observed_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            "url_to_rule" => Some(self.url_to_rule.clone()),
            _ => None,
        }
    }
}

/// Format a number with up to six significant digits, dropping a trailing
/// fractional part when the value is integral.
fn format_number(v: f64) -> String {
    if v == 0.0 {
        return "0".to_owned();
    }
    if v.fract() == 0.0 && v.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        return format!("{}", v as i64);
    }
    let magnitude = v.abs().log10().floor() as i32;
    let decimals = (5 - magnitude).clamp(0, 17) as usize;
    let s = format!("{v:.decimals$}");
    s.trim_end_matches('0').trim_end_matches('.').to_owned()
}

/// Expand every `{{alert.KEY}}` occurrence in a template string.
pub fn render_str(template: &str, ctx: &AlertContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("\\{{") {
            out.push_str("{{");
            rest = tail;
            continue;
        }
        if rest.starts_with("{{") {
            if let Some(end) = rest.find("}}") {
                let inner = rest[2..end].trim();
                if let Some(key) = inner.strip_prefix("alert.") {
                    out.push_str(&ctx.lookup(key).unwrap_or_default());
                    rest = &rest[end + 2..];
                    continue;
                }
            }
        }
        let ch = rest.chars().next().unwrap();
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }

    out
}

/// Render a JSON body template: every string leaf is expanded, other
/// leaves pass through unchanged.
pub fn render_value(template: &serde_json::Value, ctx: &AlertContext) -> serde_json::Value {
    match template {
        serde_json::Value::String(s) => serde_json::Value::String(render_str(s, ctx)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| render_value(v, ctx)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}
