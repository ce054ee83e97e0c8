//! Rule-file loading.
//!
//! `load` reads every `*.json` file in a directory in lexicographic
//! order, expands `${NAME}` environment placeholders in string fields,
//! validates the result, and returns the valid rules together with
//! per-file errors. It has no side effects beyond reading files and the
//! process environment.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use vaultize_core::{
    ActionKind, ActionSpec, AggKind, Aggregation, CompareOp, Condition, HttpMethod, QuerySpec,
    Rule, parse_duration, parse_window_from,
};

use crate::error::{FileError, LoadError};

/// Minimum allowed evaluation interval.
const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Default gap between successive firing notifications. Raised to the
/// rule's interval when the interval is longer.
const DEFAULT_THROTTLE: Duration = Duration::from_secs(15 * 60);

const MAX_NAME_LEN: usize = 128;

/// Outcome of loading a rules directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Rules that passed validation, in file order.
    pub rules: Vec<Rule>,
    /// Files that failed, with the reason.
    pub errors: Vec<FileError>,
}

// ---------------------------------------------------------------------------
// On-disk schema
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawRule {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_true")]
    enabled: bool,
    schedule: RawSchedule,
    query: RawQuery,
    condition: RawCondition,
    #[serde(default)]
    throttle: Option<String>,
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct RawSchedule {
    interval: String,
}

#[derive(Deserialize)]
struct RawQuery {
    #[serde(default)]
    indices: Vec<String>,
    time_field: String,
    time_range: RawTimeRange,
    #[serde(default)]
    filter: Option<serde_json::Value>,
    #[serde(default)]
    aggregation: Option<RawAggregation>,
    #[serde(default)]
    projection: Option<String>,
}

#[derive(Deserialize)]
struct RawTimeRange {
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct RawAggregation {
    #[serde(rename = "type")]
    kind: String,
    field: String,
    #[serde(default)]
    percent: Option<f64>,
}

#[derive(Deserialize)]
struct RawCondition {
    operator: String,
    threshold: f64,
}

#[derive(Deserialize)]
struct RawAction {
    #[serde(default)]
    kind: Option<String>,
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    body: serde_json::Value,
    #[serde(default)]
    timeout: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load every `*.json` rule file in `dir`.
///
/// Returns `Err` only when the directory itself cannot be read; per-file
/// failures land in [`LoadReport::errors`].
pub fn load(dir: impl AsRef<Path>) -> Result<LoadReport, LoadError> {
    load_with_env(dir, |name| std::env::var(name).ok())
}

/// As [`load`], with an injectable environment lookup.
pub fn load_with_env(
    dir: impl AsRef<Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<LoadReport, LoadError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LoadError::Io(format!("cannot read rules directory {}: {e}", dir.display())))?;

    let mut files: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut report = LoadReport::default();
    let mut seen_names = HashSet::new();

    for file in files {
        match load_file(&file, &env) {
            Ok(rule) => {
                if seen_names.contains(&rule.name) {
                    report.errors.push(FileError {
                        file,
                        error: LoadError::DuplicateName(rule.name),
                    });
                    continue;
                }
                debug!(rule = %rule.name, file = %file.display(), "rule loaded");
                seen_names.insert(rule.name.clone());
                report.rules.push(rule);
            }
            Err(error) => report.errors.push(FileError { file, error }),
        }
    }

    Ok(report)
}

fn load_file(file: &Path, env: &impl Fn(&str) -> Option<String>) -> Result<Rule, LoadError> {
    let raw = std::fs::read_to_string(file).map_err(|e| LoadError::Io(e.to_string()))?;
    let mut value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| LoadError::Parse(e.to_string()))?;

    expand_env(&mut value, env)?;

    let raw_rule: RawRule =
        serde_json::from_value(value).map_err(|e| LoadError::Parse(e.to_string()))?;
    validate(raw_rule)
}

// ---------------------------------------------------------------------------
// Environment placeholder expansion
// ---------------------------------------------------------------------------

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Substitute `${NAME}` in every string leaf. A reference to an unset
/// variable fails the whole file.
fn expand_env(
    value: &mut serde_json::Value,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<(), LoadError> {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${") {
                *s = expand_env_str(s, env)?;
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            items.iter_mut().try_for_each(|v| expand_env(v, env))
        }
        serde_json::Value::Object(map) => {
            map.values_mut().try_for_each(|v| expand_env(v, env))
        }
        _ => Ok(()),
    }
}

fn expand_env_str(
    input: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<String, LoadError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in env_pattern().captures_iter(input) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        let value = env(name).ok_or_else(|| LoadError::MissingEnv(name.to_owned()))?;
        out.push_str(&input[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(raw: RawRule) -> Result<Rule, LoadError> {
    validate_name(&raw.name)?;

    let interval = parse_duration(&raw.schedule.interval)
        .map_err(|e| LoadError::Validation(format!("schedule.interval: {e}")))?;
    if interval < MIN_INTERVAL {
        return Err(LoadError::Validation(format!(
            "schedule.interval must be at least 10s, got {}",
            raw.schedule.interval
        )));
    }

    let query = validate_query(raw.query)?;
    let condition = validate_condition(&raw.condition)?;

    let throttle = match raw.throttle {
        Some(ref s) => {
            let throttle =
                parse_duration(s).map_err(|e| LoadError::Validation(format!("throttle: {e}")))?;
            if throttle < interval {
                return Err(LoadError::Validation(format!(
                    "throttle ({s}) must not be shorter than schedule.interval ({})",
                    raw.schedule.interval
                )));
            }
            throttle
        }
        None => DEFAULT_THROTTLE.max(interval),
    };

    if raw.actions.is_empty() {
        return Err(LoadError::Validation(
            "at least one action is required".to_owned(),
        ));
    }
    let actions = raw
        .actions
        .into_iter()
        .enumerate()
        .map(|(i, a)| validate_action(i, a))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Rule {
        name: raw.name,
        description: raw.description,
        enabled: raw.enabled,
        interval,
        query,
        condition,
        throttle,
        actions,
        metadata: raw.metadata,
    })
}

fn validate_name(name: &str) -> Result<(), LoadError> {
    if name.is_empty() {
        return Err(LoadError::Validation("name must not be empty".to_owned()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(LoadError::Validation(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LoadError::Validation(
            "name must contain only alphanumeric characters, hyphens, and underscores".to_owned(),
        ));
    }
    Ok(())
}

fn validate_query(raw: RawQuery) -> Result<QuerySpec, LoadError> {
    if raw.indices.is_empty() || raw.indices.iter().any(String::is_empty) {
        return Err(LoadError::Validation(
            "query.indices must be a non-empty list of index patterns".to_owned(),
        ));
    }
    if raw.time_field.is_empty() {
        return Err(LoadError::Validation(
            "query.time_field must not be empty".to_owned(),
        ));
    }
    if raw.time_range.to != "now" {
        return Err(LoadError::Validation(format!(
            "query.time_range.to must be 'now', got '{}'",
            raw.time_range.to
        )));
    }
    let window = parse_window_from(&raw.time_range.from)
        .map_err(|e| LoadError::Validation(format!("query.time_range.from: {e}")))?;

    let aggregation = raw.aggregation.map(validate_aggregation).transpose()?;

    Ok(QuerySpec {
        indices: raw.indices,
        time_field: raw.time_field,
        window,
        filter: raw.filter,
        aggregation,
        projection: raw.projection,
    })
}

fn validate_aggregation(raw: RawAggregation) -> Result<Aggregation, LoadError> {
    let kind = match raw.kind.as_str() {
        "sum" => AggKind::Sum,
        "avg" => AggKind::Avg,
        "min" => AggKind::Min,
        "max" => AggKind::Max,
        "percentile" => AggKind::Percentile,
        "cardinality" => AggKind::Cardinality,
        other => {
            return Err(LoadError::Validation(format!(
                "query.aggregation.type '{other}' is not one of sum, avg, min, max, percentile, cardinality"
            )));
        }
    };
    if raw.field.is_empty() {
        return Err(LoadError::Validation(
            "query.aggregation.field must not be empty".to_owned(),
        ));
    }
    if kind == AggKind::Percentile {
        match raw.percent {
            Some(p) if p > 0.0 && p <= 100.0 => {}
            _ => {
                return Err(LoadError::Validation(
                    "query.aggregation.percent must be in (0, 100] for percentile".to_owned(),
                ));
            }
        }
    }
    Ok(Aggregation {
        kind,
        field: raw.field,
        percent: raw.percent,
    })
}

fn validate_condition(raw: &RawCondition) -> Result<Condition, LoadError> {
    let operator = match raw.operator.as_str() {
        "gt" => CompareOp::Gt,
        "gte" => CompareOp::Gte,
        "lt" => CompareOp::Lt,
        "lte" => CompareOp::Lte,
        "eq" => CompareOp::Eq,
        other => {
            return Err(LoadError::Validation(format!(
                "condition.operator '{other}' is not one of gt, gte, lt, lte, eq"
            )));
        }
    };
    Ok(Condition {
        operator,
        threshold: raw.threshold,
    })
}

fn validate_action(index: usize, raw: RawAction) -> Result<ActionSpec, LoadError> {
    let kind = match raw.kind.as_deref() {
        None | Some("webhook") => ActionKind::Webhook,
        Some(other) => {
            return Err(LoadError::Validation(format!(
                "actions[{index}].kind '{other}' is not supported (only 'webhook')"
            )));
        }
    };
    if raw.url.is_empty() {
        return Err(LoadError::Validation(format!(
            "actions[{index}].url must not be empty"
        )));
    }
    let method = match raw.method.as_deref() {
        None => HttpMethod::Post,
        Some("GET") => HttpMethod::Get,
        Some("POST") => HttpMethod::Post,
        Some("PUT") => HttpMethod::Put,
        Some("PATCH") => HttpMethod::Patch,
        Some("DELETE") => HttpMethod::Delete,
        Some(other) => {
            return Err(LoadError::Validation(format!(
                "actions[{index}].method '{other}' is not a supported HTTP method"
            )));
        }
    };
    let timeout = raw
        .timeout
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| LoadError::Validation(format!("actions[{index}].timeout: {e}")))?;

    Ok(ActionSpec {
        kind,
        url: raw.url,
        method,
        headers: raw.headers,
        body: raw.body,
        timeout,
    })
}
