//! SQL guard and templates for the database aggregator.
//!
//! Queries are checked before they reach the store:
//!
//! - exactly one statement, starting with `SELECT` or `WITH`
//! - no comment markers (`--`, `/*`, `*/`)
//! - none of the mutating or administrative keywords in [`FORBIDDEN`] as a
//!   whole word anywhere, string literals included
//!
//! Templates are SQL with `{name}` placeholders. Parameter values are
//! substituted textually, so they must be plain identifiers or numbers.
//! `{entity_id}` is never substituted: it becomes a bound parameter.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::WidgetError;
use crate::models::value_key;

/// Keywords rejected anywhere in the query text.
pub const FORBIDDEN: [&str; 12] = [
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "REPLACE", "ATTACH", "DETACH", "PRAGMA",
    "VACUUM", "REINDEX",
];

/// Placeholder bound to the current entity id.
pub const ENTITY_PLACEHOLDER: &str = "{entity_id}";

static FORBIDDEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN.join("|"))).expect("static regex")
});

static LEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(SELECT|WITH)\b").expect("static regex"));

static PARAM_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("static regex"));

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

/// Built-in templates, available to every aggregator.
pub const BUILTIN_TEMPLATES: [(&str, &str); 4] = [
    ("count_rows", "SELECT COUNT(*) AS value FROM {table}"),
    ("count_distinct", "SELECT COUNT(DISTINCT {field}) AS value FROM {table}"),
    (
        "group_count",
        "SELECT {field} AS label, COUNT(*) AS count FROM {table} GROUP BY {field} ORDER BY count DESC, label",
    ),
    ("field_sum", "SELECT COALESCE(SUM({field}), 0) AS value FROM {table}"),
];

fn rejected(message: impl Into<String>) -> WidgetError {
    WidgetError::SqlValidation(message.into())
}

/// Blank out string literals and quoted identifiers so statement checks only
/// see SQL code. Length and positions are preserved.
fn strip_literals(sql: &str) -> Result<String, WidgetError> {
    let mut code = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                code.push(' ');
            }
            None => code.push(c),
            Some(q) if c == q => {
                // A doubled quote is an escaped quote inside the literal.
                if chars.peek() == Some(&q) {
                    chars.next();
                    code.push_str("  ");
                } else {
                    quote = None;
                    code.push(' ');
                }
            }
            Some(_) => code.push(' '),
        }
    }

    if quote.is_some() {
        return Err(rejected("unterminated string literal"));
    }
    Ok(code)
}

/// Check that `sql` is a single read-only query.
pub fn validate_sql(sql: &str) -> Result<(), WidgetError> {
    if sql.trim().is_empty() {
        return Err(rejected("empty query"));
    }
    for marker in ["--", "/*", "*/"] {
        if sql.contains(marker) {
            return Err(rejected(format!("comment marker '{}' is not allowed", marker)));
        }
    }

    let code = strip_literals(sql)?;
    let body = code.trim_end();
    let body = body.strip_suffix(';').unwrap_or(body);
    if body.contains(';') {
        return Err(rejected("multiple statements are not allowed"));
    }

    if !LEADING_RE.is_match(body) {
        return Err(rejected("query must start with SELECT or WITH"));
    }

    if let Some(m) = FORBIDDEN_RE.find(sql) {
        return Err(rejected(format!(
            "keyword '{}' is not allowed",
            m.as_str().to_ascii_uppercase()
        )));
    }
    Ok(())
}

/// Check a template parameter value.
pub fn validate_param_value(name: &str, value: &Value) -> Result<String, WidgetError> {
    let text = value_key(value).ok_or_else(|| {
        rejected(format!("template parameter '{}' must be a string or number", name))
    })?;
    if !PARAM_VALUE_RE.is_match(&text) {
        return Err(rejected(format!(
            "template parameter '{}' has invalid value '{}'",
            name, text
        )));
    }
    Ok(text)
}

/// Template catalog: built-ins overlaid with project templates.
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    templates: IndexMap<String, String>,
}

impl Default for SqlTemplates {
    fn default() -> Self {
        Self {
            templates: BUILTIN_TEMPLATES
                .iter()
                .map(|(name, sql)| (name.to_string(), sql.to_string()))
                .collect(),
        }
    }
}

impl SqlTemplates {
    pub fn with_overrides(overrides: &IndexMap<String, String>) -> Self {
        let mut catalog = Self::default();
        for (name, sql) in overrides {
            catalog.templates.insert(name.clone(), sql.clone());
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Fill the placeholders of template `name` from `params`.
    pub fn render(&self, name: &str, params: &Map<String, Value>) -> Result<String, WidgetError> {
        let template = self
            .get(name)
            .ok_or_else(|| WidgetError::InvalidParams(format!("unknown SQL template '{}'", name)))?;
        render_template(template, params)
    }
}

/// Substitute `{name}` placeholders, leaving `{entity_id}` for binding.
pub fn render_template(template: &str, params: &Map<String, Value>) -> Result<String, WidgetError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        if name.as_str() == "entity_id" {
            rendered.push_str(ENTITY_PLACEHOLDER);
        } else {
            let value = params.get(name.as_str()).ok_or_else(|| {
                WidgetError::InvalidParams(format!("missing template parameter '{}'", name.as_str()))
            })?;
            rendered.push_str(&validate_param_value(name.as_str(), value)?);
        }
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// Replace each `{entity_id}` with a positional parameter.
///
/// Returns the SQL and how many times the entity id must be bound.
pub fn bind_entity(sql: &str) -> (String, usize) {
    let count = sql.matches(ENTITY_PLACEHOLDER).count();
    (sql.replace(ENTITY_PLACEHOLDER, "?"), count)
}
