//! `${TOKEN}` substitution for query templates.
//!
//! Expansion is plain text replacement. Values are inserted verbatim, so
//! anything that came from the user must go through [`quote_literal`] before
//! it is bound.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scry_core::{Result, ScryError};

static TOKEN_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<String, String>);

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds raw query text.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Binds a column reference.
    pub fn set_field(&mut self, key: &str, physical: &str) -> &mut Self {
        self.set(key, field_ref(physical))
    }

    /// Binds an untrusted string as a quoted literal.
    pub fn set_literal(&mut self, key: &str, value: &str) -> &mut Self {
        self.set(key, quote_literal(value))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn extend(&mut self, other: &TemplateVars) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

/// Replaces every `${TOKEN}`. Unbound tokens are an error rather than being
/// left in the query text.
pub fn expand(template: &str, vars: &TemplateVars) -> Result<String> {
    let token = TOKEN_PATTERN
        .as_ref()
        .ok_or_else(|| ScryError::Internal("template token pattern failed to compile".into()))?;
    let mut unbound: Vec<String> = token
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .filter(|name| vars.get(name).is_none())
        .collect();
    if !unbound.is_empty() {
        unbound.sort();
        unbound.dedup();
        return Err(ScryError::InvalidArgument(format!(
            "unbound template variables: {}",
            unbound.join(", ")
        )));
    }

    let expanded = token.replace_all(template, |caps: &regex::Captures<'_>| {
        vars.get(&caps[1]).unwrap_or_default().to_string()
    });
    Ok(expanded.into_owned())
}

/// Double-quoted string literal with backslash escapes.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Bracketed reference, safe for names containing dots or dashes.
pub fn field_ref(name: &str) -> String {
    format!("['{}']", name.replace('\\', "\\\\").replace('\'', "\\'"))
}
