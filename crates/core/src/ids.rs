use serde::{Deserialize, Serialize};

use crate::error::{Result, ScryError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

impl TraceId {
    /// Accepts the id shapes backends store in practice: W3C hex ids are
    /// lowercased, other ids must stay within `[A-Za-z0-9_-]`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() || input.len() > 128 {
            return Err(ScryError::Parse(format!("invalid trace id: {input:?}")));
        }
        if !input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ScryError::Parse(format!("invalid trace id: {input}")));
        }
        if input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self(input.to_ascii_lowercase()));
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
