//! Command-line parameters (`name=value`).

use std::str::FromStr;

use serde_json::Value;

use crate::error::Error;

/// A parameter to inject into a notebook.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl FromStr for Parameter {
    type Err = Error;

    /// Split at the first `=`. The value is decoded as JSON when possible and
    /// kept as a plain string otherwise.
    fn from_str(option: &str) -> Result<Self, Self::Err> {
        let (name, raw) = option
            .split_once('=')
            .ok_or_else(|| Error::InvalidParameter(option.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidParameter(option.to_string()));
        }

        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(Self::new(name, value))
    }
}
