//! Declarative command option schemas and the generic parser that fills them.
//!
//! Each command declares a static [`OptionSchema`]: one [`OptionSpec`] per
//! field with its kind, whether it is required, a default, allowed choices and
//! whether it may be given positionally. Arguments are either positional
//! values (assigned to positional fields in declaration order) or
//! `-name[=value]`; a bare `-flag` means `true`.

use crate::error::{Result, VfsError};
use crate::protocol_core::tokenize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Text,
    Number,
    Flag,
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    pub positional: bool,
    pub default: Option<&'static str>,
}

impl OptionSpec {
    pub const fn text(name: &'static str) -> Self {
        Self { name, kind: OptionKind::Text, required: false, positional: false, default: None }
    }

    pub const fn number(name: &'static str) -> Self {
        Self { name, kind: OptionKind::Number, required: false, positional: false, default: None }
    }

    pub const fn flag(name: &'static str) -> Self {
        Self { name, kind: OptionKind::Flag, required: false, positional: false, default: None }
    }

    pub const fn choice(name: &'static str, choices: &'static [&'static str]) -> Self {
        Self { name, kind: OptionKind::Choice(choices), required: false, positional: false, default: None }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn positional(mut self) -> Self {
        self.positional = true;
        self
    }

    pub const fn default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug)]
pub struct OptionSchema {
    pub specs: &'static [OptionSpec],
}

impl OptionSchema {
    pub const EMPTY: OptionSchema = OptionSchema { specs: &[] };

    fn find(&self, name: &str) -> Option<&OptionSpec> {
        self.specs.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Parse a raw option string against this schema.
    pub fn parse(&self, raw: &str) -> Result<ParsedOptions> {
        let tokens = tokenize(raw)?;
        let mut values: HashMap<&'static str, String> = HashMap::new();
        let mut positional = self.specs.iter().filter(|s| s.positional);

        for token in tokens {
            let named = token.strip_prefix('-').filter(|rest| {
                // A negative number is a positional value, not an option
                !rest.is_empty() && !rest.starts_with(|c: char| c.is_ascii_digit())
            });
            let (spec, value) = match named {
                Some(rest) => {
                    let (name, value) = match rest.split_once('=') {
                        Some((n, v)) => (n, Some(v.to_string())),
                        None => (rest, None),
                    };
                    let spec = self
                        .find(name)
                        .ok_or_else(|| VfsError::InvalidParam(format!("unknown option -{}", name)))?;
                    let value = match (value, spec.kind) {
                        (Some(v), _) => v,
                        (None, OptionKind::Flag) => "true".to_string(),
                        (None, _) => return Err(VfsError::invalid_value(spec.name, "")),
                    };
                    (spec, value)
                }
                None => {
                    // Skip positional slots already filled by name
                    let spec = positional
                        .by_ref()
                        .find(|s| !values.contains_key(s.name))
                        .ok_or_else(|| VfsError::TooManyParams(token.clone()))?;
                    (spec, token)
                }
            };
            let value = validate(spec, value)?;
            values.insert(spec.name, value);
        }

        let mut missing = Vec::new();
        for spec in self.specs {
            if values.contains_key(spec.name) {
                continue;
            }
            if let Some(d) = spec.default {
                values.insert(spec.name, d.to_string());
            } else if spec.required {
                missing.push(spec.name.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(VfsError::MissingParams(missing));
        }
        Ok(ParsedOptions { values })
    }
}

fn validate(spec: &OptionSpec, value: String) -> Result<String> {
    match spec.kind {
        OptionKind::Text => Ok(value),
        OptionKind::Number => match value.parse::<u64>() {
            Ok(_) => Ok(value),
            Err(_) => Err(VfsError::invalid_value(spec.name, value)),
        },
        OptionKind::Flag => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok("true".to_string()),
            "false" | "0" | "no" => Ok("false".to_string()),
            _ => Err(VfsError::invalid_value(spec.name, value)),
        },
        OptionKind::Choice(choices) => choices
            .iter()
            .find(|c| c.eq_ignore_ascii_case(&value))
            .map(|c| c.to_string())
            .ok_or_else(|| VfsError::invalid_value(spec.name, value)),
    }
}

/// Options validated against a schema
#[derive(Debug, Default)]
pub struct ParsedOptions {
    values: HashMap<&'static str, String>,
}

impl ParsedOptions {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn require_text(&self, name: &str) -> Result<&str> {
        self.text(name)
            .ok_or_else(|| VfsError::MissingParams(vec![name.to_string()]))
    }

    pub fn number(&self, name: &str) -> Option<u64> {
        self.text(name).and_then(|v| v.parse().ok())
    }

    pub fn require_number(&self, name: &str) -> Result<u64> {
        self.number(name)
            .ok_or_else(|| VfsError::MissingParams(vec![name.to_string()]))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.text(name) == Some("true")
    }
}
