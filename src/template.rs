//! `{{name}}` substitution for the built-in config templates.
//!
//! nginx and PHP configs are full of single braces, so only doubled braces are placeholders.
//! Rendering fails on an unknown or unresolved placeholder rather than writing a broken config.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::util::reject_newlines;

#[derive(Debug, Default, Clone)]
pub struct Vars {
    map: BTreeMap<&'static str, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.map.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

pub fn render(template: &str, vars: &Vars) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| anyhow!("unterminated placeholder in template"))?;
        let key = after[..end].trim();
        let value = vars
            .get(key)
            .ok_or_else(|| anyhow!("template placeholder '{{{{{key}}}}}' has no value"))?;
        reject_newlines(value, key).map_err(|e| anyhow!(e))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
