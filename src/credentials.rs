//! The credentials file (`~/.all_settings`): append-only `label=value` lines, mode 0600.
//!
//! Secrets generated by one playbook are read back by later ones (install-project reads the
//! MySQL admin password written by preinstall), so a label, once written, is never rewritten.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::util::{id, reject_newlines, HostFs};

pub const CREDENTIALS_MODE: u32 = 0o600;
const PASSWORD_LEN: usize = 24;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    fs: HostFs,
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(fs: HostFs, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in file order. Lines without `=` and comments are skipped.
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let text = self.fs.read(&self.path)?.unwrap_or_default();
        Ok(text
            .lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect())
    }

    /// First value recorded under `label`.
    pub fn get(&self, label: &str) -> Result<Option<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|(k, _)| k == label)
            .map(|(_, v)| v))
    }

    /// Append `label=value`. Refuses to shadow an existing label.
    pub fn record(&self, label: &str, value: &str) -> Result<()> {
        validate_label(label)?;
        reject_newlines(value, "credential").map_err(|e| anyhow!(e))?;
        if self.get(label)?.is_some() {
            return Err(anyhow!("credential '{label}' already recorded"));
        }
        self.fs
            .append_line(&self.path, &format!("{label}={value}"), CREDENTIALS_MODE)?;
        tracing::info!(label, path = %self.path.display(), "credential recorded");
        Ok(())
    }

    /// Reuse the stored secret for `label`, or generate, record and return a new one.
    pub fn get_or_create(&self, label: &str) -> Result<String> {
        if let Some(v) = self.get(label)? {
            return Ok(v);
        }
        let secret = id::generate_password(PASSWORD_LEN)?;
        self.record(label, &secret)?;
        Ok(secret)
    }

    /// Re-assert 0600 on an existing file (it may have been created by hand).
    pub fn harden(&self) -> Result<()> {
        if self.fs.exists(&self.path) {
            self.fs.set_mode(&self.path, CREDENTIALS_MODE)?;
        }
        Ok(())
    }
}

fn validate_label(label: &str) -> Result<()> {
    if label.is_empty()
        || !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
    {
        return Err(anyhow!("invalid credential label '{label}'"));
    }
    Ok(())
}
