//! apt: list refresh, PPAs, package installation.

use std::path::Path;

use anyhow::Result;

use crate::probe;
use crate::step::{Context, State, Step};

/// `apt-get update` + `apt-get upgrade`. Always runs; there is no cheap probe for "up to date".
pub struct AptUpgrade;

impl Step for AptUpgrade {
    fn name(&self) -> String {
        "refresh package lists and upgrade".to_string()
    }

    fn check(&self, _cx: &Context) -> Result<State> {
        Ok(State::missing("always refreshed"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.run_checked(cx.apt().arg("update"), "apt-get update")?;
        cx.run_checked(cx.apt().arg("upgrade"), "apt-get upgrade")?;
        Ok(())
    }
}

pub struct AptInstall {
    label: String,
    packages: Vec<String>,
}

impl AptInstall {
    pub fn new<I, S>(label: impl Into<String>, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }
}

impl Step for AptInstall {
    fn name(&self) -> String {
        format!("install {}", self.label)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let missing = probe::missing_packages(cx, &self.packages)?;
        Ok(State::from_bool(
            missing.is_empty(),
            format!("not installed: {}", missing.join(" ")),
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let missing = probe::missing_packages(cx, &self.packages)?;
        if missing.is_empty() {
            return Ok(());
        }
        cx.run_checked(
            cx.apt()
                .args(["install", "--no-install-recommends"])
                .args(missing.iter().cloned()),
            "apt-get install",
        )?;
        Ok(())
    }
}

/// A Launchpad PPA such as `ppa:ondrej/php`.
pub struct AptRepository {
    ppa: String,
}

impl AptRepository {
    pub fn new(ppa: impl Into<String>) -> Self {
        Self { ppa: ppa.into() }
    }

    /// `ppa:ondrej/php` → `ondrej-ubuntu-php`, the prefix add-apt-repository uses for its files.
    fn source_prefix(&self) -> String {
        let spec = self.ppa.trim_start_matches("ppa:");
        match spec.split_once('/') {
            Some((owner, name)) => format!("{owner}-ubuntu-{name}"),
            None => spec.to_string(),
        }
    }
}

impl Step for AptRepository {
    fn name(&self) -> String {
        format!("add apt repository {}", self.ppa)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let prefix = self.source_prefix();
        let present = cx
            .fs
            .list(Path::new("/etc/apt/sources.list.d"))?
            .iter()
            .any(|f| f.starts_with(&prefix));
        Ok(State::from_bool(present, "source not configured"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.run_checked(
            cx.cmd("add-apt-repository")
                .env("DEBIAN_FRONTEND", "noninteractive")
                .args(["-y", self.ppa.as_str()]),
            "add-apt-repository",
        )?;
        cx.run_checked(cx.apt().arg("update"), "apt-get update")?;
        Ok(())
    }
}
