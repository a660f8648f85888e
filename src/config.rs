//! Layered settings: built-in defaults, then a YAML file, then `VDS_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ProvisionError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vds-provisioner/config.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub admin_user: String,
    pub web_group: String,
    pub php_version: String,
    pub web_root: PathBuf,
    /// Defaults to `~/.all_settings` of the invoking user.
    pub credentials_file: Option<PathBuf>,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub certbot_email: Option<String>,
    #[serde(deserialize_with = "de_duration", serialize_with = "ser_duration")]
    pub command_timeout: Duration,
    pub extra_packages: Vec<String>,
    pub probe: ProbeSettings,
    pub phpmyadmin: PhpMyAdminSettings,
    pub ioncube: IoncubeSettings,
    pub laravel: LaravelSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeSettings {
    pub attempts: u32,
    #[serde(deserialize_with = "de_duration", serialize_with = "ser_duration")]
    pub delay: Duration,
    /// Resolve the domain to 127.0.0.1 so the vhost can be checked before DNS propagates.
    pub resolve_local: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhpMyAdminSettings {
    pub enabled: bool,
    pub url: String,
    pub install_dir: PathBuf,
    /// URL path the snippet exposes phpMyAdmin under, on every vhost.
    pub location: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IoncubeSettings {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LaravelSettings {
    pub package: String,
    pub queue_workers: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_user: "vdsadmin".to_string(),
            web_group: "www-data".to_string(),
            php_version: "8.3".to_string(),
            web_root: PathBuf::from("/var/www"),
            credentials_file: None,
            log_file: PathBuf::from("/var/log/vds-provisioner.log"),
            lock_file: PathBuf::from("/run/lock/vds-provisioner.lock"),
            certbot_email: None,
            command_timeout: Duration::from_secs(30 * 60),
            extra_packages: Vec::new(),
            probe: ProbeSettings::default(),
            phpmyadmin: PhpMyAdminSettings::default(),
            ioncube: IoncubeSettings::default(),
            laravel: LaravelSettings::default(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(3),
            resolve_local: false,
        }
    }
}

impl Default for PhpMyAdminSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://www.phpmyadmin.net/downloads/phpMyAdmin-latest-all-languages.zip"
                .to_string(),
            install_dir: PathBuf::from("/usr/share/phpmyadmin"),
            location: "/dbadmin".to_string(),
        }
    }
}

impl Default for IoncubeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://downloads.ioncube.com/loader_downloads/ioncube_loaders_lin_x86-64.zip"
                .to_string(),
        }
    }
}

impl Default for LaravelSettings {
    fn default() -> Self {
        Self {
            package: "laravel/laravel".to_string(),
            queue_workers: 1,
        }
    }
}

fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(d)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

fn ser_duration<S: serde::Serializer>(v: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*v).to_string())
}

impl Settings {
    /// Resolve the config file path (flag, then $VDS_CONFIG, then the default path if present),
    /// load it, and apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| {
                env::var("VDS_CONFIG")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from)
            })
            .or_else(|| {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                p.exists().then_some(p)
            });
        let mut settings = match path {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        settings.apply_env(|k| env::var(k).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `VDS_*` overrides through a lookup function (tests pass a map).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(v) = get("VDS_ADMIN_USER") {
            self.admin_user = v;
        }
        if let Some(v) = get("VDS_WEB_GROUP") {
            self.web_group = v;
        }
        if let Some(v) = get("VDS_PHP_VERSION") {
            self.php_version = v;
        }
        if let Some(v) = get("VDS_WEB_ROOT") {
            self.web_root = PathBuf::from(v);
        }
        if let Some(v) = get("VDS_CREDENTIALS_FILE") {
            self.credentials_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("VDS_LOG_FILE") {
            self.log_file = PathBuf::from(v);
        }
        if let Some(v) = get("VDS_LOCK_FILE") {
            self.lock_file = PathBuf::from(v);
        }
        if let Some(v) = get("VDS_CERTBOT_EMAIL") {
            self.certbot_email = Some(v);
        }
        if let Some(v) = get("VDS_COMMAND_TIMEOUT") {
            self.command_timeout = humantime::parse_duration(&v)
                .with_context(|| format!("VDS_COMMAND_TIMEOUT: invalid duration '{v}'"))?;
        }
        if let Some(v) = get("VDS_PROBE_RESOLVE_LOCAL") {
            self.probe.resolve_local = matches!(v.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |m: String| -> anyhow::Error { ProvisionError::Invalid(m).into() };
        if !is_valid_unix_name(&self.admin_user) {
            return Err(invalid(format!("admin_user '{}' is not a valid user name", self.admin_user)));
        }
        if !is_valid_unix_name(&self.web_group) {
            return Err(invalid(format!("web_group '{}' is not a valid group name", self.web_group)));
        }
        let ver_ok = self
            .php_version
            .split_once('.')
            .map(|(a, b)| {
                !a.is_empty()
                    && !b.is_empty()
                    && a.bytes().all(|c| c.is_ascii_digit())
                    && b.bytes().all(|c| c.is_ascii_digit())
            })
            .unwrap_or(false);
        if !ver_ok {
            return Err(invalid(format!(
                "php_version '{}' must look like 8.3",
                self.php_version
            )));
        }
        if !self.web_root.is_absolute() {
            return Err(invalid("web_root must be an absolute path".to_string()));
        }
        if !self.phpmyadmin.location.starts_with('/') || self.phpmyadmin.location.len() < 2 {
            return Err(invalid(
                "phpmyadmin.location must be a path like /dbadmin".to_string(),
            ));
        }
        if self.probe.attempts == 0 {
            return Err(invalid("probe.attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `~/.all_settings` unless configured.
    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_file.clone().unwrap_or_else(|| {
            home::home_dir()
                .unwrap_or_else(|| PathBuf::from("/root"))
                .join(".all_settings")
        })
    }

    pub fn php_fpm_service(&self) -> String {
        format!("php{}-fpm", self.php_version)
    }

    pub fn php_etc_dir(&self) -> PathBuf {
        PathBuf::from(format!("/etc/php/{}", self.php_version))
    }
}

fn is_valid_unix_name(s: &str) -> bool {
    let b = s.as_bytes();
    !b.is_empty()
        && b.len() <= 32
        && (b[0].is_ascii_lowercase() || b[0] == b'_')
        && b.iter()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == b'_' || *c == b'-')
}
