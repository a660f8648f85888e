//! Naming and filesystem layout of a hosted domain.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Settings;
use crate::errors::ProvisionError;
use crate::util::id::stable_hash_hex;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_DB_NAME: usize = 64;
const MAX_DB_USER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Plain PHP site served from `public_html`.
    Php,
    /// Laravel application; nginx points at `app/public`.
    Laravel,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flavor::Php => "php",
            Flavor::Laravel => "laravel",
        })
    }
}

/// Lowercase, strip a trailing dot and a leading `www.`, then validate label syntax.
pub fn normalize_domain(raw: &str) -> Result<String, ProvisionError> {
    let lower = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let domain = lower.strip_prefix("www.").unwrap_or(&lower).to_string();
    let invalid = |why: &str| ProvisionError::Invalid(format!("invalid domain '{raw}': {why}"));
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(invalid("length must be 1..=253"));
    }
    if !domain.contains('.') {
        return Err(invalid("needs at least one dot"));
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("empty or over-long label"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(invalid("only a-z, 0-9 and '-' are allowed"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels cannot start or end with '-'"));
        }
    }
    Ok(domain)
}

/// `base` when it fits in `max`; otherwise a prefix plus `_` and 8 hex chars of the domain's
/// hash, so domains sharing a long prefix still get distinct names.
fn fit_identifier(base: &str, domain: &str, max: usize) -> String {
    if base.len() <= max {
        return base.to_string();
    }
    let hash = stable_hash_hex(domain);
    format!("{}_{}", &base[..max - 9], &hash[..8])
}

/// MySQL database and user names derived from a domain: non-alphanumerics become `_`,
/// shortened to the server's limits.
pub fn database_names(domain: &str) -> (String, String) {
    let base: String = domain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    (
        fit_identifier(&base, domain, MAX_DB_NAME),
        fit_identifier(&base, domain, MAX_DB_USER),
    )
}

/// `/var/www/example.com/app/public` → `example.com` when `cwd` lies inside a site dir.
pub fn domain_from_cwd(web_root: &Path, cwd: &Path) -> Option<String> {
    let rel = cwd.strip_prefix(web_root).ok()?;
    let first = rel.components().next()?;
    normalize_domain(first.as_os_str().to_str()?).ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct Site {
    pub domain: String,
    pub flavor: Flavor,
    pub dir: PathBuf,
    pub docroot: PathBuf,
    pub log_dir: PathBuf,
}

impl Site {
    pub fn new(settings: &Settings, domain: &str, flavor: Flavor) -> Self {
        let dir = settings.web_root.join(domain);
        let docroot = match flavor {
            Flavor::Php => dir.join("public_html"),
            Flavor::Laravel => dir.join("app/public"),
        };
        Self {
            domain: domain.to_string(),
            flavor,
            log_dir: dir.join("logs"),
            docroot,
            dir,
        }
    }

    pub fn project_dir(&self) -> PathBuf {
        self.dir.join("app")
    }

    pub fn fpm_socket(&self, settings: &Settings) -> PathBuf {
        PathBuf::from(format!(
            "/run/php/php{}-fpm-{}.sock",
            settings.php_version, self.domain
        ))
    }

    pub fn fpm_pool_path(&self, settings: &Settings) -> PathBuf {
        settings
            .php_etc_dir()
            .join("fpm/pool.d")
            .join(format!("{}.conf", self.domain))
    }

    pub fn vhost_available(&self) -> PathBuf {
        Path::new("/etc/nginx/sites-available").join(format!("{}.conf", self.domain))
    }

    pub fn vhost_enabled(&self) -> PathBuf {
        Path::new("/etc/nginx/sites-enabled").join(format!("{}.conf", self.domain))
    }

    pub fn worker_program(&self) -> String {
        format!("{}-worker", self.domain)
    }

    pub fn supervisor_conf(&self) -> PathBuf {
        Path::new("/etc/supervisor/conf.d").join(format!("{}.conf", self.worker_program()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("WWW.Example.COM.").unwrap(), "example.com");
        assert_eq!(normalize_domain("shop.example.co.uk").unwrap(), "shop.example.co.uk");
        for bad in ["", "localhost", "-a.com", "a-.com", "a..com", "a_b.com", "ex ample.com"] {
            assert!(normalize_domain(bad).is_err(), "{bad} accepted");
        }
        let long = format!("{}.com", "a".repeat(64));
        assert!(normalize_domain(&long).is_err());
    }

    #[test]
    fn test_database_names_truncate() {
        assert_eq!(
            database_names("shop.example.com"),
            ("shop_example_com".to_string(), "shop_example_com".to_string())
        );
        let long = format!("{}.example.com", "x".repeat(70));
        let (db, user) = database_names(&long);
        assert_eq!(db.len(), 64);
        assert_eq!(user.len(), 32);
        assert!(user.starts_with("xxxxxxxxxxxxxxxxxxxxxxx_"), "{user}");
    }

    #[test]
    fn test_database_names_distinct_for_shared_prefix() {
        let (db_a, user_a) = database_names("customer-portal-staging-eu-west.example.com");
        let (db_b, user_b) = database_names("customer-portal-staging-eu-west.example.org");
        assert_ne!(user_a, user_b);
        assert_eq!(user_a.len(), 32);
        assert!(user_a.starts_with("customer_portal_staging_"), "{user_a}");
        // Short enough for the database limit: kept verbatim.
        assert_eq!(db_a, "customer_portal_staging_eu_west_example_com");
        assert_ne!(db_a, db_b);
    }

    #[test]
    fn test_domain_from_cwd() {
        let root = Path::new("/var/www");
        assert_eq!(
            domain_from_cwd(root, Path::new("/var/www/shop.example.com/app")).as_deref(),
            Some("shop.example.com")
        );
        assert_eq!(domain_from_cwd(root, Path::new("/var/www")), None);
        assert_eq!(domain_from_cwd(root, Path::new("/home/x")), None);
    }

    #[test]
    fn test_layout_by_flavor() {
        let s = Settings::default();
        let php = Site::new(&s, "a.com", Flavor::Php);
        assert_eq!(php.docroot, PathBuf::from("/var/www/a.com/public_html"));
        let lv = Site::new(&s, "a.com", Flavor::Laravel);
        assert_eq!(lv.docroot, PathBuf::from("/var/www/a.com/app/public"));
        assert_eq!(lv.log_dir, PathBuf::from("/var/www/a.com/logs"));
        assert_eq!(lv.fpm_socket(&s), PathBuf::from("/run/php/php8.3-fpm-a.com.sock"));
        assert_eq!(
            lv.fpm_pool_path(&s),
            PathBuf::from("/etc/php/8.3/fpm/pool.d/a.com.conf")
        );
        assert_eq!(
            lv.supervisor_conf(),
            PathBuf::from("/etc/supervisor/conf.d/a.com-worker.conf")
        );
    }
}
