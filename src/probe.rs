//! Read-only precondition probes against the host.

use std::path::PathBuf;

use anyhow::Result;

use crate::step::Context;

/// `dpkg -s <pkg>` exits 0 and reports `Status: install ok installed`.
pub fn package_installed(cx: &Context, pkg: &str) -> Result<bool> {
    let out = cx.probe(cx.cmd("dpkg").args(["-s", pkg]))?;
    Ok(out
        .map(|o| {
            o.success()
                && o.stdout
                    .lines()
                    .any(|l| l.trim() == "Status: install ok installed")
        })
        .unwrap_or(false))
}

/// Subset of `pkgs` that is not installed, order preserved.
pub fn missing_packages(cx: &Context, pkgs: &[String]) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for p in pkgs {
        if !package_installed(cx, p)? {
            missing.push(p.clone());
        }
    }
    Ok(missing)
}

/// `id -u <user>` exits 0.
pub fn user_exists(cx: &Context, user: &str) -> Result<bool> {
    Ok(cx
        .probe(cx.cmd("id").args(["-u", user]))?
        .map(|o| o.success())
        .unwrap_or(false))
}

/// Groups of `user` as reported by `id -nG`.
pub fn user_groups(cx: &Context, user: &str) -> Result<Vec<String>> {
    Ok(cx
        .probe(cx.cmd("id").args(["-nG", user]))?
        .filter(|o| o.success())
        .map(|o| o.stdout.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default())
}

/// `systemctl is-active <unit>` prints `active`.
pub fn service_active(cx: &Context, unit: &str) -> Result<bool> {
    Ok(cx
        .probe(cx.cmd("systemctl").args(["is-active", unit]))?
        .map(|o| o.stdout.trim() == "active")
        .unwrap_or(false))
}

/// `systemctl is-enabled <unit>` prints `enabled`.
pub fn service_enabled(cx: &Context, unit: &str) -> Result<bool> {
    Ok(cx
        .probe(cx.cmd("systemctl").args(["is-enabled", unit]))?
        .map(|o| o.stdout.trim() == "enabled")
        .unwrap_or(false))
}

/// `extension_dir` of the installed PHP CLI, e.g. `/usr/lib/php/20230831`.
pub fn php_extension_dir(cx: &Context) -> Result<Option<PathBuf>> {
    let php = format!("php{}", cx.settings.php_version);
    Ok(cx
        .probe(cx.cmd(&php).args(["-r", "echo ini_get('extension_dir');"]))?
        .filter(|o| o.success())
        .map(|o| o.stdout.trim().to_string())
        .filter(|s| s.starts_with('/'))
        .map(PathBuf::from))
}

/// Run a SQL statement through the local `mysql` client (socket auth as root) and return the
/// first column of the first row, if any.
pub fn mysql_scalar(cx: &Context, sql: &str) -> Result<Option<String>> {
    let out = match cx.probe(cx.cmd("mysql").args(["-N", "-B"]).stdin(sql))? {
        Some(o) if o.success() => o,
        _ => return Ok(None),
    };
    Ok(out
        .stdout
        .lines()
        .next()
        .and_then(|l| l.split('\t').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::sync::Arc;

    fn cx_with(runner: Arc<ScriptedRunner>) -> (tempfile::TempDir, Context) {
        let td = tempfile::tempdir().expect("tmpdir");
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), runner);
        (td, cx)
    }

    #[test]
    fn test_package_installed_requires_ok_status() {
        let r = Arc::new(ScriptedRunner::new());
        r.on("dpkg -s nginx", 0, "Package: nginx\nStatus: install ok installed\n");
        r.on("dpkg -s mysql-server", 0, "Package: mysql-server\nStatus: deinstall ok config-files\n");
        r.on("dpkg -s", 1, "");
        let (_td, cx) = cx_with(r);
        assert!(package_installed(&cx, "nginx").unwrap());
        assert!(!package_installed(&cx, "mysql-server").unwrap());
        let missing = missing_packages(
            &cx,
            &["nginx".to_string(), "memcached".to_string()],
        )
        .unwrap();
        assert_eq!(missing, vec!["memcached".to_string()]);
    }

    #[test]
    fn test_missing_binaries_read_as_absent() {
        let r = Arc::new(ScriptedRunner::new());
        r.missing("dpkg");
        r.missing("systemctl");
        r.missing("mysql");
        let (_td, cx) = cx_with(r);
        assert!(!package_installed(&cx, "nginx").unwrap());
        assert!(!service_active(&cx, "nginx").unwrap());
        assert_eq!(mysql_scalar(&cx, "SELECT 1").unwrap(), None);
    }

    #[test]
    fn test_user_and_service_probes() {
        let r = Arc::new(ScriptedRunner::new());
        r.on("id -u vdsadmin", 0, "1000\n");
        r.on("id -u", 1, "");
        r.on("id -nG vdsadmin", 0, "vdsadmin www-data\n");
        r.on("systemctl is-active nginx", 0, "active\n");
        r.on("systemctl is-active", 3, "inactive\n");
        r.on("systemctl is-enabled nginx", 0, "enabled\n");
        let (_td, cx) = cx_with(r);
        assert!(user_exists(&cx, "vdsadmin").unwrap());
        assert!(!user_exists(&cx, "ghost").unwrap());
        assert_eq!(user_groups(&cx, "vdsadmin").unwrap(), vec!["vdsadmin", "www-data"]);
        assert!(service_active(&cx, "nginx").unwrap());
        assert!(!service_active(&cx, "mysql").unwrap());
        assert!(service_enabled(&cx, "nginx").unwrap());
    }

    #[test]
    fn test_mysql_scalar_first_cell() {
        let r = Arc::new(ScriptedRunner::new());
        r.on("mysql -N -B", 0, "3\tx\n4\ty\n");
        let (_td, cx) = cx_with(r.clone());
        assert_eq!(
            mysql_scalar(&cx, "SELECT COUNT(*) FROM mysql.user").unwrap().as_deref(),
            Some("3")
        );
        assert_eq!(
            r.calls().last().and_then(|c| c.stdin.clone()).as_deref(),
            Some("SELECT COUNT(*) FROM mysql.user")
        );
    }

    #[test]
    fn test_php_extension_dir() {
        let r = Arc::new(ScriptedRunner::new());
        r.on("php8.3 -r", 0, "/usr/lib/php/20230831");
        let (_td, cx) = cx_with(r);
        assert_eq!(
            php_extension_dir(&cx).unwrap(),
            Some(PathBuf::from("/usr/lib/php/20230831"))
        );

        let r = Arc::new(ScriptedRunner::new());
        r.missing("php8.3");
        let (_td, cx) = cx_with(r);
        assert_eq!(php_extension_dir(&cx).unwrap(), None);
    }
}
