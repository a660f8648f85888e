//! Laravel bootstrap inside `<site>/app`: composer project, `.env`, artisan, assets, permissions.
//!
//! Every project command runs as the admin user from the project directory.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use walkdir::WalkDir;

use crate::step::{Context, OnFailure, State, Step};
use crate::util::{set_directive, DirectiveStyle, ExecRequest};

/// Paths the framework writes to at runtime.
pub const WRITABLE_DIRS: [&str; 2] = ["storage", "bootstrap/cache"];

fn artisan(cx: &Context, project: &Path, args: &[&str]) -> ExecRequest {
    cx.cmd_as_admin("php")
        .arg("artisan")
        .args(args.iter().copied())
        .cwd(cx.fs.resolve(project))
}

/// Parse a dotenv file with dotenvy; `None` when absent.
fn read_env(cx: &Context, path: &Path) -> Result<Option<HashMap<String, String>>> {
    let real = cx.fs.resolve(path);
    if !real.is_file() {
        return Ok(None);
    }
    let mut map = HashMap::new();
    for item in dotenvy::from_path_iter(&real)
        .with_context(|| format!("failed to open {}", path.display()))?
    {
        let (k, v) = item.with_context(|| format!("failed to parse {}", path.display()))?;
        map.insert(k, v);
    }
    Ok(Some(map))
}

/// `composer create-project <package> app` into the site directory.
pub struct ComposerProject {
    site_dir: PathBuf,
}

impl ComposerProject {
    pub fn new(site_dir: &Path) -> Self {
        Self {
            site_dir: site_dir.to_path_buf(),
        }
    }

    fn project_dir(&self) -> PathBuf {
        self.site_dir.join("app")
    }

    /// The vhost step leaves an empty `app/public` behind; composer refuses a non-empty target,
    /// so clear that placeholder and refuse anything else.
    fn clear_placeholder(&self, cx: &Context) -> Result<()> {
        let app = self.project_dir();
        if !cx.fs.exists(&app) {
            return Ok(());
        }
        let entries = cx.fs.list(&app)?;
        let only_empty_public =
            entries == ["public"] && cx.fs.list(&app.join("public"))?.is_empty();
        if entries.is_empty() || only_empty_public {
            return cx.fs.remove_dir_all(&app);
        }
        Err(anyhow!(
            "{} exists, is not empty and has no artisan; refusing to overwrite it",
            app.display()
        ))
    }
}

impl Step for ComposerProject {
    fn name(&self) -> String {
        format!("create laravel project in {}", self.project_dir().display())
    }

    fn check(&self, cx: &Context) -> Result<State> {
        Ok(State::from_bool(
            cx.fs.exists(&self.project_dir().join("artisan")),
            "no artisan in project dir",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        self.clear_placeholder(cx)?;
        let package = &cx.settings.laravel.package;
        cx.run_checked(
            cx.cmd_as_admin("composer")
                .args([
                    "create-project",
                    "--no-interaction",
                    "--prefer-dist",
                    package.as_str(),
                    "app",
                ])
                .cwd(cx.fs.resolve(&self.site_dir)),
            "composer create-project",
        )?;
        Ok(())
    }

    fn verify(&self, cx: &Context) -> Result<()> {
        match self.check(cx)? {
            State::Satisfied => Ok(()),
            State::Missing(m) => Err(anyhow!("{m} after composer create-project")),
        }
    }
}

enum EnvValue {
    Literal(String),
    /// Read from the credentials file; generated on apply if not recorded yet.
    Credential(String),
}

/// Keys in `<project>/.env`, seeded from `.env.example` on first write.
pub struct EnvFile {
    project_dir: PathBuf,
    values: Vec<(String, EnvValue)>,
}

impl EnvFile {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            values: Vec::new(),
        }
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values
            .push((key.to_string(), EnvValue::Literal(value.into())));
        self
    }

    pub fn credential(mut self, key: &str, label: &str) -> Self {
        self.values
            .push((key.to_string(), EnvValue::Credential(label.to_string())));
        self
    }

    fn path(&self) -> PathBuf {
        self.project_dir.join(".env")
    }

    /// Desired values; with `create` unset, unrecorded credentials resolve to `None`.
    fn resolved(&self, cx: &Context, create: bool) -> Result<Vec<(&str, Option<String>)>> {
        self.values
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    EnvValue::Literal(s) => Some(s.clone()),
                    EnvValue::Credential(label) if create => Some(cx.creds.get_or_create(label)?),
                    EnvValue::Credential(label) => cx.creds.get(label)?,
                };
                Ok((k.as_str(), value))
            })
            .collect()
    }
}

impl Step for EnvFile {
    fn name(&self) -> String {
        format!("configure {}", self.path().display())
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let Some(current) = read_env(cx, &self.path())? else {
            return Ok(State::missing(".env absent"));
        };
        let wanted = self.resolved(cx, false)?;
        let stale: Vec<&str> = wanted
            .iter()
            .filter(|(k, v)| v.is_none() || current.get(*k) != v.as_ref())
            .map(|(k, _)| *k)
            .collect();
        Ok(State::from_bool(
            stale.is_empty(),
            format!("differs: {}", stale.join(", ")),
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let base = match cx.fs.read(&self.path())? {
            Some(s) => s,
            None => cx
                .fs
                .read(&self.project_dir.join(".env.example"))?
                .unwrap_or_default(),
        };
        let mut contents = base;
        for (k, v) in self.resolved(cx, true)? {
            if let Some(v) = v {
                contents = set_directive(&contents, k, &v, DirectiveStyle::Assign);
            }
        }
        let path = self.path();
        cx.fs.write(&path, contents.as_bytes(), Some(0o640))?;
        cx.chown_recursive(&path, &cx.settings.admin_user, &cx.settings.web_group)
    }
}

/// `php artisan key:generate` while `APP_KEY` is empty.
pub struct AppKey {
    project_dir: PathBuf,
}

impl AppKey {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }
}

impl Step for AppKey {
    fn name(&self) -> String {
        "generate application key".to_string()
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let env = read_env(cx, &self.project_dir.join(".env"))?.unwrap_or_default();
        let has_key = env.get("APP_KEY").map(|k| !k.is_empty()).unwrap_or(false);
        Ok(State::from_bool(has_key, "APP_KEY empty"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.run_checked(
            artisan(cx, &self.project_dir, &["key:generate", "--force"]),
            "artisan key:generate",
        )?;
        Ok(())
    }
}

/// `php artisan migrate --force`. Migrations track their own state, so this always runs.
pub struct Migrate {
    project_dir: PathBuf,
}

impl Migrate {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }
}

impl Step for Migrate {
    fn name(&self) -> String {
        "run database migrations".to_string()
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Continue
    }

    fn check(&self, _cx: &Context) -> Result<State> {
        Ok(State::missing("migrations are applied on every run"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.run_checked(
            artisan(cx, &self.project_dir, &["migrate", "--force"]),
            "artisan migrate",
        )?;
        Ok(())
    }
}

pub struct StorageLink {
    project_dir: PathBuf,
}

impl StorageLink {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }
}

impl Step for StorageLink {
    fn name(&self) -> String {
        "link public/storage".to_string()
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let link = self.project_dir.join("public/storage");
        Ok(State::from_bool(
            cx.fs.link_target(&link).is_some() || cx.fs.exists(&link),
            "public/storage absent",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.run_checked(
            artisan(cx, &self.project_dir, &["storage:link"]),
            "artisan storage:link",
        )?;
        Ok(())
    }
}

/// `npm install && npm run build` until a Vite manifest exists.
pub struct AssetBuild {
    project_dir: PathBuf,
}

impl AssetBuild {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }
}

impl Step for AssetBuild {
    fn name(&self) -> String {
        "build front-end assets".to_string()
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Continue
    }

    fn check(&self, cx: &Context) -> Result<State> {
        if !cx.fs.exists(&self.project_dir.join("package.json")) {
            return Ok(State::Satisfied);
        }
        Ok(State::from_bool(
            cx.fs.exists(&self.project_dir.join("public/build/manifest.json")),
            "no build manifest",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let cwd = cx.fs.resolve(&self.project_dir);
        cx.run_checked(
            cx.cmd_as_admin("npm").args(["install", "--no-audit", "--no-fund"]).cwd(&cwd),
            "npm install",
        )?;
        cx.run_checked(
            cx.cmd_as_admin("npm").args(["run", "build"]).cwd(&cwd),
            "npm run build",
        )?;
        Ok(())
    }
}

/// Group-writable `storage` and `bootstrap/cache`, owned by admin and the web group.
pub struct WritablePaths {
    project_dir: PathBuf,
}

impl WritablePaths {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }

    /// First entry below the writable dirs that lacks the group write bit.
    fn first_unwritable(&self, cx: &Context) -> Option<PathBuf> {
        WRITABLE_DIRS.iter().find_map(|d| {
            let root = cx.fs.resolve(&self.project_dir.join(d));
            if !root.exists() {
                return Some(root);
            }
            WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .find(|e| {
                    e.metadata()
                        .map(|m| !m.file_type().is_symlink() && m.permissions().mode() & 0o020 == 0)
                        .unwrap_or(false)
                })
                .map(|e| e.into_path())
        })
    }
}

impl Step for WritablePaths {
    fn name(&self) -> String {
        format!("make {} group-writable", WRITABLE_DIRS.join(" and "))
    }

    fn check(&self, cx: &Context) -> Result<State> {
        Ok(match self.first_unwritable(cx) {
            None => State::Satisfied,
            Some(p) => State::missing(format!("{} not group-writable", p.display())),
        })
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        for d in WRITABLE_DIRS {
            let dir = self.project_dir.join(d);
            cx.fs.create_dir_all(&dir)?;
            cx.chown_recursive(&dir, &cx.settings.admin_user, &cx.settings.web_group)?;
            cx.run_checked(
                cx.cmd("chmod")
                    .args(["-R", "ug+rwX"])
                    .arg(cx.fs.resolve(&dir).as_os_str()),
                "chmod",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::fs;
    use std::sync::Arc;

    fn cx(r: Arc<ScriptedRunner>) -> (tempfile::TempDir, Context) {
        let td = tempfile::tempdir().expect("tmpdir");
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), r);
        (td, cx)
    }

    const SITE: &str = "/var/www/shop.example.com";
    const APP: &str = "/var/www/shop.example.com/app";

    #[test]
    fn test_composer_clears_empty_placeholder() {
        let r = Arc::new(ScriptedRunner::new());
        let (td, cx) = cx(r.clone());
        cx.fs.create_dir_all(Path::new("/var/www/shop.example.com/app/public")).unwrap();
        let step = ComposerProject::new(Path::new(SITE));
        assert_eq!(step.check(&cx).unwrap(), State::missing("no artisan in project dir"));
        step.apply(&cx).unwrap();
        assert!(!td.path().join("var/www/shop.example.com/app").exists());
        assert!(r.ran(
            "sudo -u vdsadmin -H -- composer create-project --no-interaction --prefer-dist laravel/laravel app"
        ));
    }

    #[test]
    fn test_composer_refuses_non_empty_dir() {
        let r = Arc::new(ScriptedRunner::new());
        let (_td, cx) = cx(r.clone());
        cx.fs
            .write(Path::new("/var/www/shop.example.com/app/public/index.html"), b"hi", None)
            .unwrap();
        let err = ComposerProject::new(Path::new(SITE)).apply(&cx).unwrap_err();
        assert!(err.to_string().contains("refusing"), "{err}");
        assert!(!r.ran("sudo -u vdsadmin -H -- composer"));
    }

    #[test]
    fn test_env_file_seeded_from_example() {
        let r = Arc::new(ScriptedRunner::new());
        let (td, cx) = cx(r);
        cx.fs
            .write(
                Path::new("/var/www/shop.example.com/app/.env.example"),
                b"APP_NAME=Laravel\nAPP_KEY=\nDB_CONNECTION=sqlite\n# DB_DATABASE=laravel\n",
                None,
            )
            .unwrap();
        let step = EnvFile::new(Path::new(APP))
            .set("APP_NAME", "shop.example.com")
            .set("DB_CONNECTION", "mysql")
            .set("DB_DATABASE", "shop_example_com");
        assert_eq!(step.check(&cx).unwrap(), State::missing(".env absent"));
        step.apply(&cx).unwrap();
        let env = fs::read_to_string(td.path().join("var/www/shop.example.com/app/.env")).unwrap();
        assert_eq!(
            env,
            "APP_NAME=shop.example.com\nAPP_KEY=\nDB_CONNECTION=mysql\nDB_DATABASE=shop_example_com\n"
        );
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
        assert_eq!(
            AppKey::new(Path::new(APP)).check(&cx).unwrap(),
            State::missing("APP_KEY empty")
        );
    }

    #[test]
    fn test_env_credential_resolved_from_store() {
        let r = Arc::new(ScriptedRunner::new());
        let (td, cx) = cx(r);
        let step = EnvFile::new(Path::new(APP)).credential("DB_PASSWORD", "mysql_shop_password");
        step.apply(&cx).unwrap();
        let pw = cx.creds.get("mysql_shop_password").unwrap().expect("generated");
        let env = fs::read_to_string(td.path().join("var/www/shop.example.com/app/.env")).unwrap();
        assert_eq!(env, format!("DB_PASSWORD={pw}\n"));
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
    }

    #[test]
    fn test_artisan_runs_as_admin_in_project_dir() {
        let r = Arc::new(ScriptedRunner::new());
        let (_td, cx) = cx(r.clone());
        AppKey::new(Path::new(APP)).apply(&cx).unwrap();
        Migrate::new(Path::new(APP)).apply(&cx).unwrap();
        assert!(r.ran("sudo -u vdsadmin -H -- php artisan key:generate --force"));
        assert!(r.ran("sudo -u vdsadmin -H -- php artisan migrate --force"));
        assert_eq!(Migrate::new(Path::new(APP)).on_failure(), OnFailure::Continue);
    }

    #[test]
    fn test_asset_build_skipped_without_package_json() {
        let r = Arc::new(ScriptedRunner::new());
        let (_td, cx) = cx(r);
        let step = AssetBuild::new(Path::new(APP));
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
        cx.fs
            .write(Path::new("/var/www/shop.example.com/app/package.json"), b"{}", None)
            .unwrap();
        assert_eq!(step.check(&cx).unwrap(), State::missing("no build manifest"));
    }

    #[test]
    fn test_writable_paths_detects_missing_group_write() {
        let r = Arc::new(ScriptedRunner::new());
        let (_td, cx) = cx(r);
        let step = WritablePaths::new(Path::new(APP));
        assert!(matches!(step.check(&cx).unwrap(), State::Missing(_)));
        for d in WRITABLE_DIRS {
            let p = Path::new(APP).join(d);
            cx.fs.create_dir_all(&p).unwrap();
            cx.fs.set_mode(&p, 0o775).unwrap();
        }
        let log = Path::new(APP).join("storage/laravel.log");
        cx.fs.write(&log, b"", Some(0o644)).unwrap();
        assert!(matches!(step.check(&cx).unwrap(), State::Missing(_)));
        cx.fs.set_mode(&log, 0o664).unwrap();
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
    }
}
