//! File-level steps: whole-file templates, directive edits, symlinks, directories.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use nix::unistd::{Group, User};

use crate::step::{Context, Handler, State, Step};
use crate::util::{set_directive, DirectiveStyle};

/// Write a file whose full contents we own.
pub struct WriteFile {
    path: PathBuf,
    contents: String,
    mode: Option<u32>,
    create_only: bool,
    notify: Vec<Handler>,
}

impl WriteFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            mode: None,
            create_only: false,
            notify: Vec::new(),
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Only write when absent; later edits by the operator are kept.
    pub fn create_only(mut self) -> Self {
        self.create_only = true;
        self
    }

    pub fn notify(mut self, handler: Handler) -> Self {
        self.notify.push(handler);
        self
    }
}

impl Step for WriteFile {
    fn name(&self) -> String {
        format!("write {}", self.path.display())
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let current = cx.fs.read(&self.path)?;
        if self.create_only {
            return Ok(State::from_bool(current.is_some(), "file absent"));
        }
        Ok(match current {
            None => State::missing("file absent"),
            Some(c) if c != self.contents => State::missing("content differs"),
            Some(_) => match self.mode {
                Some(m) if cx.fs.mode(&self.path) != Some(m) => {
                    State::missing(format!("mode is not {m:o}"))
                }
                _ => State::Satisfied,
            },
        })
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.fs.write(&self.path, self.contents.as_bytes(), self.mode)
    }

    fn notifies(&self) -> Vec<Handler> {
        self.notify.clone()
    }
}

/// Set `key = value` directives inside a file shipped by a package (sed-style).
pub struct EditFile {
    path: PathBuf,
    style: DirectiveStyle,
    edits: Vec<(String, String)>,
    notify: Vec<Handler>,
}

impl EditFile {
    pub fn new(path: impl Into<PathBuf>, style: DirectiveStyle) -> Self {
        Self {
            path: path.into(),
            style,
            edits: Vec::new(),
            notify: Vec::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.edits.push((key.into(), value.to_string()));
        self
    }

    pub fn notify(mut self, handler: Handler) -> Self {
        self.notify.push(handler);
        self
    }

    fn edited(&self, original: &str) -> String {
        self.edits
            .iter()
            .fold(original.to_string(), |acc, (k, v)| {
                set_directive(&acc, k, v, self.style)
            })
    }
}

impl Step for EditFile {
    fn name(&self) -> String {
        let keys: Vec<&str> = self.edits.iter().map(|(k, _)| k.as_str()).collect();
        format!("edit {} ({})", self.path.display(), keys.join(", "))
    }

    fn check(&self, cx: &Context) -> Result<State> {
        Ok(match cx.fs.read(&self.path)? {
            None => State::missing("file absent (package not installed yet?)"),
            Some(c) => State::from_bool(self.edited(&c) == c, "directives differ"),
        })
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let original = cx
            .fs
            .read(&self.path)?
            .ok_or_else(|| anyhow!("{} does not exist", self.path.display()))?;
        cx.fs.write(&self.path, self.edited(&original).as_bytes(), None)
    }

    fn notifies(&self) -> Vec<Handler> {
        self.notify.clone()
    }
}

pub struct Symlink {
    target: PathBuf,
    link: PathBuf,
    notify: Vec<Handler>,
}

impl Symlink {
    pub fn new(target: impl Into<PathBuf>, link: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            link: link.into(),
            notify: Vec::new(),
        }
    }

    pub fn notify(mut self, handler: Handler) -> Self {
        self.notify.push(handler);
        self
    }
}

impl Step for Symlink {
    fn name(&self) -> String {
        format!("link {} -> {}", self.link.display(), self.target.display())
    }

    fn check(&self, cx: &Context) -> Result<State> {
        Ok(State::from_bool(
            cx.fs.link_target(&self.link).as_deref() == Some(self.target.as_path()),
            "link absent or pointing elsewhere",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.fs.symlink(&self.target, &self.link)
    }

    fn notifies(&self) -> Vec<Handler> {
        self.notify.clone()
    }
}

pub struct RemoveFile {
    path: PathBuf,
    notify: Vec<Handler>,
}

impl RemoveFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            notify: Vec::new(),
        }
    }

    pub fn notify(mut self, handler: Handler) -> Self {
        self.notify.push(handler);
        self
    }
}

impl Step for RemoveFile {
    fn name(&self) -> String {
        format!("remove {}", self.path.display())
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let present = cx.fs.exists(&self.path) || cx.fs.link_target(&self.path).is_some();
        Ok(State::from_bool(!present, "still present"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.fs.remove_file(&self.path)
    }

    fn notifies(&self) -> Vec<Handler> {
        self.notify.clone()
    }
}

/// Directories owned by `owner:group`; ownership is set recursively when any is created.
pub struct EnsureDirs {
    label: String,
    dirs: Vec<PathBuf>,
    owner: Option<(String, String)>,
}

impl EnsureDirs {
    pub fn new(label: impl Into<String>, dirs: Vec<PathBuf>) -> Self {
        Self {
            label: label.into(),
            dirs,
            owner: None,
        }
    }

    pub fn owned_by(mut self, user: &str, group: &str) -> Self {
        self.owner = Some((user.to_string(), group.to_string()));
        self
    }

    fn top(&self) -> Option<&Path> {
        self.dirs.first().map(PathBuf::as_path)
    }

    /// Directories that exist but are not owned by `uid:gid`.
    fn wrongly_owned(&self, cx: &Context, uid: u32, gid: u32) -> Vec<String> {
        self.dirs
            .iter()
            .filter(|d| cx.fs.owner(d).is_some_and(|o| o != (uid, gid)))
            .map(|d| d.display().to_string())
            .collect()
    }
}

/// Numeric ids for `user:group` from the host account database.
fn lookup_owner(user: &str, group: &str) -> Result<Option<(u32, u32)>> {
    let uid = User::from_name(user)
        .with_context(|| format!("failed to look up user {user}"))?
        .map(|u| u.uid.as_raw());
    let gid = Group::from_name(group)
        .with_context(|| format!("failed to look up group {group}"))?
        .map(|g| g.gid.as_raw());
    Ok(uid.zip(gid))
}

impl Step for EnsureDirs {
    fn name(&self) -> String {
        format!("create {}", self.label)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let missing: Vec<String> = self
            .dirs
            .iter()
            .filter(|d| !cx.fs.is_dir(d))
            .map(|d| d.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Ok(State::missing(format!("missing {}", missing.join(", "))));
        }
        let Some((user, group)) = &self.owner else {
            return Ok(State::Satisfied);
        };
        // The host's account database says nothing about ids inside an image root.
        if !cx.fs.is_live() {
            return Ok(State::Satisfied);
        }
        let Some((uid, gid)) = lookup_owner(user, group)? else {
            return Ok(State::missing(format!("{user}:{group} unknown on this host")));
        };
        let wrong = self.wrongly_owned(cx, uid, gid);
        Ok(State::from_bool(
            wrong.is_empty(),
            format!("not owned by {user}:{group}: {}", wrong.join(", ")),
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        for d in &self.dirs {
            cx.fs.create_dir_all(d)?;
        }
        if let (Some((user, group)), Some(top)) = (&self.owner, self.top()) {
            cx.chown_recursive(top, user, group)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::sync::Arc;

    fn cx() -> (tempfile::TempDir, Arc<ScriptedRunner>, Context) {
        let td = tempfile::tempdir().expect("tmpdir");
        let r = Arc::new(ScriptedRunner::new());
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), r.clone());
        (td, r, cx)
    }

    #[test]
    fn test_write_file_idempotent_by_content_and_mode() {
        let (_td, _r, cx) = cx();
        let step = WriteFile::new("/etc/fail2ban/jail.d/vds.local", "[sshd]\n").mode(0o644);
        assert_eq!(step.check(&cx).unwrap(), State::missing("file absent"));
        step.apply(&cx).unwrap();
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
        cx.fs
            .set_mode(Path::new("/etc/fail2ban/jail.d/vds.local"), 0o600)
            .unwrap();
        assert!(matches!(step.check(&cx).unwrap(), State::Missing(_)));
        let changed = WriteFile::new("/etc/fail2ban/jail.d/vds.local", "[sshd]\nenabled = true\n");
        assert_eq!(changed.check(&cx).unwrap(), State::missing("content differs"));
    }

    #[test]
    fn test_create_only_keeps_operator_edits() {
        let (_td, _r, cx) = cx();
        let p = Path::new("/usr/share/phpmyadmin/config.inc.php");
        cx.fs.write(p, b"<?php // edited\n", None).unwrap();
        let step = WriteFile::new(p, "<?php // generated\n").create_only();
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
    }

    #[test]
    fn test_edit_file_sets_directives_once() {
        let (_td, _r, cx) = cx();
        let p = Path::new("/etc/php/8.3/fpm/pool.d/www.conf");
        cx.fs
            .write(p, b"[www]\npm.max_children = 5\n;pm.max_requests = 500\n", None)
            .unwrap();
        let step = EditFile::new(p, DirectiveStyle::Equals)
            .set("pm.max_children", 8)
            .set("pm.max_requests", 500);
        assert!(matches!(step.check(&cx).unwrap(), State::Missing(_)));
        step.apply(&cx).unwrap();
        assert_eq!(
            cx.fs.read(p).unwrap().as_deref(),
            Some("[www]\npm.max_children = 8\npm.max_requests = 500\n")
        );
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
    }

    #[test]
    fn test_edit_missing_file_fails_apply() {
        let (_td, _r, cx) = cx();
        let step = EditFile::new("/etc/memcached.conf", DirectiveStyle::Flag).set("-m", 128);
        assert!(matches!(step.check(&cx).unwrap(), State::Missing(_)));
        assert!(step.apply(&cx).is_err());
    }

    #[test]
    fn test_symlink_and_remove() {
        let (_td, _r, cx) = cx();
        let link = Symlink::new(
            "/etc/nginx/sites-available/a.com.conf",
            "/etc/nginx/sites-enabled/a.com.conf",
        );
        assert!(matches!(link.check(&cx).unwrap(), State::Missing(_)));
        link.apply(&cx).unwrap();
        assert_eq!(link.check(&cx).unwrap(), State::Satisfied);

        let rm = RemoveFile::new("/etc/nginx/sites-enabled/a.com.conf");
        // Dangling under a temp root; still counts as present.
        assert!(matches!(rm.check(&cx).unwrap(), State::Missing(_)));
        rm.apply(&cx).unwrap();
        assert_eq!(rm.check(&cx).unwrap(), State::Satisfied);
    }

    #[test]
    fn test_ensure_dirs_chowns_top_dir() {
        let (td, r, cx) = cx();
        let step = EnsureDirs::new(
            "site a.com",
            vec![
                PathBuf::from("/var/www/a.com"),
                PathBuf::from("/var/www/a.com/logs"),
            ],
        )
        .owned_by("vdsadmin", "www-data");
        step.apply(&cx).unwrap();
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
        let expected = format!(
            "chown -R vdsadmin:www-data {}",
            td.path().join("var/www/a.com").display()
        );
        assert!(r.lines().contains(&expected), "{:?}", r.lines());
    }

    #[test]
    fn test_ensure_dirs_reports_foreign_owner() {
        let (_td, _r, cx) = cx();
        let step = EnsureDirs::new("site a.com", vec![PathBuf::from("/var/www/a.com")])
            .owned_by("vdsadmin", "www-data");
        step.apply(&cx).unwrap();
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        assert!(step.wrongly_owned(&cx, uid, gid).is_empty());
        assert_eq!(
            step.wrongly_owned(&cx, uid.wrapping_add(1), gid),
            vec!["/var/www/a.com".to_string()]
        );
        assert_eq!(cx.fs.owner(Path::new("/var/www/a.com")), Some((uid, gid)));
    }

    #[test]
    fn test_lookup_owner_resolves_root() {
        assert_eq!(lookup_owner("root", "root").unwrap(), Some((0, 0)));
        assert_eq!(lookup_owner("no-such-user-vds", "root").unwrap(), None);
    }
}
