use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Filesystem access for managed paths, optionally re-rooted under a prefix (`--root`).
///
/// Paths handed to this type are always host-absolute (`/etc/nginx/...`); the root is applied
/// on access. Symlink targets are written verbatim so they stay valid inside the final image.
#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
}

impl Default for HostFs {
    fn default() -> Self {
        Self::new("/")
    }
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_live(&self) -> bool {
        self.root == Path::new("/")
    }

    pub fn resolve(&self, p: &Path) -> PathBuf {
        let mut out = self.root.clone();
        for c in p.components() {
            match c {
                Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
                Component::ParentDir => {
                    if out != self.root {
                        out.pop();
                    }
                }
                Component::Normal(s) => out.push(s),
            }
        }
        out
    }

    pub fn exists(&self, p: &Path) -> bool {
        self.resolve(p).exists()
    }

    pub fn is_dir(&self, p: &Path) -> bool {
        self.resolve(p).is_dir()
    }

    /// Read a file; `Ok(None)` when it does not exist.
    pub fn read(&self, p: &Path) -> Result<Option<String>> {
        match fs::read_to_string(self.resolve(p)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", p.display())),
        }
    }

    pub fn create_dir_all(&self, p: &Path) -> Result<()> {
        fs::create_dir_all(self.resolve(p))
            .with_context(|| format!("failed to create directory {}", p.display()))
    }

    /// Replace a file atomically (temp file in the same directory, then rename).
    pub fn write(&self, p: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
        let target = self.resolve(p);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create parent of {}", p.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("failed to stage {}", p.display()))?;
        tmp.write_all(contents)
            .with_context(|| format!("failed to write {}", p.display()))?;
        let mode = match mode {
            Some(m) => m,
            None => fs::metadata(&target)
                .map(|m| m.permissions().mode() & 0o7777)
                .unwrap_or(0o644),
        };
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to chmod {}", p.display()))?;
        tmp.persist(&target)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to replace {}", p.display()))?;
        Ok(())
    }

    /// Append one line, creating the file with `mode` when absent.
    pub fn append_line(&self, p: &Path, line: &str, mode: u32) -> Result<()> {
        let target = self.resolve(p);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create parent of {}", p.display()))?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .with_context(|| format!("failed to open {}", p.display()))?;
        fs::set_permissions(&target, fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to chmod {}", p.display()))?;
        writeln!(f, "{line}").with_context(|| format!("failed to append to {}", p.display()))
    }

    pub fn set_mode(&self, p: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(self.resolve(p), fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to chmod {}", p.display()))
    }

    pub fn mode(&self, p: &Path) -> Option<u32> {
        fs::metadata(self.resolve(p))
            .ok()
            .map(|m| m.permissions().mode() & 0o7777)
    }

    /// `(uid, gid)` of `p`, if it exists.
    pub fn owner(&self, p: &Path) -> Option<(u32, u32)> {
        fs::metadata(self.resolve(p)).ok().map(|m| (m.uid(), m.gid()))
    }

    /// Current target of a symlink, if `p` is one.
    pub fn link_target(&self, p: &Path) -> Option<PathBuf> {
        fs::read_link(self.resolve(p)).ok()
    }

    /// Point `link` at `target`, replacing whatever is at `link`.
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let at = self.resolve(link);
        if let Some(parent) = at.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create parent of {}", link.display()))?;
        }
        if fs::symlink_metadata(&at).is_ok() {
            fs::remove_file(&at)
                .with_context(|| format!("failed to replace {}", link.display()))?;
        }
        symlink(target, &at).with_context(|| {
            format!("failed to link {} -> {}", link.display(), target.display())
        })
    }

    /// Remove a file or symlink; absent is fine.
    pub fn remove_file(&self, p: &Path) -> Result<()> {
        match fs::remove_file(self.resolve(p)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", p.display())),
        }
    }

    /// Remove an empty directory; absent is fine, a populated one is an error.
    pub fn remove_dir(&self, p: &Path) -> Result<()> {
        match fs::remove_dir(self.resolve(p)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", p.display())),
        }
    }

    pub fn remove_dir_all(&self, p: &Path) -> Result<()> {
        match fs::remove_dir_all(self.resolve(p)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", p.display())),
        }
    }

    /// File names directly under `dir`, sorted. Missing directory yields an empty list.
    pub fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let rd = match fs::read_dir(self.resolve(dir)) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", dir.display()))
            }
        };
        let mut names = Vec::new();
        for entry in rd {
            let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
