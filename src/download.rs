//! Fetch vendor archives over HTTPS and unpack them.

use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;

pub fn fetch(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    tracing::info!(url, "downloading");
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("vds-provisioner/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let resp = client
        .get(url)
        .send()
        .with_context(|| format!("GET {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("GET {url} returned {status}"));
    }
    let bytes = resp.bytes().with_context(|| format!("reading body of {url}"))?;
    tracing::debug!(url, bytes = bytes.len(), "downloaded");
    Ok(bytes.to_vec())
}

/// Entry path with the first component removed (`phpMyAdmin-5.2.1-all-languages/index.php` →
/// `index.php`). `None` for the top directory itself.
fn strip_top(p: &Path) -> Option<PathBuf> {
    let rest: PathBuf = p
        .components()
        .skip(1)
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Unpack `archive` into `dest`. Entries escaping `dest` are rejected by the zip crate's
/// `enclosed_name`. Returns the number of files written.
pub fn unpack_zip(archive: &[u8], dest: &Path, strip_top_dir: bool) -> Result<usize> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).context("not a zip archive")?;
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).context("corrupt zip entry")?;
        let Some(name) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(entry = entry.name(), "skipping unsafe zip entry");
            continue;
        };
        let rel = if strip_top_dir {
            match strip_top(&name) {
                Some(r) => r,
                None => continue,
            }
        } else {
            name
        };
        let out = dest.join(&rel);
        if entry.is_dir() {
            fs::create_dir_all(&out).with_context(|| format!("create {}", out.display()))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = File::create(&out).with_context(|| format!("create {}", out.display()))?;
        io::copy(&mut entry, &mut file).with_context(|| format!("write {}", out.display()))?;
        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777))?;
        }
        written += 1;
    }
    Ok(written)
}

/// Contents of the first entry whose path ends with `suffix`.
pub fn read_zip_entry(archive: &[u8], suffix: &str) -> Result<Option<Vec<u8>>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).context("not a zip archive")?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).context("corrupt zip entry")?;
        if !entry.is_dir() && entry.name().ends_with(suffix) {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}
