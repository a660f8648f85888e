use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Host-wide provisioning lock; the lock file is removed on drop.
///
/// Playbooks assume exclusive access to the host, so a second concurrent run is refused
/// instead of interleaving apt/systemctl calls.
#[derive(Debug)]
pub struct HostLock {
    file: File,
    path: PathBuf,
}

impl HostLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        // Best-effort unlock; ignore errors
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
    }
}

pub const LOCK_HELD_MESSAGE: &str =
    "Another provisioning run is already in progress (lock held). Please try again later.";

/// Acquire a non-blocking exclusive lock at `p`, recording our pid inside it.
pub fn acquire_lock_at(p: &Path) -> io::Result<HostLock> {
    if let Some(parent) = p.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let mut f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(p)?;
    match f.try_lock_exclusive() {
        Ok(()) => {
            let _ = f.set_len(0);
            let _ = writeln!(f, "{}", std::process::id());
            tracing::debug!(path = %p.display(), "host lock acquired");
            Ok(HostLock {
                file: f,
                path: p.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
            tracing::error!(path = %p.display(), "lock acquisition failed: lock held by another process");
            Err(io::Error::other(LOCK_HELD_MESSAGE))
        }
        Err(e) => Err(e),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Return true if this process should take the host lock.
/// Honor VDS_SKIP_LOCK=1 (used when a playbook re-invokes the binary as a sub-step).
pub fn should_acquire_lock() -> bool {
    std::env::var("VDS_SKIP_LOCK").ok().as_deref() != Some("1")
}
