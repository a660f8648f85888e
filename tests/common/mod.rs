/*!
Shared helpers for the integration tests.

- bin_command(root): the built binary, isolated from the host's config, log and lock files
- scripted_host(): a temporary `--root` with a fixed /proc/meminfo and a scripted runner
- run_playbook(cx, pb): run a playbook for real (not dry) without progress output
*/

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use vds_provisioner::util::{HostFs, ScriptedRunner};
use vds_provisioner::{Context, Playbook, Report, Runner, Settings, Silent};

/// The `vds-provisioner` binary with every host-wide path redirected under `root`.
pub fn bin_command(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vds-provisioner"));
    cmd.arg("--root")
        .arg(root)
        .env_remove("VDS_CONFIG")
        .env("NO_COLOR", "1")
        .env("VDS_LOG_FILE", root.join("vds.log"))
        .env("VDS_LOCK_FILE", root.join("vds.lock"))
        .env("VDS_CREDENTIALS_FILE", "/root/.all_settings");
    cmd
}

pub fn stderr_of(out: &std::process::Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

pub fn stdout_of(out: &std::process::Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// A temp root that looks like a 4 GiB host, plus the runner that stands in for its binaries.
pub fn scripted_host() -> (tempfile::TempDir, Arc<ScriptedRunner>, Context) {
    let td = tempfile::tempdir().expect("tmpdir");
    std::fs::create_dir_all(td.path().join("proc")).expect("mkdir proc");
    std::fs::write(
        td.path().join("proc/meminfo"),
        "MemTotal:        4194304 kB\nMemFree:         1048576 kB\n",
    )
    .expect("write meminfo");
    let runner = Arc::new(ScriptedRunner::new());
    let settings = Settings {
        credentials_file: Some("/root/.all_settings".into()),
        ..Settings::default()
    };
    let cx = Context::new(settings, HostFs::new(td.path()), runner.clone());
    (td, runner, cx)
}

pub fn run_playbook(cx: &Context, pb: &Playbook) -> Report {
    Runner::new(cx, false, &Silent).run(pb)
}

pub fn read(root: &Path, logical: &str) -> String {
    std::fs::read_to_string(root.join(logical.trim_start_matches('/')))
        .unwrap_or_else(|e| panic!("read {logical}: {e}"))
}
