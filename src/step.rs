//! The idempotent provisioning step: probe, correct only when needed, verify.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::config::Settings;
use crate::credentials::CredentialStore;
use crate::sysinfo::HostFacts;
use crate::util::{exec, CommandRunner, ExecOutput, ExecRequest, HostFs};

/// Result of a precondition probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Satisfied,
    /// Not in the desired state; the string says what is missing.
    Missing(String),
}

impl State {
    pub fn missing(reason: impl Into<String>) -> Self {
        State::Missing(reason.into())
    }

    pub fn from_bool(ok: bool, reason: impl Into<String>) -> Self {
        if ok {
            State::Satisfied
        } else {
            State::Missing(reason.into())
        }
    }
}

/// What the runner does when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Stop the playbook; the process exits non-zero.
    Abort,
    /// Log a warning and carry on with the next step.
    Continue,
}

/// Deferred service actions, run once after the steps that requested them.
/// Declaration order is execution order: pools and daemons first, nginx last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Handler {
    RestartPhpFpm,
    RestartMysql,
    RestartMemcached,
    RestartFail2ban,
    SupervisorUpdate,
    ReloadNginx,
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Handler::RestartPhpFpm => "restart php-fpm",
            Handler::RestartMysql => "restart mysql",
            Handler::RestartMemcached => "restart memcached",
            Handler::RestartFail2ban => "restart fail2ban",
            Handler::SupervisorUpdate => "supervisor update",
            Handler::ReloadNginx => "reload nginx",
        };
        f.write_str(s)
    }
}

impl Handler {
    pub fn run(self, cx: &Context) -> Result<()> {
        match self {
            Handler::RestartPhpFpm => cx.systemctl("restart", &cx.settings.php_fpm_service()),
            Handler::RestartMysql => cx.systemctl("restart", "mysql"),
            Handler::RestartMemcached => cx.systemctl("restart", "memcached"),
            Handler::RestartFail2ban => cx.systemctl("restart", "fail2ban"),
            Handler::SupervisorUpdate => {
                cx.run_checked(cx.cmd("supervisorctl").arg("reread"), "supervisorctl reread")?;
                cx.run_checked(cx.cmd("supervisorctl").arg("update"), "supervisorctl update")?;
                Ok(())
            }
            Handler::ReloadNginx => {
                cx.run_checked(cx.cmd("nginx").arg("-t"), "nginx -t")?;
                cx.systemctl("reload", "nginx")
            }
        }
    }
}

/// Everything a step may touch. Steps never reach the host any other way.
pub struct Context {
    pub settings: Settings,
    pub fs: HostFs,
    pub runner: Arc<dyn CommandRunner>,
    pub creds: CredentialStore,
    pub facts: HostFacts,
}

impl Context {
    pub fn new(settings: Settings, fs: HostFs, runner: Arc<dyn CommandRunner>) -> Self {
        let creds = CredentialStore::new(fs.clone(), settings.credentials_path());
        let facts = HostFacts::gather(&fs, runner.as_ref());
        Self {
            settings,
            fs,
            runner,
            creds,
            facts,
        }
    }

    /// Request pre-configured with the command timeout.
    pub fn cmd(&self, program: &str) -> ExecRequest {
        ExecRequest::new(program).timeout(self.settings.command_timeout)
    }

    /// Request that runs as the admin user.
    pub fn cmd_as_admin(&self, program: &str) -> ExecRequest {
        self.cmd(program).run_as(&self.settings.admin_user)
    }

    /// `apt-get` with a non-interactive frontend.
    pub fn apt(&self) -> ExecRequest {
        self.cmd("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(["-y", "-q", "-o", "Dpkg::Options::=--force-confold"])
    }

    pub fn run(&self, req: ExecRequest) -> Result<ExecOutput> {
        self.runner.run(req)
    }

    pub fn run_checked(&self, req: ExecRequest, what: &str) -> Result<ExecOutput> {
        self.runner.run(req)?.check(what)
    }

    /// Run a probe command. A missing binary reads as "not present" (`None`), not as an error.
    pub fn probe(&self, req: ExecRequest) -> Result<Option<ExecOutput>> {
        match self.runner.run(req) {
            Ok(out) => Ok(Some(out)),
            Err(e) if exec::is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn systemctl(&self, verb: &str, unit: &str) -> Result<()> {
        self.run_checked(
            self.cmd("systemctl").args([verb, unit]),
            &format!("systemctl {verb} {unit}"),
        )?;
        Ok(())
    }

    /// `chown -R owner:group path` on the live host path.
    pub fn chown_recursive(&self, path: &Path, owner: &str, group: &str) -> Result<()> {
        let target = self.fs.resolve(path);
        self.run_checked(
            self.cmd("chown")
                .arg("-R")
                .arg(format!("{owner}:{group}"))
                .arg(target.as_os_str()),
            "chown",
        )?;
        Ok(())
    }
}

pub trait Step {
    fn name(&self) -> String;

    fn on_failure(&self) -> OnFailure {
        OnFailure::Abort
    }

    /// Read-only precondition probe.
    fn check(&self, cx: &Context) -> Result<State>;

    /// Corrective action; only called when `check` reported `Missing`.
    fn apply(&self, cx: &Context) -> Result<()>;

    /// Postcondition; runs right after a successful `apply`.
    fn verify(&self, _cx: &Context) -> Result<()> {
        Ok(())
    }

    fn notifies(&self) -> Vec<Handler> {
        Vec::new()
    }

    /// When true the runner executes queued handlers before this step (e.g. reload nginx
    /// before probing a vhost over HTTP).
    fn flushes_handlers(&self) -> bool {
        false
    }
}

/// A named, ordered list of steps.
pub struct Playbook {
    pub name: String,
    pub steps: Vec<Box<dyn Step>>,
}

impl std::fmt::Debug for Playbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playbook")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

impl Playbook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, step: impl Step + 'static) -> &mut Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}
