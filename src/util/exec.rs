use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use wait_timeout::ChildExt;

/// Seam between playbooks and the host's process table. Steps never spawn processes directly.
pub trait CommandRunner: Send + Sync {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput>;
}

/// Structured command execution with timeouts.
#[derive(Debug, Clone)]
pub struct ExecService {
    default_timeout: Duration,
    echo: bool,
}

impl ExecService {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            echo: false,
        }
    }

    /// Print every command line to stderr before it runs (--verbose).
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

impl CommandRunner for ExecService {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        let line = request.display_line();
        tracing::debug!(command = %line, "exec");
        if self.echo {
            eprintln!("  $ {line}");
        }

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(ref cwd) = request.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd.stdin(if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if request.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {:?} with args {:?}",
                request.program, request.args
            )
        })?;

        // Drain pipes on threads so a chatty child (apt, composer) cannot block on a full pipe.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        if let Some(input) = request.stdin.as_deref() {
            if let Some(mut sink) = child.stdin.take() {
                sink.write_all(input)
                    .context("failed to write process stdin")?;
            }
        }

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let status = if timeout.is_zero() {
            child.wait().context("failed to wait for process")?
        } else {
            match child
                .wait_timeout(timeout)
                .context("failed to wait with timeout")?
            {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(anyhow!(
                        "command {:?} timed out after {}",
                        request.program,
                        humantime::format_duration(timeout)
                    ));
                }
            }
        };

        let duration = started.elapsed();
        let stdout = join_reader(stdout_reader)?;
        let stderr = join_reader(stderr_reader)?;
        tracing::debug!(command = %line, code = ?status.code(), ?duration, "exec finished");

        Ok(ExecOutput {
            code: status.code(),
            duration,
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_reader(handle: Option<thread::JoinHandle<io::Result<String>>>) -> Result<String> {
    match handle {
        None => Ok(String::new()),
        Some(h) => h
            .join()
            .map_err(|_| anyhow!("output reader thread panicked"))?
            .context("failed to read process output"),
    }
}

impl Default for ExecService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    capture_output: bool,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            capture_output: true,
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed bytes on stdin. Secrets go here rather than into argv.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Re-target the request to run as `user` through `sudo -u <user> -H`.
    pub fn run_as(self, user: &str) -> Self {
        let mut args: Vec<OsString> = vec![
            "-u".into(),
            user.into(),
            "-H".into(),
            "--".into(),
            self.program,
        ];
        args.extend(self.args);
        Self {
            program: "sudo".into(),
            args,
            ..self
        }
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn stdin_bytes(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Shell-escaped command line used for logs, dry-run output and test matching.
    pub fn display_line(&self) -> String {
        let mut words = vec![self.program.to_string_lossy().into_owned()];
        words.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        super::shell_join(&words)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// None when the process was killed by a signal.
    pub code: Option<i32>,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into an error carrying the tail of stderr.
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let detail = last_lines(if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        });
        Err(anyhow!(
            "{what} exited with {}{}",
            self.code
                .map(|c| format!("status {c}"))
                .unwrap_or_else(|| "a signal".to_string()),
            if detail.is_empty() {
                String::new()
            } else {
                format!(": {detail}")
            }
        ))
    }
}

fn last_lines(s: &str) -> String {
    let lines: Vec<&str> = s.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}

/// True when the error chain bottoms out in "program not found".
pub fn is_not_found(e: &anyhow::Error) -> bool {
    e.chain().any(|c| {
        c.downcast_ref::<io::Error>()
            .map(|ioe| ioe.kind() == io::ErrorKind::NotFound)
            .unwrap_or(false)
    })
}

/// One recorded invocation of a [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub line: String,
    pub stdin: Option<String>,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(ExecOutput),
    NotFound,
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    /// When set, stdin must contain this text as well.
    input: Option<String>,
    reply: Reply,
}

impl Rule {
    fn matches(&self, line: &str, stdin: Option<&str>) -> bool {
        line.starts_with(self.prefix.as_str())
            && match &self.input {
                Some(needle) => stdin.is_some_and(|s| s.contains(needle.as_str())),
                None => true,
            }
    }
}

/// Runner with canned replies keyed by command-line prefix; records every invocation.
///
/// Unmatched commands succeed with empty output. The first matching rule wins.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, prefix: &str, code: i32, stdout: &str) -> &Self {
        let out = ExecOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            ..ExecOutput::default()
        };
        self.push_rule(prefix, None, Reply::Output(out));
        self
    }

    /// Like [`ScriptedRunner::on`], but only when stdin contains `input` (SQL fed to `mysql`).
    pub fn on_input(&self, prefix: &str, input: &str, code: i32, stdout: &str) -> &Self {
        let out = ExecOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            ..ExecOutput::default()
        };
        self.push_rule(prefix, Some(input.to_string()), Reply::Output(out));
        self
    }

    /// Make commands starting with `prefix` fail as if the binary were missing.
    pub fn missing(&self, prefix: &str) -> &Self {
        self.push_rule(prefix, None, Reply::NotFound);
        self
    }

    fn push_rule(&self, prefix: &str, input: Option<String>, reply: Reply) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.to_string(),
                input,
                reply,
            });
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.line).collect()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.lines().iter().any(|l| l.starts_with(prefix))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        let line = request.display_line();
        let stdin = request
            .stdin_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned());
        let rule = self
            .rules
            .lock()
            .map_err(|_| anyhow!("scripted runner poisoned"))?
            .iter()
            .find(|r| r.matches(&line, stdin.as_deref()))
            .map(|r| r.reply.clone());
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Invocation {
                line: line.clone(),
                stdin,
            });
        }
        match rule {
            Some(Reply::Output(out)) => Ok(out),
            Some(Reply::NotFound) => Err(anyhow::Error::new(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            ))
            .context(format!("failed to spawn {line}"))),
            None => Ok(ExecOutput {
                code: Some(0),
                ..ExecOutput::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_as_wraps_with_sudo() {
        let req = ExecRequest::new("composer")
            .args(["create-project", "laravel/laravel"])
            .run_as("vdsadmin");
        assert_eq!(
            req.display_line(),
            "sudo -u vdsadmin -H -- composer create-project laravel/laravel"
        );
    }

    #[test]
    fn test_exec_service_captures_stdout_and_stdin() {
        let svc = ExecService::new(Duration::from_secs(10));
        let out = svc
            .run(ExecRequest::new("cat").stdin("hello\n"))
            .expect("cat runs");
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
    }

    #[test]
    fn test_exec_service_missing_binary_is_not_found() {
        let svc = ExecService::default();
        let err = svc
            .run(ExecRequest::new("definitely-not-a-real-binary-vds"))
            .unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_check_reports_stderr_tail() {
        let out = ExecOutput {
            code: Some(100),
            stderr: "E: one\nE: two\n".to_string(),
            ..ExecOutput::default()
        };
        let err = out.check("apt-get install").unwrap_err();
        assert_eq!(
            err.to_string(),
            "apt-get install exited with status 100: E: one | E: two"
        );
    }

    #[test]
    fn test_scripted_runner_first_match_and_default() {
        let r = ScriptedRunner::new();
        r.on("dpkg -s nginx", 0, "Status: install ok installed\n");
        r.on("dpkg -s", 1, "");
        r.missing("certbot");
        let a = r.run(ExecRequest::new("dpkg").args(["-s", "nginx"])).unwrap();
        assert!(a.success());
        let b = r.run(ExecRequest::new("dpkg").args(["-s", "php"])).unwrap();
        assert_eq!(b.code, Some(1));
        let c = r.run(ExecRequest::new("certbot")).unwrap_err();
        assert!(is_not_found(&c));
        let d = r.run(ExecRequest::new("true")).unwrap();
        assert!(d.success());
        assert_eq!(r.lines().len(), 4);
    }

    #[test]
    fn test_scripted_runner_matches_on_stdin() {
        let r = ScriptedRunner::new();
        r.on_input("mysql", "FROM mysql.db", 0, "1\n");
        r.on("mysql", 0, "0\n");
        let db = r.run(ExecRequest::new("mysql").stdin("SELECT 1 FROM mysql.db")).unwrap();
        assert_eq!(db.stdout, "1\n");
        let other = r.run(ExecRequest::new("mysql").stdin("SELECT 1 FROM mysql.user")).unwrap();
        assert_eq!(other.stdout, "0\n");
        let bare = r.run(ExecRequest::new("mysql")).unwrap();
        assert_eq!(bare.stdout, "0\n");
    }
}
