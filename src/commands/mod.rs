use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use vds_provisioner::playbooks::{add_domain, install_project, postinstall, preinstall, AddDomain};
use vds_provisioner::util::{ExecService, HostFs};
use vds_provisioner::{
    domain_from_cwd, normalize_domain, Context, Handler, Outcome, Playbook, Progress,
    ProvisionError, Report, Runner, Settings, Tone,
};

use crate::banner::print_startup_banner;
use crate::cli::{Cli, Command};
use crate::doctor;

/// Colored one-line-per-step progress on stderr.
struct TermProgress {
    use_color: bool,
    quiet: bool,
}

impl TermProgress {
    fn line(&self, tag: &str, tone: Tone, name: &str, detail: Option<&str>) {
        let tag = vds_provisioner::paint(self.use_color, tone, &format!("{:<9}", format!("[{tag}]")));
        match detail {
            Some(d) if !d.is_empty() => eprintln!("  {tag} {name}: {d}"),
            _ => eprintln!("  {tag} {name}"),
        }
    }

    fn outcome(&self, name: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Failed(m) => self.line("failed", Tone::Error, name, Some(m)),
            _ if self.quiet => {}
            Outcome::Satisfied => self.line("ok", Tone::Ok, name, None),
            Outcome::Applied => self.line("changed", Tone::Changed, name, None),
            Outcome::WouldApply(r) => self.line("would", Tone::Info, name, Some(r)),
            Outcome::Skipped(r) => self.line("skipped", Tone::Dim, name, Some(r)),
        }
    }
}

impl Progress for TermProgress {
    fn step_finished(&self, name: &str, outcome: &Outcome) {
        self.outcome(name, outcome);
    }

    fn handler_finished(&self, handler: Handler, outcome: &Outcome) {
        self.outcome(&format!("handler: {handler}"), outcome);
    }
}

pub(crate) fn run(cli: &Cli) -> ExitCode {
    if let Some(mode) = cli.color {
        vds_provisioner::set_color_mode(mode);
    }
    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            let use_err = vds_provisioner::color_enabled_stderr();
            vds_provisioner::log_error_stderr(
                use_err,
                &format!("vds-provisioner: {}", vds_provisioner::display_error_chain(&e)),
            );
            ExitCode::from(vds_provisioner::exit_code_for_error(&e))
        }
    }
}

fn execute(cli: &Cli) -> Result<ExitCode> {
    let settings = Settings::load(cli.config.as_deref())?;
    if let Err(e) = vds_provisioner::logging::init(&settings.log_file, cli.verbose) {
        // Unprivileged doctor and dry runs usually cannot open the system log.
        if cli.verbose {
            vds_provisioner::log_warn_stderr(
                vds_provisioner::color_enabled_stderr(),
                &format!("vds-provisioner: event log disabled: {e}"),
            );
        }
    }
    tracing::info!(
        command = cli.command.label(),
        dry_run = cli.dry_run,
        root = %cli.root.display(),
        "invoked"
    );

    let runner = Arc::new(ExecService::new(settings.command_timeout).with_echo(cli.verbose));
    let cx = Context::new(settings, HostFs::new(&cli.root), runner);

    if !cli.quiet && !cli.json {
        print_startup_banner(&cx.facts, cli.command.label(), cli.dry_run);
    }

    if let Command::Doctor = cli.command {
        return run_doctor(&cx, cli.json);
    }

    // Bad input exits 2 before any privilege or lock requirement is reported.
    let playbook = build_playbook(cli, &cx)?;

    if !cli.dry_run && !nix::unistd::Uid::effective().is_root() {
        return Err(ProvisionError::Message(format!(
            "{} must run as root (use sudo, or --dry-run to only probe)",
            cli.command.label()
        ))
        .into());
    }

    let _lock = if !cli.dry_run && vds_provisioner::should_acquire_lock() {
        Some(
            vds_provisioner::acquire_lock_at(&cx.settings.lock_file)
                .with_context(|| format!("lock {}", cx.settings.lock_file.display()))?,
        )
    } else {
        None
    };

    if !cli.dry_run {
        cx.creds.harden()?;
    }

    let progress = TermProgress {
        use_color: vds_provisioner::color_enabled_stderr(),
        quiet: cli.quiet,
    };
    if cli.dry_run && !cli.quiet && !cli.json {
        vds_provisioner::log_info_stderr(
            progress.use_color,
            &format!("{}: probing {} steps, nothing will be changed", playbook.name, playbook.steps.len()),
        );
    }
    let report = Runner::new(&cx, cli.dry_run, &progress).run(&playbook);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, cli.quiet);
    }
    report.into_result()?;
    Ok(ExitCode::from(0))
}

fn build_playbook(cli: &Cli, cx: &Context) -> Result<Playbook> {
    match &cli.command {
        Command::Preinstall => preinstall::build(cx),
        Command::Postinstall => postinstall::build(cx),
        Command::AddDomain {
            domain,
            flavor,
            no_www,
            skip_certificate,
        } => {
            let req = AddDomain {
                domain: normalize_domain(domain)?,
                flavor: *flavor,
                with_www: !no_www,
                certificate: !skip_certificate,
            };
            add_domain::build(cx, &req)
        }
        Command::InstallProject { domain } => {
            let domain = match domain {
                Some(d) => normalize_domain(d)?,
                None => infer_domain(cx)?,
            };
            install_project::build(cx, &domain)
        }
        Command::Doctor => Err(anyhow::anyhow!("doctor does not build a playbook")),
    }
}

/// The site whose directory contains the working directory, translated through `--root`.
fn infer_domain(cx: &Context) -> Result<String> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let logical = cwd
        .strip_prefix(cx.fs.root())
        .map(|rel| Path::new("/").join(rel))
        .unwrap_or_else(|_| cwd.clone());
    domain_from_cwd(&cx.settings.web_root, &logical).ok_or_else(|| {
        ProvisionError::Invalid(format!(
            "cannot infer the domain from {}; pass it as an argument or run from {}/<domain>",
            cwd.display(),
            cx.settings.web_root.display()
        ))
        .into()
    })
}

fn print_summary(report: &Report, quiet: bool) {
    let use_err = vds_provisioner::color_enabled_stderr();
    let unchanged = report.count(|o| matches!(o, Outcome::Satisfied));
    let pending = report.count(|o| matches!(o, Outcome::WouldApply(_)));
    let skipped = report.count(|o| matches!(o, Outcome::Skipped(_)));
    let mut parts = vec![format!("{unchanged} ok")];
    if report.dry_run {
        parts.push(format!("{pending} would change"));
    } else {
        parts.push(format!("{} changed", report.changed()));
    }
    if report.warnings() > 0 {
        parts.push(format!("{} warnings", report.warnings()));
    }
    if skipped > 0 {
        parts.push(format!("{skipped} skipped"));
    }
    let line = format!("{}: {}", report.playbook, parts.join(", "));
    if !quiet {
        eprintln!();
    }
    match &report.aborted_at {
        Some(at) => vds_provisioner::log_error_stderr(use_err, &format!("{line}; aborted at '{at}'")),
        None if report.warnings() > 0 => vds_provisioner::log_warn_stderr(use_err, &line),
        None => vds_provisioner::log_ok_stderr(use_err, &line),
    }
}

fn run_doctor(cx: &Context, json: bool) -> Result<ExitCode> {
    let report = doctor::collect(cx);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        doctor::print_human(&report);
    }
    Ok(ExitCode::from(0))
}
