use serde::Serialize;

use vds_provisioner::playbooks::preinstall::managed_services;
use vds_provisioner::probe::service_active;
use vds_provisioner::sysinfo::HostFacts;
use vds_provisioner::{Context, Tone};

#[derive(Debug, Serialize)]
pub(crate) struct Binary {
    name: String,
    path: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Service {
    unit: String,
    active: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct Credentials {
    path: String,
    present: bool,
    /// Octal permission bits, e.g. "600".
    mode: Option<String>,
    entries: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct DoctorReport {
    version: &'static str,
    build_date: &'static str,
    build_target: &'static str,
    root_dir: String,
    is_root: bool,
    host: HostFacts,
    binaries: Vec<Binary>,
    services: Vec<Service>,
    credentials: Credentials,
}

fn external_binaries(cx: &Context) -> Vec<String> {
    let php = &cx.settings.php_version;
    [
        "apt-get",
        "dpkg-query",
        "systemctl",
        "nginx",
        "mysql",
        "certbot",
        "composer",
        "npm",
        "supervisorctl",
        "crontab",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([format!("php{php}"), format!("php-fpm{php}")])
    .collect()
}

pub(crate) fn collect(cx: &Context) -> DoctorReport {
    let binaries = external_binaries(cx)
        .into_iter()
        .map(|name| Binary {
            path: which::which(&name).ok().map(|p| p.display().to_string()),
            name,
        })
        .collect();

    let services = managed_services(cx)
        .into_iter()
        .map(|unit| Service {
            active: service_active(cx, &unit).unwrap_or(false),
            unit,
        })
        .collect();

    let path = cx.creds.path();
    let credentials = Credentials {
        path: path.display().to_string(),
        present: cx.fs.exists(path),
        mode: cx.fs.mode(path).map(|m| format!("{m:o}")),
        entries: cx.creds.entries().map(|e| e.len()).unwrap_or(0),
    };

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("VDS_BUILD_DATE"),
        build_target: env!("VDS_BUILD_TARGET"),
        root_dir: cx.fs.root().display().to_string(),
        is_root: nix::unistd::Uid::effective().is_root(),
        host: cx.facts.clone(),
        binaries,
        services,
        credentials,
    }
}

pub(crate) fn print_human(r: &DoctorReport) {
    let use_err = vds_provisioner::color_enabled_stderr();
    let val = |s: &str| vds_provisioner::paint(use_err, Tone::Value, s);
    let yes_no = |ok: bool, yes: &str, no: &str| {
        if ok {
            vds_provisioner::paint(use_err, Tone::Ok, yes)
        } else {
            vds_provisioner::paint(use_err, Tone::Warn, no)
        }
    };

    eprintln!("vds-provisioner doctor");
    eprintln!();
    eprintln!("  version: v{} ({}, {})", r.version, r.build_target, r.build_date);
    eprintln!("  root:    {}", val(&r.root_dir));
    eprintln!("  user:    {}", yes_no(r.is_root, "root", "not root (changes need sudo)"));
    eprintln!();
    eprintln!("  host:    {}", val(&r.host.hostname));
    eprintln!(
        "  os:      {}",
        val(r.host.os_release.as_deref().unwrap_or("(unknown)"))
    );
    eprintln!("  memory:  {} MiB", r.host.mem_total_mib);
    eprintln!("  cpus:    {}", r.host.cpus);
    match r.host.disk_free_mib {
        Some(m) => eprintln!("  disk:    {m} MiB free on /"),
        None => eprintln!("  disk:    (unknown)"),
    }
    eprintln!();

    eprintln!("  binaries:");
    for b in &r.binaries {
        let shown = match &b.path {
            Some(p) => yes_no(true, p, ""),
            None => yes_no(false, "", "(not found)"),
        };
        eprintln!("    {:<14} {}", b.name, shown);
    }
    eprintln!();

    eprintln!("  services:");
    for s in &r.services {
        eprintln!("    {:<14} {}", s.unit, yes_no(s.active, "active", "inactive"));
    }
    eprintln!();

    let c = &r.credentials;
    let state = if c.present {
        let mode = c.mode.as_deref().unwrap_or("?");
        yes_no(
            mode == "600",
            &format!("mode {mode}, {} entries", c.entries),
            &format!("mode {mode} (expected 600), {} entries", c.entries),
        )
    } else {
        yes_no(false, "", "(not created yet)")
    };
    eprintln!("  credentials: {} {}", val(&c.path), state);
    eprintln!();
    eprintln!("doctor: completed diagnostics.");
}
