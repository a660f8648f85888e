use vds_provisioner::sysinfo::HostFacts;
use vds_provisioner::Tone;

pub(crate) fn print_startup_banner(facts: &HostFacts, command: &str, dry_run: bool) {
    let version = env!("CARGO_PKG_VERSION");
    let use_err = vds_provisioner::color_enabled_stderr();
    let rule = "──────────────────────────────────────────────────────────────────────────";
    eprintln!();
    eprintln!("{rule}");
    eprintln!(
        "  {}",
        vds_provisioner::paint(
            use_err,
            Tone::Info,
            &format!("vds-provisioner v{version}  |  {command}")
        )
    );
    eprintln!("{rule}");

    let disk = facts
        .disk_free_mib
        .map(|m| format!("{m} MiB free"))
        .unwrap_or_else(|| "(unknown)".to_string());
    eprintln!("  host:   {}", facts.hostname);
    eprintln!(
        "  os:     {}",
        facts.os_release.as_deref().unwrap_or("(unknown)")
    );
    eprintln!(
        "  memory: {} MiB  |  cpus: {}  |  disk: {}",
        facts.mem_total_mib, facts.cpus, disk
    );
    if dry_run {
        eprintln!(
            "  mode:   {}",
            vds_provisioner::paint(use_err, Tone::Warn, "dry run (probes only)")
        );
    }
    eprintln!("{rule}");
    eprintln!();
}
