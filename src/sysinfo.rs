//! Host facts (hostname, memory, CPUs, disk) and the tuning values derived from them.

use std::path::Path;

use serde::Serialize;

use crate::util::{CommandRunner, ExecRequest, HostFs};

/// Used when /proc/meminfo is unreadable (non-Linux dev machines, odd containers).
const FALLBACK_MEM_MIB: u64 = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct HostFacts {
    pub hostname: String,
    pub mem_total_mib: u64,
    pub cpus: usize,
    pub disk_free_mib: Option<u64>,
    pub os_release: Option<String>,
}

impl HostFacts {
    pub fn gather(fs: &HostFs, runner: &dyn CommandRunner) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let mem_total_mib = fs
            .read(Path::new("/proc/meminfo"))
            .ok()
            .flatten()
            .and_then(|s| parse_meminfo_total_mib(&s))
            .unwrap_or(FALLBACK_MEM_MIB);
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let disk_free_mib = runner
            .run(ExecRequest::new("df").args(["-Pm", "/"]))
            .ok()
            .filter(|o| o.success())
            .and_then(|o| parse_df_available_mib(&o.stdout));
        let os_release = fs
            .read(Path::new("/etc/os-release"))
            .ok()
            .flatten()
            .and_then(|s| parse_os_pretty_name(&s));
        Self {
            hostname,
            mem_total_mib,
            cpus,
            disk_free_mib,
            os_release,
        }
    }
}

pub fn parse_meminfo_total_mib(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / 1024)
}

/// `df -Pm /` → available MiB from the second line, fourth column.
pub fn parse_df_available_mib(df: &str) -> Option<u64> {
    df.lines().nth(1)?.split_whitespace().nth(3)?.parse().ok()
}

pub fn parse_os_pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim().trim_matches('"').to_string())
}

/// php-fpm process manager settings for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FpmTuning {
    pub max_children: u64,
    pub start_servers: u64,
    pub min_spare_servers: u64,
    pub max_spare_servers: u64,
}

/// Half of RAM for PHP workers at ~64 MiB each, clamped to 4..=64.
pub fn fpm_tuning(mem_mib: u64) -> FpmTuning {
    let max_children = (mem_mib / 2 / 64).clamp(4, 64);
    let start_servers = (max_children / 4).max(2);
    let min_spare_servers = (max_children / 8).max(1);
    let max_spare_servers = (max_children / 2).max(start_servers);
    FpmTuning {
        max_children,
        start_servers,
        min_spare_servers,
        max_spare_servers,
    }
}

/// Quarter of RAM, clamped to 128..=8192 MiB.
pub fn innodb_buffer_pool_mib(mem_mib: u64) -> u64 {
    (mem_mib / 4).clamp(128, 8192)
}

/// One sixteenth of RAM, clamped to 64..=1024 MiB.
pub fn memcached_mib(mem_mib: u64) -> u64 {
    (mem_mib / 16).clamp(64, 1024)
}
