//! Postcondition check for a vhost: serve a throwaway token file and fetch it back.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use url::Url;

use crate::config::ProbeSettings;
use crate::step::Context;
use crate::util::id;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// Sentinel file path under a document root plus the URL path it is served at.
pub fn sentinel_location(docroot: &Path, name: &str) -> (PathBuf, String) {
    (
        docroot.join(".well-known").join(name),
        format!("/.well-known/{name}"),
    )
}

pub fn build_url(scheme: Scheme, domain: &str, port: Option<u16>, path: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{scheme}://{domain}/"))
        .with_context(|| format!("invalid domain for URL: {domain}"))?;
    if let Some(p) = port {
        url.set_port(Some(p))
            .map_err(|_| anyhow!("cannot set port on {url}"))?;
    }
    url.set_path(path);
    Ok(url)
}

/// Fetch `url` until it returns 200 with exactly `expected` (whitespace-trimmed) as the body.
pub fn expect_body(url: &Url, expected: &str, probe: &ProbeSettings) -> Result<()> {
    let mut builder = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("vds-provisioner/", env!("CARGO_PKG_VERSION")));
    if probe.resolve_local {
        if let Some(host) = url.host_str() {
            // Port 0 keeps the URL's own port.
            builder = builder.resolve(
                host,
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            );
        }
    }
    let client = builder.build().context("failed to build HTTP client")?;

    let mut last = String::new();
    for attempt in 1..=probe.attempts.max(1) {
        match client.get(url.clone()).send() {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().unwrap_or_default();
                if status.is_success() && body.trim() == expected {
                    tracing::info!(%url, attempt, "sentinel served");
                    return Ok(());
                }
                last = if status.is_success() {
                    format!("{status} with unexpected body")
                } else {
                    format!("{status}")
                };
            }
            Err(e) => last = e.to_string(),
        }
        tracing::debug!(%url, attempt, error = %last, "sentinel not served yet");
        if attempt < probe.attempts {
            thread::sleep(probe.delay);
        }
    }
    Err(anyhow!(
        "{url} not served after {} attempt(s): {last}",
        probe.attempts.max(1)
    ))
}

/// Write a sentinel into `docroot`, fetch it over `scheme`, then remove it regardless of outcome.
pub fn verify_vhost(cx: &Context, docroot: &Path, domain: &str, scheme: Scheme) -> Result<()> {
    let token = id::random_token(32)?;
    let name = format!("vds-probe-{}.txt", id::random_token(10)?);
    let (file, path) = sentinel_location(docroot, &name);
    cx.fs.write(&file, format!("{token}\n").as_bytes(), Some(0o644))?;
    let url = build_url(scheme, domain, None, &path);
    let result = url.and_then(|u| expect_body(&u, &token, &cx.settings.probe));
    let cleanup = cx.fs.remove_file(&file);
    // Leave no trace in a fresh docroot; a populated .well-known stays.
    if let Some(dir) = file.parent() {
        if cx.fs.list(dir).map(|l| l.is_empty()).unwrap_or(false) {
            if let Err(e) = cx.fs.remove_dir(dir) {
                tracing::debug!(dir = %dir.display(), error = %e, "sentinel directory left in place");
            }
        }
    }
    result?;
    cleanup
}
