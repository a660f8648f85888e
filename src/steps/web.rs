use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::sentinel::{self, Scheme};
use crate::step::{Context, State, Step};

/// Round-trip a sentinel file through nginx to prove the vhost is live.
pub struct VerifyVhost {
    domain: String,
    docroot: PathBuf,
    scheme: Scheme,
}

impl VerifyVhost {
    pub fn new(domain: &str, docroot: &Path, scheme: Scheme) -> Self {
        Self {
            domain: domain.to_string(),
            docroot: docroot.to_path_buf(),
            scheme,
        }
    }
}

impl Step for VerifyVhost {
    fn name(&self) -> String {
        format!("verify {}://{}", self.scheme, self.domain)
    }

    fn check(&self, _cx: &Context) -> Result<State> {
        Ok(State::missing("not verified in this run"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        sentinel::verify_vhost(cx, &self.docroot, &self.domain, self.scheme)
    }

    // nginx must have picked up the new vhost before we probe it.
    fn flushes_handlers(&self) -> bool {
        true
    }
}

/// Let's Encrypt certificate through the certbot nginx plugin.
pub struct Certificate {
    domain: String,
    with_www: bool,
}

impl Certificate {
    pub fn new(domain: &str, with_www: bool) -> Self {
        Self {
            domain: domain.to_string(),
            with_www,
        }
    }

    pub fn fullchain(domain: &str) -> PathBuf {
        Path::new("/etc/letsencrypt/live").join(domain).join("fullchain.pem")
    }

    fn args(&self, email: Option<&str>) -> Vec<String> {
        let mut args = vec!["--nginx".to_string(), "-d".to_string(), self.domain.clone()];
        if self.with_www {
            args.push("-d".to_string());
            args.push(format!("www.{}", self.domain));
        }
        args.extend(["--non-interactive", "--agree-tos"].map(String::from));
        match email {
            Some(e) => {
                args.push("-m".to_string());
                args.push(e.to_string());
            }
            None => args.push("--register-unsafely-without-email".to_string()),
        }
        args.push("--redirect".to_string());
        args
    }
}

impl Step for Certificate {
    fn name(&self) -> String {
        format!("issue certificate for {}", self.domain)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        Ok(State::from_bool(
            cx.fs.exists(&Self::fullchain(&self.domain)),
            "no certificate",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let args = self.args(cx.settings.certbot_email.as_deref());
        cx.run_checked(cx.cmd("certbot").args(args), "certbot")?;
        Ok(())
    }

    fn verify(&self, cx: &Context) -> Result<()> {
        if cx.fs.exists(&Self::fullchain(&self.domain)) {
            Ok(())
        } else {
            Err(anyhow!(
                "certbot succeeded but {} is missing",
                Self::fullchain(&self.domain).display()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::sync::Arc;

    #[test]
    fn test_certbot_arguments() {
        let c = Certificate::new("example.com", true);
        assert_eq!(
            c.args(Some("ops@example.com")).join(" "),
            "--nginx -d example.com -d www.example.com --non-interactive --agree-tos -m ops@example.com --redirect"
        );
        let c = Certificate::new("example.com", false);
        assert_eq!(
            c.args(None).join(" "),
            "--nginx -d example.com --non-interactive --agree-tos --register-unsafely-without-email --redirect"
        );
    }

    #[test]
    fn test_certificate_probe_and_verify() {
        let r = Arc::new(ScriptedRunner::new());
        let td = tempfile::tempdir().unwrap();
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), r.clone());
        let step = Certificate::new("example.com", true);
        assert_eq!(step.check(&cx).unwrap(), State::missing("no certificate"));
        step.apply(&cx).unwrap();
        assert!(r.ran("certbot --nginx -d example.com"));
        assert!(step.verify(&cx).is_err());
        cx.fs
            .write(&Certificate::fullchain("example.com"), b"-----BEGIN", None)
            .unwrap();
        assert_eq!(step.check(&cx).unwrap(), State::Satisfied);
    }

    #[test]
    fn test_verify_vhost_flushes_and_always_runs() {
        let step = VerifyVhost::new("example.com", Path::new("/var/www/example.com/public_html"), Scheme::Https);
        assert!(step.flushes_handlers());
        assert_eq!(step.name(), "verify https://example.com");
    }
}
