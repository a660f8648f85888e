use anyhow::Result;

use crate::probe;
use crate::step::{Context, OnFailure, State, Step};

/// `systemctl enable --now <unit>` unless it is already enabled and running.
pub struct ServiceRunning {
    unit: String,
}

impl ServiceRunning {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

impl Step for ServiceRunning {
    fn name(&self) -> String {
        format!("enable and start {}", self.unit)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let enabled = probe::service_enabled(cx, &self.unit)?;
        let active = probe::service_active(cx, &self.unit)?;
        Ok(match (enabled, active) {
            (true, true) => State::Satisfied,
            (false, true) => State::missing("running but not enabled"),
            (true, false) => State::missing("enabled but not running"),
            (false, false) => State::missing("disabled and stopped"),
        })
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.run_checked(
            cx.cmd("systemctl").args(["enable", "--now", self.unit.as_str()]),
            &format!("systemctl enable --now {}", self.unit),
        )?;
        Ok(())
    }

    fn verify(&self, cx: &Context) -> Result<()> {
        if probe::service_active(cx, &self.unit)? {
            Ok(())
        } else {
            Err(anyhow::anyhow!("{} is not active after start", self.unit))
        }
    }

    // A unit that refuses to start (e.g. memcached on a tiny box) should not block the rest.
    fn on_failure(&self) -> OnFailure {
        OnFailure::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::sync::Arc;

    #[test]
    fn test_service_states() {
        let r = Arc::new(ScriptedRunner::new());
        r.on("systemctl is-enabled nginx", 0, "enabled\n");
        r.on("systemctl is-active nginx", 0, "active\n");
        r.on("systemctl is-enabled fail2ban", 1, "disabled\n");
        r.on("systemctl is-active fail2ban", 3, "inactive\n");
        let td = tempfile::tempdir().unwrap();
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), r.clone());

        assert_eq!(ServiceRunning::new("nginx").check(&cx).unwrap(), State::Satisfied);
        let f2b = ServiceRunning::new("fail2ban");
        assert_eq!(
            f2b.check(&cx).unwrap(),
            State::missing("disabled and stopped")
        );
        f2b.apply(&cx).unwrap();
        assert!(r.ran("systemctl enable --now fail2ban"));
        assert!(f2b.verify(&cx).is_err());
    }
}
