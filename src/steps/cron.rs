use anyhow::Result;

use crate::step::{Context, State, Step};

/// One line in a user's crontab, appended when absent.
pub struct CrontabEntry {
    user: String,
    line: String,
}

impl CrontabEntry {
    pub fn new(user: &str, line: impl Into<String>) -> Self {
        Self {
            user: user.to_string(),
            line: line.into(),
        }
    }

    /// Current crontab; a user without one reads as empty.
    fn current(&self, cx: &Context) -> Result<String> {
        Ok(cx
            .probe(cx.cmd("crontab").args(["-l", "-u", self.user.as_str()]))?
            .filter(|o| o.success())
            .map(|o| o.stdout)
            .unwrap_or_default())
    }
}

impl Step for CrontabEntry {
    fn name(&self) -> String {
        format!("crontab entry for {}", self.user)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let present = self.current(cx)?.lines().any(|l| l.trim() == self.line.trim());
        Ok(State::from_bool(present, "entry absent"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let mut table = self.current(cx)?;
        if !table.is_empty() && !table.ends_with('\n') {
            table.push('\n');
        }
        table.push_str(&self.line);
        table.push('\n');
        cx.run_checked(
            cx.cmd("crontab")
                .args(["-u", self.user.as_str(), "-"])
                .stdin(table),
            "crontab",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::sync::Arc;

    const LINE: &str = "* * * * * cd /var/www/a.com/app && php artisan schedule:run >> /dev/null 2>&1";

    #[test]
    fn test_appends_to_existing_table() {
        let r = Arc::new(ScriptedRunner::new());
        r.on("crontab -l -u vdsadmin", 0, "0 3 * * * /usr/local/bin/backup");
        let td = tempfile::tempdir().unwrap();
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), r.clone());
        let step = CrontabEntry::new("vdsadmin", LINE);
        assert_eq!(step.check(&cx).unwrap(), State::missing("entry absent"));
        step.apply(&cx).unwrap();
        let written = r
            .calls()
            .into_iter()
            .find(|c| c.line == "crontab -u vdsadmin -")
            .and_then(|c| c.stdin)
            .expect("crontab written");
        assert_eq!(written, format!("0 3 * * * /usr/local/bin/backup\n{LINE}\n"));
    }

    #[test]
    fn test_no_crontab_yet_and_already_present() {
        let r = Arc::new(ScriptedRunner::new());
        r.on("crontab -l -u fresh", 1, "");
        r.on("crontab -l -u vdsadmin", 0, &format!("{LINE}\n"));
        let td = tempfile::tempdir().unwrap();
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), r);
        assert_eq!(
            CrontabEntry::new("vdsadmin", LINE).check(&cx).unwrap(),
            State::Satisfied
        );
        assert_eq!(
            CrontabEntry::new("fresh", LINE).check(&cx).unwrap(),
            State::missing("entry absent")
        );
    }
}
