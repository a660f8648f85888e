use anyhow::Result;

use crate::probe;
use crate::step::{Context, State, Step};

/// Login user with a home directory and bash, member of the web group.
pub struct SystemUser {
    user: String,
    group: String,
}

impl SystemUser {
    pub fn new(user: &str, group: &str) -> Self {
        Self {
            user: user.to_string(),
            group: group.to_string(),
        }
    }
}

impl Step for SystemUser {
    fn name(&self) -> String {
        format!("create user {}", self.user)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        Ok(State::from_bool(
            probe::user_exists(cx, &self.user)?,
            "user does not exist",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        cx.run_checked(
            cx.cmd("useradd")
                .args(["-m", "-s", "/bin/bash", "-G", self.group.as_str(), self.user.as_str()]),
            "useradd",
        )?;
        Ok(())
    }

    fn verify(&self, cx: &Context) -> Result<()> {
        if probe::user_exists(cx, &self.user)? {
            Ok(())
        } else {
            Err(anyhow::anyhow!("user {} still missing after useradd", self.user))
        }
    }
}

/// Admin user in the web group and the web server user in the admin group, so both sides can
/// read and write site files.
pub struct MutualGroups {
    user: String,
    web_user: String,
}

impl MutualGroups {
    pub fn new(user: &str, web_user: &str) -> Self {
        Self {
            user: user.to_string(),
            web_user: web_user.to_string(),
        }
    }

    fn gaps(&self, cx: &Context) -> Result<Vec<(String, String)>> {
        let mut gaps = Vec::new();
        if !probe::user_groups(cx, &self.user)?.contains(&self.web_user) {
            gaps.push((self.user.clone(), self.web_user.clone()));
        }
        if !probe::user_groups(cx, &self.web_user)?.contains(&self.user) {
            gaps.push((self.web_user.clone(), self.user.clone()));
        }
        Ok(gaps)
    }
}

impl Step for MutualGroups {
    fn name(&self) -> String {
        format!("join groups {} <-> {}", self.user, self.web_user)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let gaps = self.gaps(cx)?;
        let described: Vec<String> = gaps.iter().map(|(u, g)| format!("{u} not in {g}")).collect();
        Ok(State::from_bool(gaps.is_empty(), described.join(", ")))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        for (user, group) in self.gaps(cx)? {
            cx.run_checked(
                cx.cmd("usermod").args(["-aG", group.as_str(), user.as_str()]),
                "usermod",
            )?;
        }
        Ok(())
    }
}

/// Password for a login user, generated once and kept in the credentials file.
pub struct UserPassword {
    user: String,
}

impl UserPassword {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
        }
    }

    pub fn label(user: &str) -> String {
        format!("{user}_password")
    }
}

impl Step for UserPassword {
    fn name(&self) -> String {
        format!("set password for {}", self.user)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let recorded = cx.creds.get(&Self::label(&self.user))?.is_some();
        Ok(State::from_bool(recorded, "no password recorded"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let password = cx.creds.get_or_create(&Self::label(&self.user))?;
        cx.run_checked(
            cx.cmd("chpasswd").stdin(format!("{}:{password}\n", self.user)),
            "chpasswd",
        )?;
        Ok(())
    }
}
