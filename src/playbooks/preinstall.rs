use anyhow::Result;

use crate::step::{Context, Playbook};
use crate::steps::{
    AptInstall, AptRepository, AptUpgrade, Grant, MutualGroups, MysqlSecure, MysqlUser,
    ServiceRunning, SystemUser, UserPassword,
};

pub const BASE_TOOLS: [&str; 5] = [
    "software-properties-common",
    "curl",
    "unzip",
    "git",
    "ca-certificates",
];

const PHP_EXTENSIONS: [&str; 11] = [
    "cli", "mysql", "mbstring", "xml", "curl", "zip", "gd", "bcmath", "intl", "memcached",
    "opcache",
];

const STACK: [&str; 10] = [
    "nginx",
    "mysql-server",
    "memcached",
    "fail2ban",
    "certbot",
    "python3-certbot-nginx",
    "supervisor",
    "composer",
    "nodejs",
    "npm",
];

/// Packages for the web stack at the configured PHP version.
pub fn stack_packages(cx: &Context) -> Vec<String> {
    let v = &cx.settings.php_version;
    let mut pkgs = vec![format!("php{v}-fpm")];
    pkgs.extend(PHP_EXTENSIONS.iter().map(|e| format!("php{v}-{e}")));
    pkgs.extend(STACK.iter().map(|p| p.to_string()));
    pkgs.extend(cx.settings.extra_packages.iter().cloned());
    pkgs
}

/// Units enabled at the end of preinstall.
pub fn managed_services(cx: &Context) -> Vec<String> {
    vec![
        "nginx".to_string(),
        cx.settings.php_fpm_service(),
        "mysql".to_string(),
        "memcached".to_string(),
        "fail2ban".to_string(),
        "supervisor".to_string(),
    ]
}

pub fn build(cx: &Context) -> Result<Playbook> {
    let s = &cx.settings;
    let mut pb = Playbook::new("preinstall");
    pb.push(AptUpgrade)
        .push(AptInstall::new("base tools", BASE_TOOLS))
        .push(AptRepository::new("ppa:ondrej/php"))
        .push(AptInstall::new("web stack", stack_packages(cx)))
        .push(SystemUser::new(&s.admin_user, &s.web_group))
        .push(MutualGroups::new(&s.admin_user, &s.web_group))
        .push(UserPassword::new(&s.admin_user))
        .push(MysqlSecure)
        .push(MysqlUser::new(s.admin_user.clone(), Grant::Global));
    for unit in managed_services(cx) {
        pb.push(ServiceRunning::new(unit));
    }
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::sync::Arc;

    #[test]
    fn test_step_order() {
        let td = tempfile::tempdir().unwrap();
        let mut s = Settings::default();
        s.extra_packages = vec!["htop".to_string()];
        let cx = Context::new(s, HostFs::new(td.path()), Arc::new(ScriptedRunner::new()));
        let names = build(&cx).unwrap().step_names();
        assert_eq!(names[0], "refresh package lists and upgrade");
        assert_eq!(names[2], "add apt repository ppa:ondrej/php");
        assert_eq!(names[4], "create user vdsadmin");
        assert!(names.contains(&"secure mysql".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("enable and start supervisor"));

        let pkgs = stack_packages(&cx);
        assert_eq!(pkgs[0], "php8.3-fpm");
        assert!(pkgs.contains(&"php8.3-intl".to_string()));
        assert_eq!(pkgs.last().map(String::as_str), Some("htop"));
    }
}
