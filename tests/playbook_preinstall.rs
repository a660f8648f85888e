mod common;

use std::os::unix::fs::PermissionsExt;

use vds_provisioner::playbooks::preinstall;
use vds_provisioner::util::ScriptedRunner;
use vds_provisioner::Outcome;

fn script_installed_services(r: &ScriptedRunner) {
    r.on("mysql -N -B", 0, "0\n")
        .on("systemctl is-active", 0, "active\n")
        .on("systemctl is-enabled", 0, "enabled\n");
}

#[test]
fn test_preinstall_end_to_end() {
    let (td, r, cx) = common::scripted_host();
    script_installed_services(&r);

    let pb = preinstall::build(&cx).expect("build");
    let report = common::run_playbook(&cx, &pb);
    assert!(report.aborted_at.is_none(), "{report:#?}");

    let lines = r.lines();
    let install = lines
        .iter()
        .find(|l| l.starts_with("apt-get -y -q") && l.contains("install --no-install-recommends php8.3-fpm"))
        .expect("web stack installed");
    assert!(install.contains("python3-certbot-nginx"), "{install}");
    assert!(r.ran("add-apt-repository -y ppa:ondrej/php"));
    assert!(r.ran("usermod -aG www-data vdsadmin"));
    assert!(r.ran("usermod -aG vdsadmin www-data"));

    let creds = common::read(td.path(), "/root/.all_settings");
    let login = creds
        .lines()
        .find_map(|l| l.strip_prefix("vdsadmin_password="))
        .expect("login password recorded");
    assert_eq!(login.len(), 24);
    assert!(creds.contains("mysql_vdsadmin_password="));
    let mode = std::fs::metadata(td.path().join("root/.all_settings"))
        .expect("stat")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    let calls = r.calls();
    let chpasswd = calls
        .iter()
        .find(|c| c.line == "chpasswd")
        .expect("chpasswd ran");
    assert_eq!(chpasswd.stdin.as_deref(), Some(format!("vdsadmin:{login}\n").as_str()));
    let grant = calls
        .iter()
        .filter_map(|c| c.stdin.as_deref())
        .find(|s| s.starts_with("CREATE USER IF NOT EXISTS 'vdsadmin'@'localhost'"))
        .expect("admin mysql user created");
    assert!(grant.contains("ON *.* TO 'vdsadmin'@'localhost' WITH GRANT OPTION;"));
    // Secrets only travel on stdin.
    assert!(!lines.iter().any(|l| l.contains(login)));
}

#[test]
fn test_preinstall_rerun_keeps_passwords() {
    let (td, r, cx) = common::scripted_host();
    script_installed_services(&r);
    let pb = preinstall::build(&cx).expect("build");
    common::run_playbook(&cx, &pb);
    let first = common::read(td.path(), "/root/.all_settings");

    let again = common::run_playbook(&cx, &preinstall::build(&cx).expect("build"));
    assert!(again.aborted_at.is_none());
    assert_eq!(common::read(td.path(), "/root/.all_settings"), first);
    let password_step = again
        .steps
        .iter()
        .find(|s| s.name == "set password for vdsadmin")
        .expect("password step");
    assert_eq!(password_step.outcome, Outcome::Satisfied);
    assert_eq!(r.lines().iter().filter(|l| *l == "chpasswd").count(), 1);
}

#[test]
fn test_service_that_will_not_start_is_a_warning() {
    let (_td, r, cx) = common::scripted_host();
    r.on("mysql -N -B", 0, "0\n")
        .on("systemctl is-active memcached", 3, "failed\n")
        .on("systemctl is-enabled memcached", 1, "disabled\n")
        .on("systemctl is-active", 0, "active\n")
        .on("systemctl is-enabled", 0, "enabled\n");
    let report = common::run_playbook(&cx, &preinstall::build(&cx).expect("build"));
    assert!(report.aborted_at.is_none());
    assert_eq!(report.warnings(), 1);
    assert!(r.ran("systemctl enable --now memcached"));
    assert!(report.into_result().is_ok());
}
