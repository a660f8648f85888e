mod common;

#[test]
fn test_cli_doctor_exits_zero() {
    let td = tempfile::tempdir().expect("tmpdir");
    let out = common::bin_command(td.path())
        .arg("doctor")
        .output()
        .expect("failed to run vds-provisioner doctor");
    assert!(
        out.status.success(),
        "doctor exited non-zero: {:?}\nstderr:\n{}",
        out.status.code(),
        common::stderr_of(&out)
    );
    let err = common::stderr_of(&out);
    assert!(err.contains("vds-provisioner doctor"), "stderr:\n{err}");
    assert!(err.contains("doctor: completed diagnostics."), "stderr:\n{err}");
}

#[test]
fn test_cli_doctor_json_reports_credentials() {
    let td = tempfile::tempdir().expect("tmpdir");
    let creds = td.path().join("root");
    std::fs::create_dir_all(&creds).expect("mkdir");
    std::fs::write(creds.join(".all_settings"), "vdsadmin_password=abc\n").expect("write");

    let out = common::bin_command(td.path())
        .args(["--json", "doctor"])
        .output()
        .expect("failed to run vds-provisioner doctor --json");
    assert!(out.status.success(), "stderr:\n{}", common::stderr_of(&out));

    let v: serde_json::Value =
        serde_json::from_str(&common::stdout_of(&out)).expect("doctor --json prints JSON");
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(v["credentials"]["path"], "/root/.all_settings");
    assert_eq!(v["credentials"]["present"], true);
    assert_eq!(v["credentials"]["entries"], 1);
    assert!(v["host"]["mem_total_mib"].as_u64().is_some());
    assert!(v["binaries"]
        .as_array()
        .expect("binaries array")
        .iter()
        .any(|b| b["name"] == "php8.3"));
}
