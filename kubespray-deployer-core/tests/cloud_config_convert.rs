use std::fs;

use serde_yaml::Value;
use tempfile::TempDir;

use kubespray_deployer_core::cloud_config::{clouds_yaml, convert_cloud_config, CloudConfigError};

const V2_CFG: &str = "\
[Global]
auth-url = https://cloud.example:5000/v2.0
username = demo
password = secret
tenant-id = tid-123
tenant-name = demo-project
region = RegionOne
";

const V3_CFG: &str = "\
[Global]
auth-url = https://cloud.example:5000/v3
username = demo
password = secret
tenant-id = tid-123
domain-name = corp
region = RegionOne
";

fn auth<'a>(doc: &'a Value, cloud: &str) -> &'a Value {
    &doc["clouds"][cloud]["auth"]
}

#[test]
fn v2_auth_url_keeps_the_tenant_name() {
    let yaml = clouds_yaml(V2_CFG, "mycloud").expect("conversion succeeds");
    let doc: Value = serde_yaml::from_str(&yaml).expect("output is valid yaml");

    let auth = auth(&doc, "mycloud");
    assert_eq!(auth["auth_url"], "https://cloud.example:5000/v2.0");
    assert_eq!(auth["username"], "demo");
    assert_eq!(auth["password"], "secret");
    assert_eq!(auth["project_id"], "tid-123");
    assert_eq!(auth["project_name"], "demo-project");
    assert!(auth.get("user_domain_name").is_none());
    assert_eq!(doc["clouds"]["mycloud"]["region_name"], "RegionOne");
}

#[test]
fn v3_auth_url_carries_the_domain_names() {
    let yaml = clouds_yaml(V3_CFG, "mycloud").expect("conversion succeeds");
    let doc: Value = serde_yaml::from_str(&yaml).expect("output is valid yaml");

    let auth = auth(&doc, "mycloud");
    assert_eq!(auth["user_domain_name"], "corp");
    assert_eq!(auth["project_domain_name"], "corp");
    assert!(auth.get("project_name").is_none());
}

#[test]
fn v3_domain_name_defaults_when_absent() {
    let cfg = "\
[Global]
auth-url = https://cloud.example:5000/v3
username = demo
password = secret
";
    let yaml = clouds_yaml(cfg, "mycloud").expect("conversion succeeds");
    let doc: Value = serde_yaml::from_str(&yaml).expect("output is valid yaml");

    let auth = auth(&doc, "mycloud");
    assert_eq!(auth["user_domain_name"], "default");
    assert_eq!(auth["project_domain_name"], "default");
    // Optional keys fall back to empty values.
    assert_eq!(auth["project_id"], "");
    assert_eq!(doc["clouds"]["mycloud"]["region_name"], "");
}

#[test]
fn comments_and_other_sections_are_skipped() {
    let cfg = "\
# OpenStack provider configuration
[LoadBalancer]
use-octavia = true

[Global]
; inline comment line
auth-url = https://cloud.example:5000/v3
username = demo
password = secret
";
    let yaml = clouds_yaml(cfg, "mycloud").expect("conversion succeeds");
    let doc: Value = serde_yaml::from_str(&yaml).expect("output is valid yaml");
    assert_eq!(auth(&doc, "mycloud")["username"], "demo");
}

#[test]
fn missing_global_section_is_fatal() {
    let err = clouds_yaml("[LoadBalancer]\nuse-octavia = true\n", "mycloud")
        .expect_err("no [Global] section must fail");
    assert!(
        matches!(err, CloudConfigError::MissingGlobalSection),
        "got: {err:?}"
    );
}

#[test]
fn missing_required_key_is_fatal() {
    let cfg = "\
[Global]
auth-url = https://cloud.example:5000/v3
password = secret
";
    let err = clouds_yaml(cfg, "mycloud").expect_err("missing username must fail");
    match err {
        CloudConfigError::MissingKey(key) => assert_eq!(key, "username"),
        other => panic!("expected MissingKey, got: {other:?}"),
    }
}

#[test]
fn convert_writes_the_clouds_yaml_file() {
    let dir = TempDir::new().expect("temp dir");
    let cfg_path = dir.path().join("cloud_config");
    let out_path = dir.path().join("clouds.yaml");
    fs::write(&cfg_path, V3_CFG).expect("writing cloud config");

    convert_cloud_config(&cfg_path, "mycloud", &out_path).expect("conversion succeeds");
    let written = fs::read_to_string(&out_path).expect("output exists");
    assert!(written.starts_with("clouds:"));
}

#[test]
fn convert_missing_input_is_a_read_error() {
    let dir = TempDir::new().expect("temp dir");
    let err = convert_cloud_config(
        &dir.path().join("nope"),
        "mycloud",
        &dir.path().join("clouds.yaml"),
    )
    .expect_err("missing input must fail");
    assert!(matches!(err, CloudConfigError::Read { .. }), "got: {err:?}");
}
