use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// State snapshot with a tagged bastion: the whole transformation is
/// deterministic, so the output can be compared byte for byte.
const TAGGED_BASTION_STATE: &str = r#"{
  "modules": [
    {
      "resources": {
        "openstack_compute_instance_v2.bastion": {
          "type": "openstack_compute_instance_v2",
          "primary": { "attributes": {
            "id": "id-bastion",
            "name": "jump0",
            "all_metadata.kubespray_groups": "bastion",
            "access_ip_v4": "10.0.0.5",
            "network.0.floating_ip": "",
            "metadata.ssh_user": "ubuntu"
          }}
        },
        "openstack_compute_instance_v2.master.0": {
          "type": "openstack_compute_instance_v2",
          "primary": { "attributes": {
            "id": "id-master",
            "name": "master0",
            "all_metadata.kubespray_groups": "etcd,k8s-cluster,kube-master",
            "access_ip_v4": "10.0.0.10",
            "network.0.floating_ip": "",
            "metadata.ssh_user": "ubuntu"
          }}
        },
        "openstack_compute_instance_v2.node.0": {
          "type": "openstack_compute_instance_v2",
          "primary": { "attributes": {
            "id": "id-node",
            "name": "node0",
            "all_metadata.kubespray_groups": "k8s-cluster,kube-node",
            "access_ip_v4": "10.0.0.20",
            "network.0.floating_ip": "",
            "metadata.ssh_user": "ubuntu"
          }}
        },
        "openstack_compute_floatingip_associate_v2.bastion": {
          "type": "openstack_compute_floatingip_associate_v2",
          "primary": { "attributes": {
            "instance_id": "id-bastion",
            "floating_ip": "89.40.0.10"
          }}
        }
      }
    }
  ]
}"#;

const EXPECTED_INVENTORY: &str = "\
[all]
master0 ansible_host=10.0.0.10 ip=10.0.0.10 ansible_ssh_user=ubuntu
node0 ansible_host=10.0.0.20 ip=10.0.0.20 ansible_ssh_user=ubuntu
bastion ansible_host=89.40.0.10 ansible_user=ubuntu

[bastion]
bastion

[etcd]
master0

[k8s-cluster]
master0
node0

[kube-master]
master0

[kube-node]
node0

";

fn deployer() -> Command {
    Command::cargo_bin("kubespray-deployer").expect("Binary exists")
}

#[test]
fn inventory_happy_flow_writes_the_expected_file() {
    let dir = TempDir::new().expect("temp dir");
    let state_path = dir.path().join("terraform.tfstate");
    let out_path = dir.path().join("hosts.ini");
    fs::write(&state_path, TAGGED_BASTION_STATE).expect("writing state fixture");

    deployer()
        .arg("inventory")
        .arg("--terraform-state")
        .arg(&state_path)
        .arg("--output")
        .arg(&out_path)
        .assert()
        .success();

    let written = fs::read_to_string(&out_path).expect("inventory exists");
    assert_eq!(written, EXPECTED_INVENTORY);
}

#[test]
fn inventory_is_stable_across_runs() {
    let dir = TempDir::new().expect("temp dir");
    let state_path = dir.path().join("terraform.tfstate");
    fs::write(&state_path, TAGGED_BASTION_STATE).expect("writing state fixture");

    for output in ["first.ini", "second.ini"] {
        deployer()
            .arg("inventory")
            .arg("-s")
            .arg(&state_path)
            .arg("-o")
            .arg(dir.path().join(output))
            .assert()
            .success();
    }

    let first = fs::read_to_string(dir.path().join("first.ini")).expect("first run output");
    let second = fs::read_to_string(dir.path().join("second.ini")).expect("second run output");
    assert_eq!(first, second);
}

#[test]
fn inventory_missing_state_file_fails() {
    let dir = TempDir::new().expect("temp dir");

    deployer()
        .arg("inventory")
        .arg("--terraform-state")
        .arg(dir.path().join("nope.tfstate"))
        .arg("--output")
        .arg(dir.path().join("hosts.ini"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read state file"));
}

#[test]
fn inventory_without_any_public_address_fails_and_writes_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let state_path = dir.path().join("terraform.tfstate");
    let out_path = dir.path().join("hosts.ini");
    let private_only = r#"{
      "modules": [{ "resources": {
        "openstack_compute_instance_v2.node.0": {
          "type": "openstack_compute_instance_v2",
          "primary": { "attributes": {
            "id": "id-node",
            "name": "node0",
            "all_metadata.kubespray_groups": "kube-node",
            "access_ip_v4": "10.0.0.20",
            "network.0.floating_ip": "",
            "metadata.ssh_user": "ubuntu"
          }}
        }
      }}]
    }"#;
    fs::write(&state_path, private_only).expect("writing state fixture");

    deployer()
        .arg("inventory")
        .arg("-s")
        .arg(&state_path)
        .arg("-o")
        .arg(&out_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no instance has a public address"));

    assert!(!out_path.exists(), "no inventory may be written on failure");
}

#[test]
fn inventory_malformed_record_names_the_missing_attribute() {
    let dir = TempDir::new().expect("temp dir");
    let state_path = dir.path().join("terraform.tfstate");
    let missing_user = r#"{
      "modules": [{ "resources": {
        "openstack_compute_instance_v2.node.0": {
          "type": "openstack_compute_instance_v2",
          "primary": { "attributes": {
            "id": "id-node",
            "name": "node0",
            "all_metadata.kubespray_groups": "kube-node",
            "access_ip_v4": "10.0.0.20",
            "network.0.floating_ip": ""
          }}
        }
      }}]
    }"#;
    fs::write(&state_path, missing_user).expect("writing state fixture");

    deployer()
        .arg("inventory")
        .arg("-s")
        .arg(&state_path)
        .arg("-o")
        .arg(dir.path().join("hosts.ini"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("metadata.ssh_user"));
}

#[test]
fn cloud_config_conversion_end_to_end() {
    let dir = TempDir::new().expect("temp dir");
    let cfg_path = dir.path().join("cloud_config");
    let out_path = dir.path().join("clouds.yaml");
    fs::write(
        &cfg_path,
        "[Global]\nauth-url = https://cloud.example:5000/v3\nusername = demo\npassword = secret\nregion = RegionOne\n",
    )
    .expect("writing cloud config");

    deployer()
        .arg("cloud-config")
        .arg(&cfg_path)
        .arg("mycloud")
        .arg(&out_path)
        .assert()
        .success();

    let written = fs::read_to_string(&out_path).expect("clouds.yaml exists");
    assert!(written.contains("mycloud"));
    assert!(written.contains("user_domain_name"));
}

#[test]
fn upgrade_guard_requires_acknowledgement_across_29() {
    let dir = TempDir::new().expect("temp dir");
    let repo_dir = dir.path().join("kubespray");
    let cluster_dir = dir.path().join("cluster");
    fs::create_dir_all(&repo_dir).expect("repo dir");
    fs::create_dir_all(&cluster_dir).expect("cluster dir");
    fs::write(cluster_dir.join("hosts.ini"), "[all]\n").expect("writing inventory");
    fs::write(cluster_dir.join("kubespray_deployer_version"), "2.8.5 deploy\n")
        .expect("writing version stamp");

    deployer()
        .arg("upgrade-k8s")
        .arg(&repo_dir)
        .arg("--cluster-dir")
        .arg(&cluster_dir)
        .arg("--target-version")
        .arg("2.9.0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes-upgrade-28-29"));
}

#[test]
fn target_version_falls_back_to_the_environment() {
    let dir = TempDir::new().expect("temp dir");
    let repo_dir = dir.path().join("kubespray");
    let cluster_dir = dir.path().join("cluster");
    fs::create_dir_all(&repo_dir).expect("repo dir");
    fs::create_dir_all(&cluster_dir).expect("cluster dir");
    fs::write(cluster_dir.join("hosts.ini"), "[all]\n").expect("writing inventory");
    fs::write(cluster_dir.join("kubespray_deployer_version"), "2.8.5 deploy\n")
        .expect("writing version stamp");

    // No --target-version on the command line: the env default crosses
    // the 2.9 boundary and trips the same guard.
    deployer()
        .arg("upgrade-k8s")
        .arg(&repo_dir)
        .arg("--cluster-dir")
        .arg(&cluster_dir)
        .env("DEFAULT_KUBESPRAY_VERSION", "2.9.0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes-upgrade-28-29"));
}

#[test]
fn version_flag_prints_the_crate_version() {
    deployer()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kubespray-deployer"));
}
