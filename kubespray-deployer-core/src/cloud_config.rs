//! OpenStack cloud-config credential conversion.
//!
//! Remaps the `[Global]` section of an ini-style cloud config into a
//! `clouds.yaml` auth block. Keystone v2 endpoints (auth-url with a
//! `/v2…` path segment) keep the tenant name; anything else is treated
//! as v3 and carries the user/project domain names instead. A stateless
//! field remapping, no shared model with the inventory core.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Errors raised while converting a cloud config.
#[derive(Debug, Error)]
pub enum CloudConfigError {
    /// The cloud config file is missing or unreadable.
    #[error("failed to read cloud config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file has no `[Global]` section.
    #[error("cloud config has no [Global] section")]
    MissingGlobalSection,

    /// A required key is absent from `[Global]`.
    #[error("missing required key '{0}' in [Global] section")]
    MissingKey(&'static str),

    #[error("failed to encode clouds.yaml: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize)]
struct CloudsFile {
    clouds: BTreeMap<String, CloudEntry>,
}

#[derive(Debug, Serialize)]
struct CloudEntry {
    auth: AuthSection,
    region_name: String,
}

#[derive(Debug, Serialize)]
struct AuthSection {
    auth_url: String,
    username: String,
    password: String,
    project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_domain_name: Option<String>,
}

/// Collect the `[Global]` section into a key → value map.
///
/// Keys are lowercased; comment and blank lines are skipped. Returns
/// `None` when the section is absent.
fn parse_global_section(contents: &str) -> Option<BTreeMap<String, String>> {
    let mut in_global = false;
    let mut seen = false;
    let mut keys = BTreeMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_global = line == "[Global]";
            seen |= in_global;
            continue;
        }
        if !in_global {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            keys.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    seen.then_some(keys)
}

/// Build the clouds.yaml document for one named cloud.
pub fn clouds_yaml(contents: &str, cloud_name: &str) -> Result<String, CloudConfigError> {
    let global = parse_global_section(contents).ok_or(CloudConfigError::MissingGlobalSection)?;
    let required = |key: &'static str| {
        global
            .get(key)
            .cloned()
            .ok_or(CloudConfigError::MissingKey(key))
    };

    let auth_url = required("auth-url")?;
    let username = required("username")?;
    let password = required("password")?;
    let project_id = global.get("tenant-id").cloned().unwrap_or_default();
    let region_name = global.get("region").cloned().unwrap_or_default();

    let keystone_v2 = Regex::new(r"/v2.*").expect("valid regex literal");
    let auth = if keystone_v2.is_match(&auth_url) {
        AuthSection {
            auth_url,
            username,
            password,
            project_id,
            project_name: Some(global.get("tenant-name").cloned().unwrap_or_default()),
            user_domain_name: None,
            project_domain_name: None,
        }
    } else {
        let domain = global
            .get("domain-name")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        AuthSection {
            auth_url,
            username,
            password,
            project_id,
            project_name: None,
            user_domain_name: Some(domain.clone()),
            project_domain_name: Some(domain),
        }
    };

    let mut clouds = BTreeMap::new();
    clouds.insert(
        cloud_name.to_string(),
        CloudEntry { auth, region_name },
    );
    Ok(serde_yaml::to_string(&CloudsFile { clouds })?)
}

/// Read a cloud config, convert it and write the clouds.yaml file.
pub fn convert_cloud_config(
    cloud_cfg: &Path,
    cloud_name: &str,
    output: &Path,
) -> Result<(), CloudConfigError> {
    let contents = fs::read_to_string(cloud_cfg).map_err(|e| CloudConfigError::Read {
        path: cloud_cfg.to_path_buf(),
        source: e,
    })?;
    let yaml = clouds_yaml(&contents, cloud_name)?;
    fs::write(output, yaml).map_err(|e| CloudConfigError::Write {
        path: output.to_path_buf(),
        source: e,
    })?;
    info!(
        cloud = cloud_name,
        path = %output.display(),
        "Wrote clouds.yaml auth block"
    );
    Ok(())
}
