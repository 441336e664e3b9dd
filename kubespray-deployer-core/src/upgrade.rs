//! Kubespray checkout, deployment and stepwise upgrade orchestration.
//!
//! Wraps a local kubespray git clone and a cluster deployment directory.
//! Upgrades never jump releases: the version table is walked one entry at
//! a time, each step running the upgrade playbook and stamping the
//! deployment before moving on. All child processes (`git`, `pip3`,
//! `ansible-playbook`) go through the [`ProcessRunner`] contract so the
//! command sequences are testable.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, thread};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::contract::{ProcessError, ProcessRunner};

/// Fallback kubespray version when none is requested explicitly.
pub const DEFAULT_KUBESPRAY_VERSION: &str = "2.14.0";

/// Directory holding per-version patches applied after checkout.
pub const DEFAULT_PATCH_DIR: &str = "/home/manageks/kubespray_patches";

/// Stamp file recording which kubespray versions touched a deployment.
const VERSION_STAMP_FILENAME: &str = "kubespray_deployer_version";

/// Correspondence between kubespray and kubernetes versions, in release
/// order (manually extracted from the kubespray tag commit messages).
pub const VERSION_TABLE: &[(&str, &str)] = &[
    ("2.8.4", "1.12.7"),
    ("2.8.5", "1.12.7"),
    ("2.9.0", "1.12.7"),
    ("2.10.0", "1.14.3"),
    ("2.10.3", "1.14.3"),
    ("2.10.4", "1.14.3"),
    ("2.11.0", "1.15.3"),
    ("2.11.1", "1.15.11"),
    ("2.11.2", "1.15.11"),
    ("2.12.0", "1.15.11"),
    ("2.12.1", "1.16.7"),
    ("2.12.2", "1.16.7"),
    ("2.12.3", "1.16.7"),
    ("2.12.4", "1.16.8"),
    ("2.12.5", "1.16.8"),
    ("2.14.0", "1.18.8"),
];

/// Errors raised by repository and deployment orchestration.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("kubespray repository not found at {path}")]
    RepoNotFound { path: PathBuf },

    #[error("cluster directory not found at {path}")]
    ClusterDirNotFound { path: PathBuf },

    #[error("inventory file not found at {path}")]
    InventoryNotFound { path: PathBuf },

    /// The requested version is not in the release table.
    #[error("unknown kubespray version {0}")]
    UnknownVersion(String),

    #[error("base version {base} is not older than target version {target}")]
    NotAnUpgrade { base: String, target: String },

    /// The deployment has no version stamp to upgrade from.
    #[error("cannot upgrade: deployment has no recorded kubespray version")]
    UnknownCurrentVersion,

    /// Inventory variable formats changed between 2.8.5 and 2.9.0;
    /// crossing that boundary with a stale inventory leaves the first
    /// master non-functional.
    #[error(
        "upgrading from {current} across 2.9.0 requires --yes-upgrade-28-29; \
         update the k8s-cluster.yml inventory variables first"
    )]
    ConfigFormatGuard { current: String },

    #[error("failed to update version stamp {path}: {source}")]
    Stamp {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

fn version_index(version: &str) -> Result<usize, UpgradeError> {
    VERSION_TABLE
        .iter()
        .position(|(ks, _)| *ks == version)
        .ok_or_else(|| UpgradeError::UnknownVersion(version.to_string()))
}

/// Kubernetes version shipped by a kubespray release, if known.
pub fn k8s_version_for(ks_version: &str) -> Option<&'static str> {
    VERSION_TABLE
        .iter()
        .find(|(ks, _)| *ks == ks_version)
        .map(|(_, k8s)| *k8s)
}

/// The table walk from just after `base` up to and including `target`.
pub fn versions_between(base: &str, target: &str) -> Result<Vec<&'static str>, UpgradeError> {
    let base_index = version_index(base)?;
    let target_index = version_index(target)?;
    if base_index > target_index {
        return Err(UpgradeError::NotAnUpgrade {
            base: base.to_string(),
            target: target.to_string(),
        });
    }
    Ok(VERSION_TABLE[base_index + 1..=target_index]
        .iter()
        .map(|(ks, _)| *ks)
        .collect())
}

/// The 2.8→2.9 jump changed inventory variable formats; require explicit
/// acknowledgement before crossing it. Version order is decided by table
/// position, never by comparing version strings.
pub fn check_upgrade_guard(
    current: &str,
    target: &str,
    acknowledged: bool,
) -> Result<(), UpgradeError> {
    if acknowledged {
        return Ok(());
    }
    let boundary = version_index("2.9.0")?;
    if version_index(target)? >= boundary && version_index(current)? < boundary {
        return Err(UpgradeError::ConfigFormatGuard {
            current: current.to_string(),
        });
    }
    Ok(())
}

fn sv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// A local kubespray git clone, addressed by release version.
#[derive(Debug)]
pub struct KubesprayRepo<R: ProcessRunner> {
    path: PathBuf,
    patch_dir: PathBuf,
    runner: R,
    version: Option<String>,
    requirements_updated: bool,
}

impl<R: ProcessRunner> KubesprayRepo<R> {
    /// Open an existing kubespray clone and read its checked-out tag.
    ///
    /// A clone with no reachable tag (or no `git` available at all) opens
    /// with an unknown version; `checkout` establishes one.
    pub fn open(
        path: impl AsRef<Path>,
        patch_dir: impl AsRef<Path>,
        runner: R,
    ) -> Result<Self, UpgradeError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(UpgradeError::RepoNotFound { path });
        }
        let describe = sv(&["-C", &path.display().to_string(), "describe", "--tags"]);
        let version = match runner.run_capture("git", &describe, None) {
            Ok(tag) if !tag.is_empty() => Some(tag.trim_start_matches('v').to_string()),
            Ok(_) => None,
            Err(err) => {
                debug!(error = %err, "No tag describes the current checkout");
                None
            }
        };
        Ok(Self {
            path,
            patch_dir: patch_dir.as_ref().to_path_buf(),
            runner,
            version,
            requirements_updated: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The currently checked-out kubespray version, when known.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub(crate) fn runner(&self) -> &R {
        &self.runner
    }

    fn git(&self, args: &[&str]) -> Result<(), UpgradeError> {
        let mut full = sv(&["-C", &self.path.display().to_string()]);
        full.extend(args.iter().map(|s| (*s).to_string()));
        self.runner.run("git", &full, None)?;
        Ok(())
    }

    /// Discard local modifications and untracked files.
    pub fn clean(&self) -> Result<(), UpgradeError> {
        self.git(&["reset", "--hard"])?;
        self.git(&["clean", "-d", "-f"])?;
        Ok(())
    }

    /// Check out a kubespray release tag and apply its patch when one exists.
    pub fn checkout(&mut self, version: &str) -> Result<(), UpgradeError> {
        version_index(version)?;
        self.requirements_updated = false;
        let tag = format!("v{version}");
        info!(tag = %tag, "Checking out kubespray tag");

        self.clean()?;
        self.git(&["checkout", &tag])?;

        let patch = self.patch_dir.join(format!("v{version}.patch"));
        if patch.exists() {
            debug!(patch = %patch.display(), "Applying patch");
            self.git(&["apply", &patch.display().to_string()])?;
        } else {
            debug!(patch = %patch.display(), "No patch for this version");
        }
        debug!("Checkout completed");
        self.version = Some(version.to_string());
        Ok(())
    }

    /// Install the checked-out revision's python requirements.
    ///
    /// Runs at most once per checkout unless forced.
    pub fn update_requirements(&mut self, force: bool) -> Result<(), UpgradeError> {
        if self.requirements_updated && !force {
            return Ok(());
        }
        let requirements = self.path.join("requirements.txt");
        info!("Installing kubespray requirements");
        self.runner.run(
            "pip3",
            &sv(&["install", "-r", &requirements.display().to_string()]),
            None,
        )?;
        info!("Requirements installed");
        self.requirements_updated = true;
        Ok(())
    }
}

fn read_last_stamp(path: &Path) -> Result<Option<String>, UpgradeError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .last()
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No version stamp for this deployment");
            Ok(None)
        }
        Err(e) => Err(UpgradeError::Stamp {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// A cluster deployment directory: the inventory plus the stamp file
/// recording which kubespray versions have touched it.
#[derive(Debug)]
pub struct Deployment {
    path: PathBuf,
    inventory: PathBuf,
    current_version: Option<String>,
    settle_pause: Duration,
}

impl Deployment {
    /// Open a cluster directory holding a `hosts.ini` inventory.
    pub fn open(cluster_dir: impl AsRef<Path>) -> Result<Self, UpgradeError> {
        let path = fs::canonicalize(cluster_dir.as_ref()).map_err(|_| {
            UpgradeError::ClusterDirNotFound {
                path: cluster_dir.as_ref().to_path_buf(),
            }
        })?;
        let inventory = path.join("hosts.ini");
        if !inventory.exists() {
            return Err(UpgradeError::InventoryNotFound { path: inventory });
        }
        let current_version = read_last_stamp(&path.join(VERSION_STAMP_FILENAME))?;
        Ok(Self {
            path,
            inventory,
            current_version,
            settle_pause: Duration::from_secs(60),
        })
    }

    /// Shorten the pause between upgrade steps (test hook).
    pub fn with_settle_pause(mut self, pause: Duration) -> Self {
        self.settle_pause = pause;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The version recorded by the last deploy or upgrade, if any.
    pub fn current_version(&self) -> Option<&str> {
        self.current_version.as_deref()
    }

    fn stamp_file(&self) -> PathBuf {
        self.path.join(VERSION_STAMP_FILENAME)
    }

    fn stamp(&mut self, version: &str, action: &str) -> Result<(), UpgradeError> {
        let path = self.stamp_file();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| UpgradeError::Stamp {
                path: path.clone(),
                source: e,
            })?;
        writeln!(file, "{version} {action}").map_err(|e| UpgradeError::Stamp {
            path,
            source: e,
        })?;
        self.current_version = Some(version.to_string());
        Ok(())
    }

    fn run_playbook<R: ProcessRunner>(
        &self,
        repo: &KubesprayRepo<R>,
        playbook: &str,
    ) -> Result<(), UpgradeError> {
        let playbook_path = repo.path().join(playbook);
        let args = sv(&[
            "-v",
            "--become",
            "-i",
            &self.inventory.display().to_string(),
            "--timeout",
            "30",
            &playbook_path.display().to_string(),
        ]);
        info!(playbook, "Executing playbook");
        repo.runner().run("ansible-playbook", &args, Some(&self.path))?;
        Ok(())
    }

    /// Deploy kubernetes at the requested kubespray version.
    pub fn deploy<R: ProcessRunner>(
        &mut self,
        repo: &mut KubesprayRepo<R>,
        version: &str,
    ) -> Result<(), UpgradeError> {
        info!(
            version,
            repo = %repo.path().display(),
            "Deploying kubernetes with kubespray"
        );
        repo.checkout(version)?;
        repo.update_requirements(false)?;
        self.run_playbook(repo, "cluster.yml")?;
        self.stamp(version, "deploy")?;
        info!("Deployment playbook completed");
        Ok(())
    }

    /// Upgrade one table version at a time until `target` is reached.
    ///
    /// Each step checks out the next release, reinstalls requirements,
    /// runs the upgrade playbook and stamps the deployment before pausing
    /// to let the cluster settle.
    pub fn upgrade<R: ProcessRunner>(
        &mut self,
        repo: &mut KubesprayRepo<R>,
        target: &str,
    ) -> Result<(), UpgradeError> {
        let current = self
            .current_version
            .clone()
            .ok_or(UpgradeError::UnknownCurrentVersion)?;
        info!(
            current = %current,
            target,
            repo = %repo.path().display(),
            "Starting stepwise kubespray upgrade"
        );

        for version in versions_between(&current, target)? {
            info!(version, "Attempting upgrade");
            repo.checkout(version)?;
            repo.update_requirements(false)?;
            self.run_playbook(repo, "upgrade-cluster.yml")?;
            self.stamp(version, "upgrade")?;
            info!(version, "Upgrade playbook completed");
            warn!(
                pause_secs = self.settle_pause.as_secs(),
                "Pausing for the cluster to come back up"
            );
            thread::sleep(self.settle_pause);
        }

        info!(target, "Upgrade complete, deployment now at target version");
        Ok(())
    }
}
