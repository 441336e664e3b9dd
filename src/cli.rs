//! CLI interface for kubespray-deployer: command parsing, argument
//! validation and subcommand routing.
//!
//! All business logic (state parsing, inventory generation, credential
//! conversion, upgrade orchestration) lives in the
//! `kubespray-deployer-core` crate. This module is strictly CLI glue:
//! it maps parsed arguments onto core calls and surfaces their errors
//! through `anyhow` so `main` exits non-zero on any failure.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use kubespray_deployer_core::cloud_config::convert_cloud_config;
use kubespray_deployer_core::contract::SystemRunner;
use kubespray_deployer_core::inventory::{resolve_bastion, write_inventory};
use kubespray_deployer_core::tfstate::TerraformState;
use kubespray_deployer_core::upgrade::{
    check_upgrade_guard, k8s_version_for, Deployment, KubesprayRepo, DEFAULT_KUBESPRAY_VERSION,
    DEFAULT_PATCH_DIR,
};

/// CLI for kubespray-deployer: terraform-driven kubespray deployments.
#[derive(Parser)]
#[clap(
    name = "kubespray-deployer",
    version,
    about = "Generate kubespray inventories from terraform state and manage kubespray deployments"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate an ansible inventory from a terraform state snapshot
    Inventory {
        /// Path of the terraform state file
        #[clap(short = 's', long, default_value = "terraform.tfstate")]
        terraform_state: PathBuf,
        /// Path of the output inventory file
        #[clap(short = 'o', long, default_value = "hosts.ini")]
        output: PathBuf,
    },
    /// Convert an OpenStack cloud config into a clouds.yaml auth block
    CloudConfig {
        /// Path of the ini-style cloud config
        cloud_cfg: PathBuf,
        /// Name of the cloud entry to emit
        cloud_name: String,
        /// Path of the clouds.yaml file to write
        output: PathBuf,
    },
    /// Check out a kubespray version in the local repository clone
    Checkout {
        /// Path to the kubespray git repository
        kubespray_repo: PathBuf,
        #[clap(flatten)]
        version: VersionArgs,
        /// Don't pip install requirements for the checked out version
        #[clap(long)]
        no_update_requirements: bool,
    },
    /// Deploy kubernetes with kubespray
    DeployK8s {
        /// Path to the kubespray git repository
        kubespray_repo: PathBuf,
        #[clap(flatten)]
        version: VersionArgs,
        /// Path to the cluster deployment directory
        #[clap(long, default_value = ".")]
        cluster_dir: PathBuf,
    },
    /// Upgrade an existing deployment one kubespray version at a time
    UpgradeK8s {
        /// Path to the kubespray git repository
        kubespray_repo: PathBuf,
        #[clap(flatten)]
        version: VersionArgs,
        /// Path to the cluster deployment directory
        #[clap(long, default_value = ".")]
        cluster_dir: PathBuf,
        /// Allow crossing the 2.8→2.9 configuration format change
        #[clap(long)]
        yes_upgrade_28_29: bool,
    },
}

/// Version and patch arguments shared by the repository subcommands.
#[derive(Args)]
pub struct VersionArgs {
    /// Target kubespray version
    #[clap(
        long,
        value_name = "x.y.z",
        env = "DEFAULT_KUBESPRAY_VERSION",
        default_value = DEFAULT_KUBESPRAY_VERSION
    )]
    pub target_version: String,
    /// Directory holding per-version kubespray patches
    #[clap(long, default_value = DEFAULT_PATCH_DIR)]
    pub patch_dir: PathBuf,
}

/// CLI logic entrypoint, extracted for integration tests.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Inventory {
            terraform_state,
            output,
        } => {
            tracing::info!(command = "inventory", state = %terraform_state.display(), "Generating inventory");
            let state = TerraformState::load(&terraform_state)?;
            let bastion = resolve_bastion(&state, &mut rand::thread_rng())?;
            write_inventory(&output, &state, bastion)?;
            tracing::info!(output = %output.display(), "Inventory generated");
            Ok(())
        }
        Commands::CloudConfig {
            cloud_cfg,
            cloud_name,
            output,
        } => {
            tracing::info!(command = "cloud-config", cloud = %cloud_name, "Converting cloud config");
            convert_cloud_config(&cloud_cfg, &cloud_name, &output)?;
            Ok(())
        }
        Commands::Checkout {
            kubespray_repo,
            version,
            no_update_requirements,
        } => {
            let mut repo = KubesprayRepo::open(&kubespray_repo, &version.patch_dir, SystemRunner)?;
            repo.checkout(&version.target_version)?;
            if !no_update_requirements {
                repo.update_requirements(false)?;
            }
            Ok(())
        }
        Commands::DeployK8s {
            kubespray_repo,
            version,
            cluster_dir,
        } => {
            let mut repo = KubesprayRepo::open(&kubespray_repo, &version.patch_dir, SystemRunner)?;
            let mut deployment = Deployment::open(&cluster_dir)?;
            deployment.deploy(&mut repo, &version.target_version)?;
            Ok(())
        }
        Commands::UpgradeK8s {
            kubespray_repo,
            version,
            cluster_dir,
            yes_upgrade_28_29,
        } => {
            let mut repo = KubesprayRepo::open(&kubespray_repo, &version.patch_dir, SystemRunner)?;
            let mut deployment = Deployment::open(&cluster_dir)?;
            if let Some(current) = deployment.current_version() {
                check_upgrade_guard(current, &version.target_version, yes_upgrade_28_29)?;
            }
            if let Some(k8s) = k8s_version_for(&version.target_version) {
                tracing::info!(
                    kubespray = %version.target_version,
                    kubernetes = k8s,
                    "Upgrading deployment"
                );
            }
            deployment.upgrade(&mut repo, &version.target_version)?;
            tracing::info!("Upgrade complete");
            Ok(())
        }
    }
}
