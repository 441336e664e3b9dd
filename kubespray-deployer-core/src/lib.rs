#![doc = "kubespray-deployer-core: core logic library for kubespray-deployer."]

//! This crate contains the business logic of the deployment toolkit: the
//! terraform-state → ansible-inventory transformation, the cloud-config
//! credential conversion and the kubespray checkout/deploy/upgrade
//! orchestration. CLI glue lives in the `kubespray-deployer` crate.
//!
//! # Usage
//! Add this as a dependency for anything that needs the state model, the
//! inventory writer or the upgrade pipeline without the CLI.

pub mod cloud_config;
pub mod contract;
pub mod inventory;
pub mod tfstate;
pub mod upgrade;
