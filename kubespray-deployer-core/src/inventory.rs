//! Bastion resolution and inventory serialization.
//!
//! Consumes a parsed [`TerraformState`] and produces the ansible
//! inventory text: section order and line order are fixed, so
//! regenerating from an unchanged state yields byte-identical output.
//! The only non-deterministic step is the random fallback choice of a
//! jump host, exercised when no instance is bastion-tagged but some
//! instance lacks a public address.

use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::IteratorRandom;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

use crate::tfstate::{GroupName, Instance, TerraformState};

/// Errors raised while resolving the bastion or writing the inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// A jump host is required (some instance is reachable only privately)
    /// but no instance anywhere holds a public address.
    #[error("a jump host is required but no instance has a public address")]
    NoPublicAddressAvailable,

    /// The inventory file could not be written.
    #[error("failed to write inventory to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decide which instance, if any, serves as the jump host.
///
/// An explicitly bastion-tagged instance always wins. Otherwise, when some
/// instance is reachable only privately, one public instance is drawn
/// uniformly at random from the pool; an empty pool is an error because
/// the private-only instances would be unreachable. When every instance
/// already has a public address, no bastion is needed.
pub fn resolve_bastion<'a, R: Rng + ?Sized>(
    state: &'a TerraformState,
    rng: &mut R,
) -> Result<Option<&'a Instance>, InventoryError> {
    if let Some(instance) = state.bastion_instance() {
        debug!(name = instance.name(), "Using tagged bastion instance");
        return Ok(Some(instance));
    }
    if !state.has_private_instances() {
        return Ok(None);
    }
    let chosen = state
        .public_instances()
        .choose(rng)
        .ok_or(InventoryError::NoPublicAddressAvailable)?;
    debug!(
        name = chosen.name(),
        "No tagged bastion, drew a fallback jump host from the public pool"
    );
    Ok(Some(chosen))
}

fn is_resolved_bastion(instance: &Instance, bastion: Option<&Instance>) -> bool {
    bastion.map_or(false, |b| b.id() == instance.id())
}

/// Serialize the model and bastion decision into inventory text.
///
/// Sections appear as `all`, `bastion` (only when a bastion exists),
/// `etcd`, `k8s-cluster`, `kube-master`, `kube-node`, regardless of
/// discovery order. The resolved bastion is emitted once, as the
/// `bastion` line under `all`, and displays as `bastion` in the role
/// sections it belongs to.
pub fn render_inventory(state: &TerraformState, bastion: Option<&Instance>) -> String {
    let mut out = String::new();

    out.push_str("[all]\n");
    for id in state.group_members(GroupName::All) {
        let Some(instance) = state.instance(id) else {
            continue;
        };
        if is_resolved_bastion(instance, bastion) {
            continue;
        }
        let reachable = if instance.public_address().is_empty() {
            instance.private_address()
        } else {
            instance.public_address()
        };
        out.push_str(&format!(
            "{} ansible_host={} ip={} ansible_ssh_user={}\n",
            instance.name(),
            reachable,
            instance.private_address(),
            instance.ssh_user()
        ));
    }
    if let Some(bastion) = bastion {
        out.push_str(&format!(
            "bastion ansible_host={} ansible_user={}\n",
            bastion.public_address(),
            bastion.ssh_user()
        ));
    }
    out.push('\n');

    if bastion.is_some() {
        out.push_str("[bastion]\nbastion\n\n");
    }

    for group in GroupName::ROLE_GROUPS {
        out.push_str(&format!("[{group}]\n"));
        for id in state.group_members(group) {
            let Some(instance) = state.instance(id) else {
                continue;
            };
            if is_resolved_bastion(instance, bastion) {
                out.push_str("bastion\n");
            } else {
                out.push_str(instance.name());
                out.push('\n');
            }
        }
        out.push('\n');
    }

    out
}

/// Render and write the inventory in a single pass.
///
/// Nothing is written when rendering the text fails upstream; a failed
/// write is fatal and is not retried.
pub fn write_inventory(
    path: impl AsRef<Path>,
    state: &TerraformState,
    bastion: Option<&Instance>,
) -> Result<(), InventoryError> {
    let path = path.as_ref();
    let text = render_inventory(state, bastion);
    fs::write(path, &text).map_err(|e| InventoryError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!(path = %path.display(), bytes = text.len(), "Wrote inventory");
    Ok(())
}
