//! Terraform state loading and parsing.
//!
//! Decodes the raw state snapshot (`modules → resources → attributes`)
//! into the typed instance/group model the inventory writer consumes.
//! Decoding happens once, at the loader boundary, into [`RawState`];
//! the parser then reads only typed records and reports precise errors
//! for missing attributes instead of generic lookup failures.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Resource type holding a compute instance.
const COMPUTE_INSTANCE_TYPE: &str = "openstack_compute_instance_v2";
/// Resource type associating a floating IP with an instance.
const FLOATING_IP_ASSOCIATE_TYPE: &str = "openstack_compute_floatingip_associate_v2";
/// Resource-key marker for master instances attached directly to the external network.
const MASTER_EXT_NET_MARKER: &str = "k8s_master_ext_net";

const ATTR_ID: &str = "id";
const ATTR_NAME: &str = "name";
const ATTR_GROUPS: &str = "all_metadata.kubespray_groups";
const ATTR_PRIVATE_IP: &str = "access_ip_v4";
const ATTR_FLOATING_IP: &str = "network.0.floating_ip";
const ATTR_FIXED_IP: &str = "network.0.fixed_ip_v4";
const ATTR_SSH_USER: &str = "metadata.ssh_user";
const ATTR_ASSOC_INSTANCE_ID: &str = "instance_id";
const ATTR_ASSOC_FLOATING_IP: &str = "floating_ip";

/// Errors raised while loading or parsing a state snapshot.
#[derive(Debug, Error)]
pub enum StateError {
    /// The state file is missing or unreadable.
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file does not decode as the expected structural shape.
    #[error("state file {path} is not a terraform state document: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A recognised resource is missing an attribute the model requires.
    #[error("resource {resource}: missing required attribute '{attribute}'")]
    MalformedRecord {
        resource: String,
        attribute: &'static str,
    },
}

/// Structural shape of the state document. Only the parts the model
/// consumes are decoded; everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct RawState {
    #[serde(default)]
    modules: Vec<RawModule>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    #[serde(default, deserialize_with = "ordered_resources")]
    resources: Vec<(String, RawResource)>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    primary: RawPrimary,
}

#[derive(Debug, Default, Deserialize)]
struct RawPrimary {
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl RawResource {
    fn attr(&self, key: &str) -> Option<&str> {
        self.primary.attributes.get(key).and_then(Value::as_str)
    }

    fn required_attr(&self, resource_key: &str, key: &'static str) -> Result<&str, StateError> {
        self.attr(key).ok_or_else(|| StateError::MalformedRecord {
            resource: resource_key.to_string(),
            attribute: key,
        })
    }
}

/// Decode the resource map preserving document order. Group membership
/// is ordered by first appearance in the document, so the scan order of
/// the resource collection is significant.
fn ordered_resources<'de, D>(deserializer: D) -> Result<Vec<(String, RawResource)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ResourcesVisitor;

    impl<'de> Visitor<'de> for ResourcesVisitor {
        type Value = Vec<(String, RawResource)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of resource keys to resource records")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut resources = Vec::new();
            while let Some(entry) = map.next_entry()? {
                resources.push(entry);
            }
            Ok(resources)
        }
    }

    deserializer.deserialize_map(ResourcesVisitor)
}

/// The closed set of inventory group names recognised by kubespray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupName {
    All,
    Bastion,
    Etcd,
    K8sCluster,
    KubeMaster,
    KubeNode,
}

impl GroupName {
    /// Every recognised group, in inventory section order.
    pub const ALL_GROUPS: [GroupName; 6] = [
        GroupName::All,
        GroupName::Bastion,
        GroupName::Etcd,
        GroupName::K8sCluster,
        GroupName::KubeMaster,
        GroupName::KubeNode,
    ];

    /// The role sections written after `all` and `bastion`.
    pub const ROLE_GROUPS: [GroupName; 4] = [
        GroupName::Etcd,
        GroupName::K8sCluster,
        GroupName::KubeMaster,
        GroupName::KubeNode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GroupName::All => "all",
            GroupName::Bastion => "bastion",
            GroupName::Etcd => "etcd",
            GroupName::K8sCluster => "k8s-cluster",
            GroupName::KubeMaster => "kube-master",
            GroupName::KubeNode => "kube-node",
        }
    }

    /// Map a raw role tag onto the recognised set. Tags are matched
    /// case-sensitively; anything else yields `None`.
    pub fn from_tag(tag: &str) -> Option<GroupName> {
        match tag {
            "all" => Some(GroupName::All),
            "bastion" => Some(GroupName::Bastion),
            "etcd" => Some(GroupName::Etcd),
            "k8s-cluster" => Some(GroupName::K8sCluster),
            "kube-master" => Some(GroupName::KubeMaster),
            "kube-node" => Some(GroupName::KubeNode),
            _ => None,
        }
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioned compute instance as recorded in the state snapshot.
///
/// Instances are immutable outside this module: the public address is
/// backfilled during the parser's second sub-pass, after which the whole
/// model is read-only.
#[derive(Debug, Clone)]
pub struct Instance {
    id: String,
    name: String,
    group_tags: Vec<String>,
    private_address: String,
    public_address: String,
    ssh_user: String,
}

impl Instance {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role tags as read from the record, recognised or not.
    pub fn group_tags(&self) -> &[String] {
        &self.group_tags
    }

    pub fn private_address(&self) -> &str {
        &self.private_address
    }

    /// Empty when the instance is reachable only through the private network.
    pub fn public_address(&self) -> &str {
        &self.public_address
    }

    pub fn ssh_user(&self) -> &str {
        &self.ssh_user
    }

    /// Whether the record is explicitly tagged as the jump host.
    pub fn is_bastion(&self) -> bool {
        self.group_tags.iter().any(|t| t == GroupName::Bastion.as_str())
    }
}

/// The parsed state snapshot: instances, group membership and the
/// public-address pool. Built once per run; read-only afterwards.
#[derive(Debug)]
pub struct TerraformState {
    instances: HashMap<String, Instance>,
    /// Instance ids in first-seen document order.
    order: Vec<String>,
    groups: BTreeMap<GroupName, Vec<String>>,
    /// Public address → id of the instance holding it.
    public_pool: HashMap<String, String>,
}

impl TerraformState {
    /// Read and parse a state snapshot from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| StateError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let raw: RawState = serde_json::from_str(&contents).map_err(|e| StateError::Decode {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!(path = %path.display(), "Loaded terraform state");
        Self::from_raw(raw)
    }

    /// Parse an already-decoded state document.
    ///
    /// Two sub-passes over the resource collection: the first builds the
    /// instances and group membership and collects floating-ip association
    /// records, the second applies those associations. Association records
    /// carry no ordering relationship with the instance they refer to, so
    /// they cannot be applied while scanning.
    pub fn from_raw(raw: RawState) -> Result<Self, StateError> {
        let mut state = TerraformState {
            instances: HashMap::new(),
            order: Vec::new(),
            groups: GroupName::ALL_GROUPS.iter().map(|g| (*g, Vec::new())).collect(),
            public_pool: HashMap::new(),
        };
        // (instance id, floating ip), keyed by instance id: a later
        // association for the same instance replaces the earlier one.
        let mut pending: Vec<(String, String)> = Vec::new();

        for module in &raw.modules {
            for (key, resource) in &module.resources {
                match resource.resource_type.as_str() {
                    COMPUTE_INSTANCE_TYPE => {
                        let mut instance = Instance {
                            id: resource.required_attr(key, ATTR_ID)?.to_string(),
                            name: resource.required_attr(key, ATTR_NAME)?.to_string(),
                            group_tags: resource
                                .required_attr(key, ATTR_GROUPS)?
                                .split(',')
                                .map(str::to_string)
                                .collect(),
                            private_address: resource
                                .required_attr(key, ATTR_PRIVATE_IP)?
                                .to_string(),
                            public_address: resource
                                .attr(ATTR_FLOATING_IP)
                                .unwrap_or_default()
                                .to_string(),
                            ssh_user: resource.required_attr(key, ATTR_SSH_USER)?.to_string(),
                        };

                        if !instance.is_bastion() {
                            state.group_mut(GroupName::All).push(instance.id.clone());
                            for tag in &instance.group_tags {
                                if let Some(group) = GroupName::from_tag(tag) {
                                    state.group_mut(group).push(instance.id.clone());
                                }
                            }
                        }

                        // Masters on the external network carry their public
                        // address inline instead of through an association.
                        if key.contains(MASTER_EXT_NET_MARKER) {
                            let fixed = resource.required_attr(key, ATTR_FIXED_IP)?.to_string();
                            state.public_pool.insert(fixed.clone(), instance.id.clone());
                            instance.public_address = fixed;
                        }

                        if state.instances.contains_key(&instance.id) {
                            warn!(
                                id = %instance.id,
                                resource = %key,
                                "Duplicate instance id in state, later record overwrites the earlier one"
                            );
                        } else {
                            state.order.push(instance.id.clone());
                        }
                        state.instances.insert(instance.id.clone(), instance);
                    }
                    FLOATING_IP_ASSOCIATE_TYPE => {
                        let instance_id =
                            resource.required_attr(key, ATTR_ASSOC_INSTANCE_ID)?.to_string();
                        let floating_ip =
                            resource.required_attr(key, ATTR_ASSOC_FLOATING_IP)?.to_string();
                        match pending.iter_mut().find(|(id, _)| *id == instance_id) {
                            Some(entry) => entry.1 = floating_ip,
                            None => pending.push((instance_id, floating_ip)),
                        }
                    }
                    other => {
                        debug!(resource = %key, resource_type = other, "Ignoring unrecognised resource type");
                    }
                }
            }
        }

        // Second sub-pass: every instance now exists, so the associations
        // can be applied. Unknown instance ids are dropped.
        for (instance_id, floating_ip) in pending {
            match state.instances.get_mut(&instance_id) {
                Some(instance) => {
                    instance.public_address = floating_ip.clone();
                    state.public_pool.insert(floating_ip, instance_id);
                }
                None => {
                    debug!(
                        instance_id = %instance_id,
                        "Dropping floating-ip association for unknown instance"
                    );
                }
            }
        }

        info!(
            instances = state.instances.len(),
            public = state.public_pool.len(),
            "Parsed terraform state"
        );
        Ok(state)
    }

    fn group_mut(&mut self, group: GroupName) -> &mut Vec<String> {
        self.groups.entry(group).or_default()
    }

    pub fn instance(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Instances in first-seen document order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.order.iter().filter_map(|id| self.instances.get(id))
    }

    /// Member ids of a group, in first-seen order.
    pub fn group_members(&self, group: GroupName) -> &[String] {
        self.groups.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any instance is reachable only through the private network.
    pub fn has_private_instances(&self) -> bool {
        self.instances.values().any(|i| i.public_address.is_empty())
    }

    /// The first bastion-tagged instance in document order, if any.
    pub fn bastion_instance(&self) -> Option<&Instance> {
        self.instances().find(|i| i.is_bastion())
    }

    /// Instances holding a public address.
    pub fn public_instances(&self) -> impl Iterator<Item = &Instance> {
        self.public_pool.values().filter_map(|id| self.instances.get(id))
    }
}
