use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::mapping::MappingNode;

// ─── Statuses ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Preparing,
    Deploying,
    Deployed,
    DeployFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
}

/// Coarse resource lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Pending,
    Deploying,
    Deployed,
    DeployFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
}

/// Fine-grained resource status, including the stabilisation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreciseResourceStatus {
    Pending,
    Deploying,
    Deployed,
    DeployFailed,
    Stabilising,
    Stabilised,
    StabiliseFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
}

impl PreciseResourceStatus {
    /// Whether the deploy phase has finished, successfully or not.
    pub fn is_deploy_terminal(&self) -> bool {
        matches!(
            self,
            PreciseResourceStatus::Deployed
                | PreciseResourceStatus::DeployFailed
                | PreciseResourceStatus::Stabilising
                | PreciseResourceStatus::Stabilised
                | PreciseResourceStatus::StabiliseFailed
        )
    }

    /// Whether dependents may start: deployed, or deployed and stabilised.
    pub fn is_terminal_ok(&self) -> bool {
        matches!(
            self,
            PreciseResourceStatus::Deployed | PreciseResourceStatus::Stabilised
        )
    }

    pub fn is_destroy_terminal(&self) -> bool {
        matches!(
            self,
            PreciseResourceStatus::Destroyed | PreciseResourceStatus::DestroyFailed
        )
    }

    /// The coarse status this precise status maps onto.
    pub fn coarse(&self) -> ResourceStatus {
        match self {
            PreciseResourceStatus::Pending => ResourceStatus::Pending,
            PreciseResourceStatus::Deploying
            | PreciseResourceStatus::Stabilising => ResourceStatus::Deploying,
            PreciseResourceStatus::Deployed | PreciseResourceStatus::Stabilised => {
                ResourceStatus::Deployed
            }
            PreciseResourceStatus::DeployFailed | PreciseResourceStatus::StabiliseFailed => {
                ResourceStatus::DeployFailed
            }
            PreciseResourceStatus::Destroying => ResourceStatus::Destroying,
            PreciseResourceStatus::Destroyed => ResourceStatus::Destroyed,
            PreciseResourceStatus::DestroyFailed => ResourceStatus::DestroyFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Pending,
    Creating,
    Created,
    CreateFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
}

// ─── Durations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDurations {
    pub prepare_ms: Option<f64>,
    pub total_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDurations {
    pub config_complete_ms: Option<f64>,
    pub total_ms: Option<f64>,
    /// One entry per deploy attempt, in attempt order.
    pub attempt_durations_ms: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkDurations {
    pub total_ms: Option<f64>,
}

// ─── Instance State ─────────────────────────────────────────────────────────

/// The persisted state of one blueprint instance.
///
/// Stored entries keep child blueprints as an id map (`child_instance_ids`);
/// the `child_blueprints` snapshots are materialised from the flat instance
/// index when an instance is read out of the container.
#[derive(Debug, Clone, Default)]
pub struct InstanceState {
    pub instance_id: String,
    pub status: Option<InstanceStatus>,
    /// Resource id to resource state.
    pub resources: HashMap<String, ResourceState>,
    /// Resource name to resource id. Maintained on every resource save.
    pub resource_ids: HashMap<String, String>,
    /// Link name to link state.
    pub links: HashMap<String, LinkState>,
    /// Link id to link name. Populated lazily on id lookups.
    pub link_ids: HashMap<String, String>,
    pub metadata: HashMap<String, MappingNode>,
    pub exports: HashMap<String, ExportState>,
    /// Child name to the child's instance id. The same id is always
    /// reachable in the container's flat instance index.
    pub child_instance_ids: HashMap<String, String>,
    /// Child name to a materialised child snapshot. Only populated on
    /// copies returned from the container.
    pub child_blueprints: HashMap<String, InstanceState>,
    /// Per-child dependency info.
    pub child_dependencies: HashMap<String, ChildDependencyInfo>,
    pub durations: Option<InstanceDurations>,
}

impl InstanceState {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Self::default()
        }
    }

    pub fn resource_by_name(&self, name: &str) -> Option<&ResourceState> {
        let id = self.resource_ids.get(name)?;
        self.resources.get(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildDependencyInfo {
    /// Names of sibling children this child depends on.
    pub depends_on: Vec<String>,
}

// ─── Resource State ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ResourceState {
    /// Globally unique within an instance tree.
    pub resource_id: String,
    /// Unique within one instance.
    pub name: String,
    pub resource_type: String,
    /// The template this resource was expanded from, for each/count
    /// templates.
    pub template_name: Option<String>,
    pub instance_id: String,
    pub status: ResourceStatus,
    pub precise_status: PreciseResourceStatus,
    pub failure_reasons: Vec<String>,
    /// Resolved spec data. Shared by pointer: callers must never mutate
    /// spec nodes obtained from the state container.
    pub spec_data: Option<Arc<MappingNode>>,
    pub last_deployed_timestamp: Option<i64>,
    pub last_deploy_attempt_timestamp: Option<i64>,
    pub last_drift_detected_timestamp: Option<i64>,
    pub drifted: bool,
    pub durations: Option<ResourceDurations>,
}

impl Default for ResourceStatus {
    fn default() -> Self {
        ResourceStatus::Pending
    }
}

impl Default for PreciseResourceStatus {
    fn default() -> Self {
        PreciseResourceStatus::Pending
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus::Pending
    }
}

// ─── Link State ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct LinkState {
    pub link_id: String,
    /// Conventionally `"<resourceA>::<resourceB>"`.
    pub link_name: String,
    pub instance_id: String,
    pub status: LinkStatus,
    /// Ephemeral resources materialised by the link plugin while the link
    /// was established.
    pub intermediary_resource_states: Vec<ResourceState>,
    /// Opaque data recorded by the link plugin.
    pub link_data: Option<MappingNode>,
    pub last_deployed_timestamp: Option<i64>,
    pub last_deploy_attempt_timestamp: Option<i64>,
    pub failure_reasons: Vec<String>,
    pub durations: Option<LinkDurations>,
}

// ─── Exports & Drift ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ExportState {
    /// The reference path the export resolves through.
    pub field: String,
    pub value: Option<MappingNode>,
}

/// Drift recorded for one resource after reconciliation against external
/// state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDriftState {
    pub resource_id: String,
    pub resource_name: String,
    /// Spec paths that diverged, sorted.
    pub drifted_fields: Vec<String>,
    pub timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precise_status_classification() {
        assert!(PreciseResourceStatus::Deployed.is_terminal_ok());
        assert!(PreciseResourceStatus::Stabilised.is_terminal_ok());
        assert!(!PreciseResourceStatus::Stabilising.is_terminal_ok());
        assert!(PreciseResourceStatus::Stabilising.is_deploy_terminal());
        assert!(PreciseResourceStatus::DestroyFailed.is_destroy_terminal());
        assert!(!PreciseResourceStatus::Deploying.is_deploy_terminal());
    }

    #[test]
    fn coarse_status_collapses_stabilisation() {
        assert_eq!(
            PreciseResourceStatus::Stabilising.coarse(),
            ResourceStatus::Deploying
        );
        assert_eq!(
            PreciseResourceStatus::Stabilised.coarse(),
            ResourceStatus::Deployed
        );
        assert_eq!(
            PreciseResourceStatus::StabiliseFailed.coarse(),
            ResourceStatus::DeployFailed
        );
    }

    #[test]
    fn resource_lookup_by_name_goes_through_the_index() {
        let mut instance = InstanceState::new("inst-1");
        instance.resources.insert(
            "res-1".to_string(),
            ResourceState {
                resource_id: "res-1".to_string(),
                name: "ordersTable".to_string(),
                ..ResourceState::default()
            },
        );
        instance
            .resource_ids
            .insert("ordersTable".to_string(), "res-1".to_string());
        assert_eq!(
            instance.resource_by_name("ordersTable").map(|r| r.resource_id.as_str()),
            Some("res-1")
        );
        assert!(instance.resource_by_name("missing").is_none());
    }
}
