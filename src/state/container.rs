use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::debug;

use super::models::{
    ChildDependencyInfo, ExportState, InstanceDurations, InstanceState, InstanceStatus,
    LinkState, ResourceDriftState, ResourceState,
};
use crate::clock::Clock;
use crate::schema::mapping::MappingNode;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Typed not-found errors keyed by qualified identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("instance:{0} not found")]
    InstanceNotFound(String),

    #[error("instance:{instance_id}:resource:{resource} not found")]
    ResourceNotFound {
        instance_id: String,
        resource: String,
    },

    #[error("instance:{instance_id}:link:{link} not found")]
    LinkNotFound { instance_id: String, link: String },

    #[error("instance:{instance_id}:child:{child} not found")]
    ChildNotFound {
        instance_id: String,
        child: String,
    },

    #[error("instance:{instance_id}:export:{export} not found")]
    ExportNotFound {
        instance_id: String,
        export: String,
    },
}

// ─── Container ──────────────────────────────────────────────────────────────

struct ContainerState {
    instances: HashMap<String, InstanceState>,
    /// Drift entries keyed by instance id, then resource id.
    drift: HashMap<String, HashMap<String, ResourceDriftState>>,
}

/// In-memory, concurrency-safe store for instance, resource, link, export,
/// child-blueprint, and drift state.
///
/// All six sub-stores share one reader-writer lock: cross-sub-store
/// invariants (a resource save must also maintain the name index on its
/// parent instance) need a coherent view.
pub struct StateContainer {
    state: Arc<RwLock<ContainerState>>,
    clock: Arc<dyn Clock>,
}

impl StateContainer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ContainerState {
                instances: HashMap::new(),
                drift: HashMap::new(),
            })),
            clock,
        }
    }

    pub fn instances(&self) -> InstancesContainer<'_> {
        InstancesContainer { container: self }
    }

    pub fn resources(&self) -> ResourcesContainer<'_> {
        ResourcesContainer { container: self }
    }

    pub fn links(&self) -> LinksContainer<'_> {
        LinksContainer { container: self }
    }

    pub fn children(&self) -> ChildrenContainer<'_> {
        ChildrenContainer { container: self }
    }

    pub fn metadata(&self) -> MetadataContainer<'_> {
        MetadataContainer { container: self }
    }

    pub fn exports(&self) -> ExportsContainer<'_> {
        ExportsContainer { container: self }
    }

    fn read(&self) -> RwLockReadGuard<'_, ContainerState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContainerState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Deep-copy an instance, materialising child snapshots from the flat
/// index. The `path` breadcrumb carries every instance id on the current
/// descent; a descendant already on the path is a cycle and is skipped.
fn clone_instance(
    state: &ContainerState,
    instance_id: &str,
    path: &mut Vec<String>,
) -> Option<InstanceState> {
    if path.iter().any(|id| id == instance_id) {
        return None;
    }
    let instance = state.instances.get(instance_id)?;
    let mut copy = instance.clone();
    path.push(instance_id.to_string());
    copy.child_blueprints = instance
        .child_instance_ids
        .iter()
        .filter_map(|(child_name, child_id)| {
            clone_instance(state, child_id, path).map(|child| (child_name.clone(), child))
        })
        .collect();
    path.pop();
    Some(copy)
}

// ─── Instances ──────────────────────────────────────────────────────────────

pub struct InstancesContainer<'a> {
    container: &'a StateContainer,
}

impl InstancesContainer<'_> {
    /// A deep copy of the instance with child snapshots materialised.
    /// Mutating the copy never affects subsequent reads.
    pub fn get(&self, instance_id: &str) -> Result<InstanceState, StateError> {
        let state = self.container.read();
        clone_instance(&state, instance_id, &mut Vec::new())
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))
    }

    /// Create or overwrite the instance entry.
    pub fn save(&self, mut instance: InstanceState) -> Result<(), StateError> {
        // Materialised child snapshots are never stored; the id map is the
        // persisted representation.
        instance.child_blueprints.clear();
        let mut state = self.container.write();
        debug!(instance_id = %instance.instance_id, "saving instance state");
        state.instances.insert(instance.instance_id.clone(), instance);
        Ok(())
    }

    /// Update the status, preserving existing durations when none are
    /// supplied.
    pub fn update_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        durations: Option<InstanceDurations>,
    ) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.status = Some(status);
        if durations.is_some() {
            instance.durations = durations;
        }
        Ok(())
    }

    /// Remove the instance, returning the removed snapshot.
    pub fn remove(&self, instance_id: &str) -> Result<InstanceState, StateError> {
        let mut state = self.container.write();
        state
            .instances
            .remove(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))
    }
}

// ─── Resources ──────────────────────────────────────────────────────────────

pub struct ResourcesContainer<'a> {
    container: &'a StateContainer,
}

impl ResourcesContainer<'_> {
    pub fn get(&self, instance_id: &str, resource_id: &str) -> Result<ResourceState, StateError> {
        let state = self.container.read();
        let instance = state
            .instances
            .get(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance
            .resources
            .get(resource_id)
            .cloned()
            .ok_or_else(|| StateError::ResourceNotFound {
                instance_id: instance_id.to_string(),
                resource: resource_id.to_string(),
            })
    }

    pub fn get_by_name(
        &self,
        instance_id: &str,
        resource_name: &str,
    ) -> Result<ResourceState, StateError> {
        let state = self.container.read();
        let instance = state
            .instances
            .get(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance
            .resource_by_name(resource_name)
            .cloned()
            .ok_or_else(|| StateError::ResourceNotFound {
                instance_id: instance_id.to_string(),
                resource: resource_name.to_string(),
            })
    }

    /// Save a resource under its parent instance, maintaining the
    /// name-to-id index.
    pub fn save(&self, instance_id: &str, resource: ResourceState) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        debug!(
            instance_id = instance_id,
            resource_id = %resource.resource_id,
            resource_name = %resource.name,
            "saving resource state"
        );
        instance
            .resource_ids
            .insert(resource.name.clone(), resource.resource_id.clone());
        instance
            .resources
            .insert(resource.resource_id.clone(), resource);
        Ok(())
    }

    pub fn remove(
        &self,
        instance_id: &str,
        resource_id: &str,
    ) -> Result<ResourceState, StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let removed = instance.resources.remove(resource_id).ok_or_else(|| {
            StateError::ResourceNotFound {
                instance_id: instance_id.to_string(),
                resource: resource_id.to_string(),
            }
        })?;
        instance.resource_ids.remove(&removed.name);
        Ok(removed)
    }

    /// Record drift: flags the resource, stamps the detection time, and
    /// writes the drift entry keyed by instance and resource id.
    pub fn save_drift(
        &self,
        instance_id: &str,
        mut drift: ResourceDriftState,
    ) -> Result<(), StateError> {
        let now = self.container.clock.now_unix();
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let resource = instance.resources.get_mut(&drift.resource_id).ok_or_else(|| {
            StateError::ResourceNotFound {
                instance_id: instance_id.to_string(),
                resource: drift.resource_id.clone(),
            }
        })?;
        resource.drifted = true;
        resource.last_drift_detected_timestamp = Some(now);
        if drift.timestamp.is_none() {
            drift.timestamp = Some(now);
        }
        state
            .drift
            .entry(instance_id.to_string())
            .or_default()
            .insert(drift.resource_id.clone(), drift);
        Ok(())
    }

    /// Clear drift for a resource, removing its entry when present.
    pub fn remove_drift(&self, instance_id: &str, resource_id: &str) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let resource = instance.resources.get_mut(resource_id).ok_or_else(|| {
            StateError::ResourceNotFound {
                instance_id: instance_id.to_string(),
                resource: resource_id.to_string(),
            }
        })?;
        resource.drifted = false;
        if let Some(entries) = state.drift.get_mut(instance_id) {
            entries.remove(resource_id);
        }
        Ok(())
    }

    pub fn get_drift(
        &self,
        instance_id: &str,
        resource_id: &str,
    ) -> Result<Option<ResourceDriftState>, StateError> {
        let state = self.container.read();
        if !state.instances.contains_key(instance_id) {
            return Err(StateError::InstanceNotFound(instance_id.to_string()));
        }
        Ok(state
            .drift
            .get(instance_id)
            .and_then(|entries| entries.get(resource_id))
            .cloned())
    }
}

// ─── Links ──────────────────────────────────────────────────────────────────

pub struct LinksContainer<'a> {
    container: &'a StateContainer,
}

impl LinksContainer<'_> {
    pub fn get(&self, instance_id: &str, link_name: &str) -> Result<LinkState, StateError> {
        let state = self.container.read();
        let instance = state
            .instances
            .get(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance
            .links
            .get(link_name)
            .cloned()
            .ok_or_else(|| StateError::LinkNotFound {
                instance_id: instance_id.to_string(),
                link: link_name.to_string(),
            })
    }

    /// Look a link up by id. The id-to-name index is populated lazily the
    /// first time an id lookup runs against an instance.
    pub fn get_by_id(&self, instance_id: &str, link_id: &str) -> Result<LinkState, StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        if instance.link_ids.len() != instance.links.len() {
            instance.link_ids = instance
                .links
                .iter()
                .map(|(name, link)| (link.link_id.clone(), name.clone()))
                .collect();
        }
        instance
            .link_ids
            .get(link_id)
            .and_then(|name| instance.links.get(name))
            .cloned()
            .ok_or_else(|| StateError::LinkNotFound {
                instance_id: instance_id.to_string(),
                link: link_id.to_string(),
            })
    }

    pub fn save(&self, instance_id: &str, link: LinkState) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance
            .link_ids
            .insert(link.link_id.clone(), link.link_name.clone());
        instance.links.insert(link.link_name.clone(), link);
        Ok(())
    }

    pub fn remove(&self, instance_id: &str, link_name: &str) -> Result<LinkState, StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let removed =
            instance
                .links
                .remove(link_name)
                .ok_or_else(|| StateError::LinkNotFound {
                    instance_id: instance_id.to_string(),
                    link: link_name.to_string(),
                })?;
        instance.link_ids.remove(&removed.link_id);
        Ok(removed)
    }
}

// ─── Children ───────────────────────────────────────────────────────────────

pub struct ChildrenContainer<'a> {
    container: &'a StateContainer,
}

impl ChildrenContainer<'_> {
    /// Attach an existing child instance under a parent. Both ends must
    /// already exist in the flat instance index.
    pub fn attach(
        &self,
        parent_instance_id: &str,
        child_name: &str,
        child_instance_id: &str,
    ) -> Result<(), StateError> {
        let mut state = self.container.write();
        if !state.instances.contains_key(child_instance_id) {
            return Err(StateError::InstanceNotFound(child_instance_id.to_string()));
        }
        let parent = state
            .instances
            .get_mut(parent_instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(parent_instance_id.to_string()))?;
        parent
            .child_instance_ids
            .insert(child_name.to_string(), child_instance_id.to_string());
        Ok(())
    }

    /// A deep copy of the named child.
    pub fn get(
        &self,
        parent_instance_id: &str,
        child_name: &str,
    ) -> Result<InstanceState, StateError> {
        let state = self.container.read();
        let parent = state
            .instances
            .get(parent_instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(parent_instance_id.to_string()))?;
        let child_id =
            parent
                .child_instance_ids
                .get(child_name)
                .ok_or_else(|| StateError::ChildNotFound {
                    instance_id: parent_instance_id.to_string(),
                    child: child_name.to_string(),
                })?;
        clone_instance(&state, child_id, &mut vec![parent_instance_id.to_string()]).ok_or_else(
            || StateError::ChildNotFound {
                instance_id: parent_instance_id.to_string(),
                child: child_name.to_string(),
            },
        )
    }

    /// Detach a child from its parent. The child instance itself stays in
    /// the flat index.
    pub fn detach(
        &self,
        parent_instance_id: &str,
        child_name: &str,
    ) -> Result<(), StateError> {
        let mut state = self.container.write();
        let parent = state
            .instances
            .get_mut(parent_instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(parent_instance_id.to_string()))?;
        parent
            .child_instance_ids
            .remove(child_name)
            .ok_or_else(|| StateError::ChildNotFound {
                instance_id: parent_instance_id.to_string(),
                child: child_name.to_string(),
            })?;
        parent.child_dependencies.remove(child_name);
        Ok(())
    }

    pub fn save_dependencies(
        &self,
        parent_instance_id: &str,
        child_name: &str,
        dependencies: ChildDependencyInfo,
    ) -> Result<(), StateError> {
        let mut state = self.container.write();
        let parent = state
            .instances
            .get_mut(parent_instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(parent_instance_id.to_string()))?;
        if !parent.child_instance_ids.contains_key(child_name) {
            return Err(StateError::ChildNotFound {
                instance_id: parent_instance_id.to_string(),
                child: child_name.to_string(),
            });
        }
        parent
            .child_dependencies
            .insert(child_name.to_string(), dependencies);
        Ok(())
    }
}

// ─── Metadata ───────────────────────────────────────────────────────────────

pub struct MetadataContainer<'a> {
    container: &'a StateContainer,
}

impl MetadataContainer<'_> {
    pub fn get(&self, instance_id: &str) -> Result<HashMap<String, MappingNode>, StateError> {
        let state = self.container.read();
        state
            .instances
            .get(instance_id)
            .map(|instance| instance.metadata.clone())
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))
    }

    pub fn save(
        &self,
        instance_id: &str,
        metadata: HashMap<String, MappingNode>,
    ) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.metadata = metadata;
        Ok(())
    }

    pub fn remove(&self, instance_id: &str) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.metadata.clear();
        Ok(())
    }
}

// ─── Exports ────────────────────────────────────────────────────────────────

pub struct ExportsContainer<'a> {
    container: &'a StateContainer,
}

impl ExportsContainer<'_> {
    pub fn get(&self, instance_id: &str, export_name: &str) -> Result<ExportState, StateError> {
        let state = self.container.read();
        let instance = state
            .instances
            .get(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance
            .exports
            .get(export_name)
            .cloned()
            .ok_or_else(|| StateError::ExportNotFound {
                instance_id: instance_id.to_string(),
                export: export_name.to_string(),
            })
    }

    pub fn get_all(
        &self,
        instance_id: &str,
    ) -> Result<HashMap<String, ExportState>, StateError> {
        let state = self.container.read();
        state
            .instances
            .get(instance_id)
            .map(|instance| instance.exports.clone())
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))
    }

    pub fn save(
        &self,
        instance_id: &str,
        export_name: &str,
        export: ExportState,
    ) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.exports.insert(export_name.to_string(), export);
        Ok(())
    }

    pub fn save_all(
        &self,
        instance_id: &str,
        exports: HashMap<String, ExportState>,
    ) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.exports.extend(exports);
        Ok(())
    }

    pub fn remove_all(&self, instance_id: &str) -> Result<(), StateError> {
        let mut state = self.container.write();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.exports.clear();
        Ok(())
    }
}
