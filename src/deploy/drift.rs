use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::retry::with_retry;
use crate::clock::Clock;
use crate::provider::{GetExternalStateInput, Provider};
use crate::staging::diff::{stage_resource_changes, StageResourceChangesInput};
use crate::state::models::ResourceDriftState;
use crate::state::{StateContainer, StateError};

/// Reconciles persisted state against external reality. Drift probes honour
/// the provider's retry policy; a resource whose probe fails terminally is
/// logged and skipped rather than failing the whole pass.
pub struct DriftChecker {
    providers: HashMap<String, Arc<dyn Provider>>,
    state: Arc<StateContainer>,
    clock: Arc<dyn Clock>,
}

impl DriftChecker {
    pub fn new(
        providers: HashMap<String, Arc<dyn Provider>>,
        state: Arc<StateContainer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            providers,
            state,
            clock,
        }
    }

    /// Check every resource of an instance, recording drift entries for
    /// resources whose non-computed fields diverge and clearing drift for
    /// resources that match.
    pub async fn check_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<ResourceDriftState>, StateError> {
        let instance = self.state.instances().get(instance_id)?;
        let mut drifted = Vec::new();

        // Deterministic iteration order for logs and results.
        let mut resource_ids: Vec<&String> = instance.resources.keys().collect();
        resource_ids.sort();

        for resource_id in resource_ids {
            let Some(resource) = instance.resources.get(resource_id) else {
                continue;
            };
            let namespace = resource
                .resource_type
                .split('/')
                .next()
                .unwrap_or(&resource.resource_type);
            let Some(provider) = self.providers.get(namespace) else {
                warn!(
                    resource = %resource.name,
                    namespace = namespace,
                    "no provider for drift check, skipping"
                );
                continue;
            };
            let Some(plugin) = provider.resource(&resource.resource_type) else {
                warn!(
                    resource = %resource.name,
                    resource_type = %resource.resource_type,
                    "no resource plugin for drift check, skipping"
                );
                continue;
            };
            let Some(spec) = resource.spec_data.as_deref() else {
                continue;
            };

            let policy = provider.retry_policy();
            let probe_input = GetExternalStateInput {
                instance_id: instance_id.to_string(),
                resource_id: Some(resource.resource_id.clone()),
                resource_name: resource.name.clone(),
            };
            let (external, _) = with_retry(&policy, "get_external_state", || {
                plugin.get_external_state(probe_input.clone())
            })
            .await;

            let external = match external {
                Ok(state) => state,
                Err(err) => {
                    // Drift detection is non-fatal.
                    warn!(
                        resource = %resource.name,
                        error = %err,
                        "drift probe failed, moving on"
                    );
                    continue;
                }
            };

            let definition = plugin.get_spec_definition();
            let changes = match stage_resource_changes(StageResourceChangesInput {
                instance_id,
                resource_name: &resource.name,
                resource_type: &resource.resource_type,
                prior_state: Some(resource),
                desired_spec: spec,
                external_state: external.as_ref(),
                spec_definition: &definition,
            }) {
                Ok(changes) => changes,
                Err(err) => {
                    warn!(resource = %resource.name, error = %err, "drift diff failed");
                    continue;
                }
            };

            let mut drifted_fields: Vec<String> = changes
                .modified_fields
                .iter()
                .map(|f| f.field_path.clone())
                .chain(changes.new_fields.iter().map(|f| f.field_path.clone()))
                .chain(changes.removed_fields.iter().cloned())
                .collect();
            drifted_fields.sort();

            if drifted_fields.is_empty() {
                debug!(resource = %resource.name, "no drift detected");
                self.state
                    .resources()
                    .remove_drift(instance_id, &resource.resource_id)?;
                continue;
            }

            debug!(
                resource = %resource.name,
                fields = drifted_fields.len(),
                "drift detected"
            );
            let drift = ResourceDriftState {
                resource_id: resource.resource_id.clone(),
                resource_name: resource.name.clone(),
                drifted_fields,
                timestamp: Some(self.clock.now_unix()),
            };
            self.state
                .resources()
                .save_drift(instance_id, drift.clone())?;
            drifted.push(drift);
        }

        Ok(drifted)
    }
}
