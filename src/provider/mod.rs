pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::Diagnostic;
use crate::schema::mapping::MappingNode;
use crate::schema::scalar::ScalarValue;
use crate::staging::changes::ResourceChanges;
use schema::ResourceSpecDefinition;

// ─── Provider Errors ────────────────────────────────────────────────────────

/// Errors surfaced by provider plugins. The orchestrator classifies on the
/// variant: retryable errors are retried under the provider's retry policy,
/// everything else is terminal for the resource.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("retryable: {message}")]
    Retryable { message: String },

    #[error("resource deploy failed: {message}")]
    ResourceDeploy {
        message: String,
        failure_reasons: Vec<String>,
    },

    #[error("resource destroy failed: {message}")]
    ResourceDestroy {
        message: String,
        failure_reasons: Vec<String>,
    },

    #[error("{message}")]
    Other { message: String },
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        ProviderError::Retryable {
            message: message.into(),
        }
    }

    pub fn deploy_failed(message: impl Into<String>, failure_reasons: Vec<String>) -> Self {
        ProviderError::ResourceDeploy {
            message: message.into(),
            failure_reasons,
        }
    }

    pub fn destroy_failed(message: impl Into<String>, failure_reasons: Vec<String>) -> Self {
        ProviderError::ResourceDestroy {
            message: message.into(),
            failure_reasons,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        ProviderError::Other {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }

    /// Failure reasons recorded against the resource state on terminal
    /// errors.
    pub fn failure_reasons(&self) -> Vec<String> {
        match self {
            ProviderError::ResourceDeploy {
                failure_reasons, ..
            }
            | ProviderError::ResourceDestroy {
                failure_reasons, ..
            } => failure_reasons.clone(),
            other => vec![other.to_string()],
        }
    }
}

// ─── Retry Policy ───────────────────────────────────────────────────────────

/// Per-provider retry behaviour applied uniformly to deploy, destroy,
/// external-state fetches, and stabilisation probes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before the given attempt (1-based), capped at
    /// `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

// ─── Provider ───────────────────────────────────────────────────────────────

/// A provider configuration field, e.g. `region` for an AWS-style provider.
#[derive(Debug, Clone)]
pub struct ConfigFieldDefinition {
    pub name: String,
    pub value_type: crate::functions::ValueType,
    pub required: bool,
    pub secret: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigDefinition {
    pub fields: Vec<ConfigFieldDefinition>,
}

/// The in-process contract a provider backend implements. A provider owns a
/// namespace of resource types, data sources, links, custom variable types,
/// and interpolation functions.
pub trait Provider: Send + Sync {
    fn namespace(&self) -> &str;

    fn config_definition(&self) -> ConfigDefinition {
        ConfigDefinition::default()
    }

    fn resource(&self, type_name: &str) -> Option<Arc<dyn ResourcePlugin>>;

    fn link(&self, type_a: &str, type_b: &str) -> Option<Arc<dyn LinkPlugin>>;

    fn data_source(&self, type_name: &str) -> Option<Arc<dyn DataSourcePlugin>>;

    fn custom_variable_type(&self, type_name: &str) -> Option<Arc<dyn CustomVariableType>>;

    fn function(
        &self,
        name: &str,
    ) -> Option<Arc<dyn crate::functions::registry::BlueprintFunction>>;

    fn list_resource_types(&self) -> Vec<String>;

    fn list_link_types(&self) -> Vec<String>;

    fn list_data_source_types(&self) -> Vec<String>;

    fn list_custom_variable_types(&self) -> Vec<String>;

    fn list_functions(&self) -> Vec<String>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

// ─── Resource Plugin ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DeployResourceInput {
    pub instance_id: String,
    /// The existing id when updating; `None` on first create.
    pub resource_id: Option<String>,
    pub resource_name: String,
    pub spec: MappingNode,
    pub changes: ResourceChanges,
}

#[derive(Debug, Clone)]
pub struct DeployResourceOutput {
    /// Synthesised by the provider, typically an ARN-like string.
    pub resource_id: String,
    /// Values for computed fields, keyed by spec path, merged into the
    /// persisted spec after deploy.
    pub computed_field_values: BTreeMap<String, MappingNode>,
}

#[derive(Debug, Clone)]
pub struct HasStabilisedInput {
    pub instance_id: String,
    pub resource_id: String,
    pub resource_name: String,
}

#[derive(Debug, Clone)]
pub struct GetExternalStateInput {
    pub instance_id: String,
    pub resource_id: Option<String>,
    pub resource_name: String,
}

#[derive(Debug, Clone)]
pub struct DestroyResourceInput {
    pub instance_id: String,
    pub resource_id: String,
    pub resource_name: String,
}

/// Per-resource-type provider operations.
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    fn get_type(&self) -> &str;

    fn get_type_description(&self) -> String {
        String::new()
    }

    fn get_examples(&self) -> Vec<String> {
        Vec::new()
    }

    /// Resource types instances of this type can link out to.
    fn can_link_to(&self) -> Vec<String> {
        Vec::new()
    }

    /// Dependency types that must be fully stabilised, not merely deployed,
    /// before this resource starts.
    fn get_stabilised_dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether this type is usually a leaf in link chains.
    fn is_common_terminal(&self) -> bool {
        false
    }

    fn get_spec_definition(&self) -> ResourceSpecDefinition;

    async fn custom_validate(
        &self,
        _resource_name: &str,
        _spec: &MappingNode,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(Vec::new())
    }

    async fn deploy(&self, input: DeployResourceInput)
        -> Result<DeployResourceOutput, ProviderError>;

    async fn has_stabilised(&self, input: HasStabilisedInput) -> Result<bool, ProviderError>;

    /// The resource's current external state, `None` when it does not exist
    /// outside the engine.
    async fn get_external_state(
        &self,
        input: GetExternalStateInput,
    ) -> Result<Option<MappingNode>, ProviderError>;

    async fn destroy(&self, input: DestroyResourceInput) -> Result<(), ProviderError>;
}

// ─── Data Source Plugin ─────────────────────────────────────────────────────

/// A data source filter with substitutions already resolved.
#[derive(Debug, Clone)]
pub struct ResolvedDataSourceFilter {
    pub field: String,
    pub operator: crate::schema::blueprint::FilterOperator,
    pub search: Vec<ScalarValue>,
}

#[derive(Debug, Clone)]
pub struct DataSourceFetchInput {
    pub data_source_name: String,
    pub filter: ResolvedDataSourceFilter,
}

#[async_trait]
pub trait DataSourcePlugin: Send + Sync {
    fn get_type(&self) -> &str;

    /// Fields the data source supports filtering on.
    fn filterable_fields(&self) -> Vec<String> {
        Vec::new()
    }

    async fn fetch(&self, input: DataSourceFetchInput) -> Result<MappingNode, ProviderError>;
}

// ─── Link Plugin ────────────────────────────────────────────────────────────

/// Which end of a link the plugin treats as authoritative when ordering
/// updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPriorityResource {
    None,
    ResourceA,
    ResourceB,
}

/// A short-lived resource a link plugin materialises while establishing a
/// link. Deployed before the link's stage operation and torn down after.
#[derive(Debug, Clone)]
pub struct IntermediaryResourceDefinition {
    pub name: String,
    pub resource_type: String,
    pub spec: MappingNode,
}

#[derive(Debug, Clone)]
pub struct LinkStageInput {
    pub instance_id: String,
    pub link_name: String,
    pub resource_a_name: String,
    pub resource_b_name: String,
    pub resource_a_spec: Option<MappingNode>,
    pub resource_b_spec: Option<MappingNode>,
}

#[derive(Debug, Clone)]
pub struct LinkStageOutput {
    /// Opaque link data persisted in the link state.
    pub link_data: MappingNode,
}

#[async_trait]
pub trait LinkPlugin: Send + Sync {
    /// The link type, conventionally `"<typeA>::<typeB>"`.
    fn get_type(&self) -> String;

    fn priority_resource(&self) -> LinkPriorityResource {
        LinkPriorityResource::None
    }

    /// Intermediary resources required for this link, if any.
    fn intermediary_resources(&self, _input: &LinkStageInput) -> Vec<IntermediaryResourceDefinition> {
        Vec::new()
    }

    async fn stage(&self, input: LinkStageInput) -> Result<LinkStageOutput, ProviderError>;
}

// ─── Custom Variable Types ──────────────────────────────────────────────────

/// A provider-defined variable type with a finite option set. Every option
/// value must share a single scalar variant.
#[async_trait]
pub trait CustomVariableType: Send + Sync {
    fn get_type(&self) -> &str;

    fn get_description(&self) -> String {
        String::new()
    }

    /// Option label to option value. Labels are what blueprint authors use
    /// as variable values.
    async fn options(&self) -> Result<BTreeMap<String, ScalarValue>, ProviderError>;
}
