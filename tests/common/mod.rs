#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use strato::provider::schema::{ResourceSpecDefinition, SpecSchema};
use strato::provider::{
    CustomVariableType, DataSourcePlugin, DeployResourceInput, DeployResourceOutput,
    DestroyResourceInput, GetExternalStateInput, HasStabilisedInput, LinkPlugin, Provider,
    ProviderError, ResourcePlugin, RetryPolicy,
};
use strato::schema::mapping::MappingNode;
use strato::schema::scalar::ScalarValue;

/// An ordered log of provider calls shared across plugins, for asserting
/// call ordering across resources.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ─── Scripted Resource Plugin ───────────────────────────────────────────────

/// A resource plugin with scripted failure behaviour.
pub struct ScriptedResource {
    pub type_name: String,
    pub spec_definition: ResourceSpecDefinition,
    /// Number of leading `deploy` calls that fail with a retryable error.
    pub deploy_retryable_failures: AtomicU32,
    /// Fail every deploy terminally when set.
    pub deploy_terminal_message: Option<String>,
    /// Scripted stabilisation probe results, popped per call; when empty
    /// the probe reports stabilised.
    pub stabilise_results: Mutex<VecDeque<Result<bool, ProviderError>>>,
    pub stabilise_calls: AtomicU32,
    /// Artificial latency per deploy call.
    pub deploy_delay: Duration,
    pub external_state: Mutex<Option<MappingNode>>,
    pub log: CallLog,
}

impl ScriptedResource {
    pub fn new(type_name: &str, log: CallLog) -> Self {
        Self {
            type_name: type_name.to_string(),
            spec_definition: ResourceSpecDefinition {
                schema: SpecSchema::map(SpecSchema::string()),
                id_field: Some("id".to_string()),
            },
            deploy_retryable_failures: AtomicU32::new(0),
            deploy_terminal_message: None,
            stabilise_results: Mutex::new(VecDeque::new()),
            stabilise_calls: AtomicU32::new(0),
            deploy_delay: Duration::ZERO,
            external_state: Mutex::new(None),
            log,
        }
    }

    pub fn with_retryable_deploy_failures(self, count: u32) -> Self {
        self.deploy_retryable_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_terminal_deploy_failure(mut self, message: &str) -> Self {
        self.deploy_terminal_message = Some(message.to_string());
        self
    }

    pub fn with_stabilise_script(
        self,
        script: Vec<Result<bool, ProviderError>>,
    ) -> Self {
        *self.stabilise_results.lock().unwrap() = script.into();
        self
    }

    pub fn with_deploy_delay(mut self, delay: Duration) -> Self {
        self.deploy_delay = delay;
        self
    }

    pub fn with_external_state(self, state: MappingNode) -> Self {
        *self.external_state.lock().unwrap() = Some(state);
        self
    }

    pub fn with_spec_definition(mut self, definition: ResourceSpecDefinition) -> Self {
        self.spec_definition = definition;
        self
    }
}

#[async_trait]
impl ResourcePlugin for ScriptedResource {
    fn get_type(&self) -> &str {
        &self.type_name
    }

    fn get_spec_definition(&self) -> ResourceSpecDefinition {
        self.spec_definition.clone()
    }

    async fn deploy(
        &self,
        input: DeployResourceInput,
    ) -> Result<DeployResourceOutput, ProviderError> {
        if !self.deploy_delay.is_zero() {
            tokio::time::sleep(self.deploy_delay).await;
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("deploy:{}", input.resource_name));

        if let Some(message) = &self.deploy_terminal_message {
            return Err(ProviderError::deploy_failed(
                message.clone(),
                vec![message.clone()],
            ));
        }
        let remaining = self.deploy_retryable_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.deploy_retryable_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::retryable("rate limited"));
        }

        Ok(DeployResourceOutput {
            resource_id: format!("arn:test:{}", input.resource_name),
            computed_field_values: BTreeMap::from([(
                "spec.id".to_string(),
                MappingNode::string(format!("arn:test:{}", input.resource_name)),
            )]),
        })
    }

    async fn has_stabilised(&self, input: HasStabilisedInput) -> Result<bool, ProviderError> {
        self.stabilise_calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(format!("has_stabilised:{}", input.resource_name));
        match self.stabilise_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(true),
        }
    }

    async fn get_external_state(
        &self,
        input: GetExternalStateInput,
    ) -> Result<Option<MappingNode>, ProviderError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("get_external_state:{}", input.resource_name));
        Ok(self.external_state.lock().unwrap().clone())
    }

    async fn destroy(&self, input: DestroyResourceInput) -> Result<(), ProviderError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("destroy:{}", input.resource_name));
        Ok(())
    }
}

// ─── Scripted Custom Variable Type ──────────────────────────────────────────

pub struct ScriptedVariableType {
    pub type_name: String,
    pub options: BTreeMap<String, ScalarValue>,
}

#[async_trait]
impl CustomVariableType for ScriptedVariableType {
    fn get_type(&self) -> &str {
        &self.type_name
    }

    async fn options(&self) -> Result<BTreeMap<String, ScalarValue>, ProviderError> {
        Ok(self.options.clone())
    }
}

// ─── Test Provider ──────────────────────────────────────────────────────────

/// An in-process provider assembled from scripted plugins.
pub struct TestProvider {
    pub provider_namespace: String,
    pub resource_plugins: HashMap<String, Arc<dyn ResourcePlugin>>,
    pub data_source_plugins: HashMap<String, Arc<dyn DataSourcePlugin>>,
    pub custom_types: HashMap<String, Arc<dyn CustomVariableType>>,
    pub link_plugins: HashMap<(String, String), Arc<dyn LinkPlugin>>,
    pub policy: RetryPolicy,
}

impl TestProvider {
    pub fn new(namespace: &str) -> Self {
        Self {
            provider_namespace: namespace.to_string(),
            resource_plugins: HashMap::new(),
            data_source_plugins: HashMap::new(),
            custom_types: HashMap::new(),
            link_plugins: HashMap::new(),
            // Fast backoff so retry tests finish quickly.
            policy: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 10,
            },
        }
    }

    pub fn with_resource(mut self, type_name: &str, plugin: Arc<dyn ResourcePlugin>) -> Self {
        self.resource_plugins.insert(type_name.to_string(), plugin);
        self
    }
}

impl Provider for TestProvider {
    fn namespace(&self) -> &str {
        &self.provider_namespace
    }

    fn resource(&self, type_name: &str) -> Option<Arc<dyn ResourcePlugin>> {
        self.resource_plugins.get(type_name).cloned()
    }

    fn link(&self, type_a: &str, type_b: &str) -> Option<Arc<dyn LinkPlugin>> {
        self.link_plugins
            .get(&(type_a.to_string(), type_b.to_string()))
            .cloned()
    }

    fn data_source(&self, type_name: &str) -> Option<Arc<dyn DataSourcePlugin>> {
        self.data_source_plugins.get(type_name).cloned()
    }

    fn custom_variable_type(&self, type_name: &str) -> Option<Arc<dyn CustomVariableType>> {
        self.custom_types.get(type_name).cloned()
    }

    fn function(
        &self,
        _name: &str,
    ) -> Option<Arc<dyn strato::functions::registry::BlueprintFunction>> {
        None
    }

    fn list_resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.resource_plugins.keys().cloned().collect();
        types.sort();
        types
    }

    fn list_link_types(&self) -> Vec<String> {
        Vec::new()
    }

    fn list_data_source_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.data_source_plugins.keys().cloned().collect();
        types.sort();
        types
    }

    fn list_custom_variable_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.custom_types.keys().cloned().collect();
        types.sort();
        types
    }

    fn list_functions(&self) -> Vec<String> {
        Vec::new()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}
