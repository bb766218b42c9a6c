// ABOUTME: Test support utilities.
// ABOUTME: Provides mock engine, catalog, and notifier doubles for integration tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use nonempty::NonEmpty;
use parking_lot::Mutex;

use flotilla::services::{
    CatalogError, ContainerEngine, ContainerResult, EngineError, Notification, NotifyError,
    ProductCatalog, ProductDefinition, ProgressEvent, ProgressNotifier, StackManifest,
};
use flotilla::types::{EnvironmentId, ProductGroupId, ProductId, StackId, StackName};
use flotilla::vars::{StackTemplate, VariableSpec};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("flotilla=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[allow(dead_code)]
pub fn name(s: &str) -> StackName {
    StackName::new(s).unwrap()
}

#[allow(dead_code)]
pub fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Scriptable container engine double. Records deploy order and fails the
/// stacks it is told to fail.
#[derive(Default)]
pub struct MockEngine {
    /// Stack name -> failure reason reported via container results.
    soft_failures: Mutex<HashMap<String, String>>,
    /// Stack name -> error message raised as an engine error.
    hard_failures: Mutex<HashMap<String, String>>,
    /// Stack names in the order deploy_stack was called.
    pub deploys: Mutex<Vec<String>>,
    /// Stack names torn down.
    pub teardowns: Mutex<Vec<String>>,
    /// Start/stop calls, recorded as "start:<name>" / "stop:<name>".
    pub lifecycle: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make a stack's containers report failure.
    pub fn fail_stack(&self, stack: &str, reason: &str) {
        self.soft_failures
            .lock()
            .insert(stack.to_string(), reason.to_string());
    }

    /// Make the engine itself error for a stack.
    pub fn break_stack(&self, stack: &str, reason: &str) {
        self.hard_failures
            .lock()
            .insert(stack.to_string(), reason.to_string());
    }

    /// Clear any scripted failures for a stack.
    pub fn heal_stack(&self, stack: &str) {
        self.soft_failures.lock().remove(stack);
        self.hard_failures.lock().remove(stack);
    }

    pub fn deploy_order(&self) -> Vec<String> {
        self.deploys.lock().clone()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn deploy_stack(
        &self,
        _environment: &EnvironmentId,
        stack: &StackName,
        _rendered_content: &str,
        _variables: &BTreeMap<String, String>,
    ) -> Result<Vec<ContainerResult>, EngineError> {
        self.deploys.lock().push(stack.to_string());

        if let Some(reason) = self.hard_failures.lock().get(stack.as_str()) {
            return Err(EngineError::Operation(reason.clone()));
        }

        if let Some(reason) = self.soft_failures.lock().get(stack.as_str()) {
            return Ok(vec![
                ContainerResult::started("app"),
                ContainerResult::failed("db", reason),
            ]);
        }

        Ok(vec![
            ContainerResult::started("app"),
            ContainerResult::started("db"),
        ])
    }

    async fn stop_stack(
        &self,
        _environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<Vec<ContainerResult>, EngineError> {
        self.lifecycle.lock().push(format!("stop:{stack}"));
        Ok(vec![])
    }

    async fn start_stack(
        &self,
        _environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<Vec<ContainerResult>, EngineError> {
        self.lifecycle.lock().push(format!("start:{stack}"));
        Ok(vec![ContainerResult::started("app")])
    }

    async fn teardown_stack(
        &self,
        _environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<(), EngineError> {
        self.teardowns.lock().push(stack.to_string());
        Ok(())
    }
}

/// In-memory catalog double holding product definitions and stack templates.
#[derive(Default)]
pub struct MockCatalog {
    products: Mutex<Vec<ProductDefinition>>,
    /// (stack id, version) -> template.
    stack_templates: Mutex<HashMap<(String, String), StackTemplate>>,
    stack_versions: Mutex<HashMap<String, Vec<String>>>,
}

#[allow(dead_code)]
impl MockCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_product(&self, product: ProductDefinition) {
        for stack in product.stacks.iter() {
            self.stack_templates.lock().insert(
                (stack.stack_id.to_string(), stack.version.clone()),
                stack.template.clone(),
            );
        }
        self.products.lock().push(product);
    }

    pub fn add_stack_template(&self, stack_id: &StackId, version: &str, template: StackTemplate) {
        self.stack_templates
            .lock()
            .insert((stack_id.to_string(), version.to_string()), template);
    }

    pub fn set_stack_versions(&self, stack_id: &StackId, versions: &[&str]) {
        self.stack_versions.lock().insert(
            stack_id.to_string(),
            versions.iter().map(|v| v.to_string()).collect(),
        );
    }
}

#[async_trait]
impl ProductCatalog for MockCatalog {
    async fn product_by_id(
        &self,
        id: &ProductId,
    ) -> Result<Option<ProductDefinition>, CatalogError> {
        Ok(self.products.lock().iter().find(|p| &p.id == id).cloned())
    }

    async fn product_for_group(
        &self,
        group: &ProductGroupId,
        version: &str,
    ) -> Result<Option<ProductDefinition>, CatalogError> {
        Ok(self
            .products
            .lock()
            .iter()
            .find(|p| &p.group_id == group && p.version == version)
            .cloned())
    }

    async fn upgrade_versions(
        &self,
        group: &ProductGroupId,
        above: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let above = flotilla::types::parse_semver(above);
        Ok(self
            .products
            .lock()
            .iter()
            .filter(|p| &p.group_id == group)
            .map(|p| p.version.clone())
            .filter(|v| match (above, flotilla::types::parse_semver(v)) {
                (Some(a), Some(b)) => b > a,
                _ => true,
            })
            .collect())
    }

    async fn stack_template(
        &self,
        stack_id: &StackId,
        version: &str,
    ) -> Result<Option<StackTemplate>, CatalogError> {
        Ok(self
            .stack_templates
            .lock()
            .get(&(stack_id.to_string(), version.to_string()))
            .cloned())
    }

    async fn stack_versions(
        &self,
        stack_id: &StackId,
        _above: &str,
    ) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .stack_versions
            .lock()
            .get(&stack_id.to_string())
            .cloned()
            .unwrap_or_default())
    }
}

/// Notifier double that records everything and optionally fails deliveries.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<ProgressEvent>>,
    pub notes: Mutex<Vec<Notification>>,
    pub failing: Mutex<bool>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl ProgressNotifier for RecordingNotifier {
    async fn deployment_progress(&self, event: &ProgressEvent) -> Result<(), NotifyError> {
        if *self.failing.lock() {
            return Err(NotifyError::Delivery("hub unreachable".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn publish(&self, note: &Notification) -> Result<(), NotifyError> {
        if *self.failing.lock() {
            return Err(NotifyError::Delivery("store unreachable".to_string()));
        }
        self.notes.lock().push(note.clone());
        Ok(())
    }
}

/// Build a stack manifest with a small template using `DB_HOST` and `PORT`.
#[allow(dead_code)]
pub fn stack_manifest(stack: &str, version: &str) -> StackManifest {
    StackManifest {
        name: name(stack),
        display_name: stack.to_uppercase(),
        stack_id: StackId::new(format!("stack-{stack}")),
        version: version.to_string(),
        template: StackTemplate::new(
            "services:\n  app:\n    environment:\n      DB_HOST: ${DB_HOST}\n      PORT: ${PORT:-8080}\n",
            vec![VariableSpec::plain("DB_HOST").with_default("localhost")],
        ),
    }
}

/// Build a product definition from stack names, all at the given version.
#[allow(dead_code)]
pub fn product_definition(
    id: &str,
    group: &str,
    version: &str,
    stacks: &[&str],
) -> ProductDefinition {
    let mut iter = stacks.iter();
    let first = stack_manifest(iter.next().expect("at least one stack"), version);
    let mut list = NonEmpty::new(first);
    for stack in iter {
        list.push(stack_manifest(stack, version));
    }
    ProductDefinition {
        id: ProductId::new(id),
        group_id: ProductGroupId::new(group),
        name: format!("{group} suite"),
        version: version.to_string(),
        stacks: list,
    }
}
