//! In-process registry of workflow definitions keyed by id and version.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::definition::{WorkflowDefinition, WorkflowError};

#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: DashMap<String, BTreeMap<u32, Arc<WorkflowDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Each `(id, version)` pair may be registered once.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<(), WorkflowError> {
        if definition.steps().is_empty() {
            return Err(WorkflowError::EmptyDefinition(definition.id));
        }

        let mut versions = self.definitions.entry(definition.id.clone()).or_default();
        if versions.contains_key(&definition.version) {
            return Err(WorkflowError::DuplicateDefinition {
                id: definition.id,
                version: definition.version,
            });
        }

        tracing::debug!(
            definition_id = %definition.id,
            version = definition.version,
            steps = definition.steps().len(),
            "workflow definition registered"
        );
        versions.insert(definition.version, Arc::new(definition));
        Ok(())
    }

    /// Look up a definition. `None` for the version means the latest one.
    pub fn get(&self, id: &str, version: Option<u32>) -> Option<Arc<WorkflowDefinition>> {
        let versions = self.definitions.get(id)?;
        match version {
            Some(v) => versions.get(&v).cloned(),
            None => versions.last_key_value().map(|(_, def)| Arc::clone(def)),
        }
    }

    /// Like `get`, but a miss is an error.
    pub fn resolve(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.get(id, version)
            .ok_or_else(|| WorkflowError::DefinitionNotFound {
                id: id.to_string(),
                version: version.map_or_else(|| "latest".to_string(), |v| v.to_string()),
            })
    }

    pub fn is_registered(&self, id: &str, version: u32) -> bool {
        self.get(id, Some(version)).is_some()
    }
}
