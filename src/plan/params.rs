/// Naming/value store for cross-module configuration exchange.
///
/// Producing modules publish resource identifiers under
/// `/<domain>/<env>/<attribute>` keys; dependent modules read them back as
/// late-bound `${param:...}` tokens so the two plans never hold direct
/// references into each other and stay independently deployable.
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use super::graph::{Plan, PlanError};
use super::resource::{Resource, ResourceType};

/// In-evaluation view of the external key-value parameter service
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParamStore {
    entries: BTreeMap<String, String>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a value under a key. Keys are write-once per evaluation;
    /// overwrite only happens across redeployments.
    pub fn publish(&mut self, key: &str, value: impl Into<String>) -> Result<(), PlanError> {
        if self.entries.contains_key(key) {
            return Err(PlanError::DuplicateParameter(key.to_string()));
        }
        self.entries.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Raw published value for a key
    pub fn get(&self, key: &str) -> Result<&str, PlanError> {
        self.entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| PlanError::MissingParameter(key.to_string()))
    }

    /// Comma-joined list value, split back into elements
    pub fn get_list(&self, key: &str) -> Result<Vec<String>, PlanError> {
        Ok(self.get(key)?.split(',').map(str::to_string).collect())
    }

    /// Late-bound reference to a key, resolved by the provisioning engine
    /// against the parameter service at apply time
    pub fn late_bound(&self, key: &str) -> Result<String, PlanError> {
        self.get(key)?;
        Ok(format!("${{param:{}}}", key))
    }

    /// Late-bound references to the elements of a comma-joined list value.
    /// The element count is fixed at evaluation time; the ids themselves
    /// resolve at apply time.
    pub fn late_bound_list(&self, key: &str) -> Result<Vec<String>, PlanError> {
        let count = self.get_list(key)?.len();
        Ok((0..count)
            .map(|i| format!("${{param:{}[{}]}}", key, i))
            .collect())
    }

    /// All published entries, in key order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Publish a value to the store and declare the matching string-parameter
/// resource in the plan so the external parameter service gets written on
/// apply.
pub fn publish_string_parameter(
    plan: &mut Plan,
    store: &mut ParamStore,
    logical_id: &str,
    key: &str,
    value: &str,
) -> Result<(), PlanError> {
    store.publish(key, value)?;
    plan.add(Resource::new(
        logical_id,
        ResourceType::StringParameter,
        json!({
            "Name": key,
            "Type": "String",
            "Value": value,
        }),
    ))
}
