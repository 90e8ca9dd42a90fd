/// Ordered resource graph for one module instantiation
use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use super::resource::{embedded_refs, Resource};

/// Errors from building or verifying a plan
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("duplicate logical id: {0}")]
    DuplicateId(String),

    #[error("resource {resource} references unknown logical id {target}")]
    UnknownReference { resource: String, target: String },

    #[error("dependency cycle involving {0}")]
    DependencyCycle(String),

    #[error("parameter {0} has not been published")]
    MissingParameter(String),

    #[error("parameter {0} was already published in this evaluation")]
    DuplicateParameter(String),
}

/// Flat set of resource declarations emitted by one module evaluation.
/// Insertion order is preserved so that identical inputs always serialize
/// to identical plan documents.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub name: String,
    resources: Vec<Resource>,
    #[serde(skip)]
    ids: HashSet<String>,
}

impl Plan {
    /// Create an empty plan
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Add a resource declaration, rejecting duplicate logical ids
    pub fn add(&mut self, resource: Resource) -> Result<(), PlanError> {
        if !self.ids.insert(resource.logical_id.clone()) {
            return Err(PlanError::DuplicateId(resource.logical_id));
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Look up a resource by logical id
    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.logical_id == logical_id)
    }

    /// All declared resources, in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Check that every dependency and every embedded reference token
    /// resolves to a declared resource, and that the dependency graph is
    /// acyclic. Pseudo and late-bound parameter tokens resolve outside the
    /// plan and are exempt.
    pub fn verify(&self) -> Result<(), PlanError> {
        for resource in &self.resources {
            for target in resource
                .depends_on
                .iter()
                .cloned()
                .chain(embedded_refs(&resource.properties))
            {
                if !self.ids.contains(&target) {
                    return Err(PlanError::UnknownReference {
                        resource: resource.logical_id.clone(),
                        target,
                    });
                }
            }
        }
        self.check_acyclic()
    }

    /// Depth-first cycle check over depends_on and embedded references
    fn check_acyclic(&self) -> Result<(), PlanError> {
        let mut edges: HashMap<&str, Vec<String>> = HashMap::new();
        for resource in &self.resources {
            let mut targets = resource.depends_on.clone();
            targets.extend(embedded_refs(&resource.properties));
            edges.insert(resource.logical_id.as_str(), targets);
        }

        // 0 = unvisited, 1 = in progress, 2 = done
        let mut state: HashMap<&str, u8> = HashMap::new();
        for resource in &self.resources {
            visit(resource.logical_id.as_str(), &edges, &mut state)?;
        }
        Ok(())
    }

    /// Serialize the plan deterministically
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn visit<'a>(
    id: &'a str,
    edges: &HashMap<&'a str, Vec<String>>,
    state: &mut HashMap<&'a str, u8>,
) -> Result<(), PlanError> {
    match state.get(id) {
        Some(2) => return Ok(()),
        Some(1) => return Err(PlanError::DependencyCycle(id.to_string())),
        _ => {}
    }
    state.insert(id, 1);
    if let Some(targets) = edges.get(id) {
        for target in targets {
            if let Some((key, _)) = edges.get_key_value(target.as_str()) {
                visit(key, edges, state)?;
            }
        }
    }
    state.insert(id, 2);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::resource::ResourceType;
    use serde_json::json;

    fn vpc() -> Resource {
        Resource::new("dev-vpc", ResourceType::Vpc, json!({"CidrBlock": "10.10.0.0/16"}))
    }

    #[test]
    fn test_duplicate_logical_id_rejected() {
        let mut plan = Plan::new("dev-network");
        plan.add(vpc()).unwrap();
        let err = plan.add(vpc()).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateId(id) if id == "dev-vpc"));
    }

    #[test]
    fn test_verify_resolves_depends_on_and_embedded_refs() {
        let mut plan = Plan::new("dev-network");
        plan.add(vpc()).unwrap();
        plan.add(
            Resource::new(
                "dev-igw-attachment",
                ResourceType::VpcGatewayAttachment,
                json!({"VpcId": "${dev-vpc}", "InternetGatewayId": "${dev-igw}"}),
            )
            .depends_on("dev-vpc"),
        )
        .unwrap();

        let err = plan.verify().unwrap_err();
        assert!(
            matches!(err, PlanError::UnknownReference { ref target, .. } if target == "dev-igw")
        );

        plan.add(Resource::new("dev-igw", ResourceType::InternetGateway, json!({})))
            .unwrap();
        plan.verify().unwrap();
    }

    #[test]
    fn test_verify_rejects_dependency_cycle() {
        let mut plan = Plan::new("cyclic");
        plan.add(
            Resource::new("a", ResourceType::RouteTable, json!({})).depends_on("b"),
        )
        .unwrap();
        plan.add(
            Resource::new("b", ResourceType::RouteTable, json!({})).depends_on("a"),
        )
        .unwrap();
        assert!(matches!(plan.verify(), Err(PlanError::DependencyCycle(_))));
    }

    #[test]
    fn test_pseudo_and_param_tokens_exempt_from_verification() {
        let mut plan = Plan::new("dev-eks");
        plan.add(Resource::new(
            "dev-eks-plane-sg",
            ResourceType::SecurityGroup,
            json!({
                "VpcId": "${param:/network/dev/vpc-id}",
                "Owner": crate::plan::pseudo::ACCOUNT_ID,
            }),
        ))
        .unwrap();
        plan.verify().unwrap();
    }

    #[test]
    fn test_to_json_is_deterministic() {
        let build = || {
            let mut plan = Plan::new("dev-network");
            plan.add(vpc()).unwrap();
            plan.add(Resource::new("dev-igw", ResourceType::InternetGateway, json!({})))
                .unwrap();
            plan.to_json().unwrap()
        };
        assert_eq!(build(), build());
    }
}
