/// Stack assembly: instantiate the network and cluster modules per
/// environment, in network-then-cluster order, with cross-module values
/// flowing through the naming/value store so the two plans remain
/// independently deployable units.
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{DeployConfig, EnvironmentConfig};
use crate::eks::EksPlanner;
use crate::network::NetworkPlanner;
use crate::plan::{ParamStore, Plan};

/// The synthesized plans for one environment
pub struct EnvironmentPlans {
    pub env_name: String,
    pub network: Plan,
    pub cluster: Plan,
    pub store: ParamStore,
}

/// Evaluate both modules for one environment
pub fn synthesize_environment(
    env_name: &str,
    config: &EnvironmentConfig,
    region: &str,
    alb_policy_path: &Path,
) -> Result<EnvironmentPlans> {
    let mut store = ParamStore::new();

    let mut network = Plan::new(format!("{}-network", env_name));
    NetworkPlanner::new(env_name, config)
        .synthesize(&mut network, &mut store)
        .with_context(|| format!("environment {}: network module", env_name))?;
    network
        .verify()
        .with_context(|| format!("environment {}: network plan", env_name))?;

    // The cluster module reads the network's outputs back through the
    // store as late-bound references, never as direct resource handles
    let vpc_id = store.late_bound(&format!("/network/{}/vpc-id", env_name))?;
    let private_subnet_ids =
        store.late_bound_list(&format!("/network/{}/private-subnet-ids", env_name))?;

    let mut cluster = Plan::new(format!("{}-eks", env_name));
    EksPlanner::new(env_name, config, region, alb_policy_path)
        .synthesize(&vpc_id, &private_subnet_ids, &mut cluster, &mut store)
        .with_context(|| format!("environment {}: cluster module", env_name))?;
    cluster
        .verify()
        .with_context(|| format!("environment {}: cluster plan", env_name))?;

    info!(
        "Environment {} synthesized: {} network resources, {} cluster resources",
        env_name,
        network.len(),
        cluster.len()
    );

    Ok(EnvironmentPlans {
        env_name: env_name.to_string(),
        network,
        cluster,
        store,
    })
}

/// Evaluate every environment in the configuration table
pub fn synthesize_all(config: &DeployConfig) -> Result<Vec<EnvironmentPlans>> {
    config
        .environments
        .iter()
        .map(|(name, env)| {
            synthesize_environment(name, env, &config.region, &config.alb_policy_path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ResourceType;
    use pretty_assertions::assert_eq;

    /// Builtin config pointed at a temporary controller policy document
    fn test_config(dir: &Path) -> DeployConfig {
        let policy_path = dir.join("alb-iam-policy.json");
        std::fs::write(
            &policy_path,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": ["ec2:DescribeSubnets"], "Resource": "*"}]}"#,
        )
        .unwrap();

        let mut config = DeployConfig::builtin();
        config.alb_policy_path = policy_path;
        config
    }

    #[test]
    fn test_environment_plans_verify_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let plans = synthesize_all(&config).unwrap();
        assert_eq!(plans.len(), 3);
        for env in &plans {
            env.network.verify().unwrap();
            env.cluster.verify().unwrap();
            assert!(!env.network.is_empty());
            assert!(!env.cluster.is_empty());
        }
    }

    #[test]
    fn test_cluster_reads_network_outputs_late_bound() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let plans = synthesize_environment(
            "dev",
            &config.environments["dev"],
            &config.region,
            &config.alb_policy_path,
        )
        .unwrap();

        // The cluster plan never embeds the network plan's resource tokens
        let node_group = plans.cluster.get("dev-eks-node-group").unwrap();
        assert_eq!(
            node_group.properties["Subnets"],
            serde_json::json!([
                "${param:/network/dev/private-subnet-ids[0]}",
                "${param:/network/dev/private-subnet-ids[1]}",
            ])
        );

        let plane_sg = plans.cluster.get("dev-eks-plane-sg").unwrap();
        assert_eq!(
            plane_sg.properties["VpcId"],
            "${param:/network/dev/vpc-id}"
        );
    }

    #[test]
    fn test_store_holds_every_published_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let plans = synthesize_environment(
            "qa",
            &config.environments["qa"],
            &config.region,
            &config.alb_policy_path,
        )
        .unwrap();

        let keys: Vec<&str> = plans.store.entries().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "/alb/qa/alb-controller-role-arn",
                "/network/qa/private-subnet-ids",
                "/network/qa/public-subnet-ids",
                "/network/qa/vpc-id",
                "/oidc/qa/oidc-arn",
                "/oidc/qa/oidc-url",
            ]
        );
    }

    #[test]
    fn test_reevaluation_produces_identical_plans() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let run = || {
            let plans = synthesize_environment(
                "prod",
                &config.environments["prod"],
                &config.region,
                &config.alb_policy_path,
            )
            .unwrap();
            (
                plans.network.to_json().unwrap(),
                plans.cluster.to_json().unwrap(),
            )
        };

        let (network_a, cluster_a) = run();
        let (network_b, cluster_b) = run();
        assert_eq!(network_a, network_b);
        assert_eq!(cluster_a, cluster_b);
    }

    #[test]
    fn test_federation_resources_present_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let plans = synthesize_environment(
            "dev",
            &config.environments["dev"],
            &config.region,
            &config.alb_policy_path,
        )
        .unwrap();

        let types: Vec<ResourceType> = plans
            .cluster
            .resources()
            .iter()
            .map(|r| r.resource_type)
            .collect();
        assert!(types.contains(&ResourceType::ApiCallLookup));
        assert!(types.contains(&ResourceType::OidcProvider));
        assert!(types.contains(&ResourceType::ManagedPolicy));
    }
}
