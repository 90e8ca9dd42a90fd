/// Configuration management for Strata deployments
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::network::cidr::{partition, CidrBlock};

/// Control-plane version used when an environment does not pin one
pub const DEFAULT_EKS_VERSION: &str = "1.34";

/// Top-level deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Deployment region, fixed at assembly time
    pub region: String,

    /// Relative path to the load-balancer controller IAM policy document
    #[serde(default = "default_alb_policy_path")]
    pub alb_policy_path: PathBuf,

    /// Environment table: name -> sizing parameters
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// Sizing and feature parameters for one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Address block for the environment's isolated network (e.g. "10.10.0.0/16")
    pub vpc_cidr: String,

    /// Number of availability zones to span
    pub max_azs: usize,

    /// Requested NAT gateway count. The topology always creates one NAT per
    /// private subnet; a differing value only produces a warning.
    pub nat_gateways: usize,

    /// Cluster version (defaults to DEFAULT_EKS_VERSION)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eks_version: Option<String>,

    /// Worker node image selection rule
    #[serde(default)]
    pub node_image_policy: NodeImagePolicy,

    /// Register the cluster's token issuer as a federated identity provider
    #[serde(default = "default_true")]
    pub oidc_provider: bool,

    /// Provision the load-balancer controller IRSA role (requires oidc_provider)
    #[serde(default = "default_true")]
    pub alb_controller: bool,

    /// Pod identity associations to declare on the cluster
    #[serde(default)]
    pub pod_identities: Vec<PodIdentityConfig>,
}

impl EnvironmentConfig {
    /// Effective cluster version
    pub fn eks_version(&self) -> &str {
        self.eks_version.as_deref().unwrap_or(DEFAULT_EKS_VERSION)
    }
}

/// Service-account to IAM-role association for pod identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodIdentityConfig {
    /// Short purpose slug, part of the association's logical id
    pub purpose: String,
    pub namespace: String,
    pub service_account: String,
    pub role_arn: String,
}

/// Version-conditional node image selection. The threshold and the families
/// on either side drifted across revisions of the source deployment, so the
/// rule is configuration rather than hard law.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeImagePolicy {
    pub version_threshold: String,
    pub at_or_above: String,
    pub below: String,
}

impl Default for NodeImagePolicy {
    fn default() -> Self {
        Self {
            version_threshold: "1.33".to_string(),
            at_or_above: "AL2023_x86_64_STANDARD".to_string(),
            below: "AL2_x86_64".to_string(),
        }
    }
}

impl NodeImagePolicy {
    /// Pick the node image family for a cluster version. Comparison is
    /// numeric on major.minor: 1.9 sorts below 1.33.
    pub fn ami_type(&self, cluster_version: &str) -> Result<&str> {
        let requested = parse_version(cluster_version)?;
        let threshold = parse_version(&self.version_threshold)?;
        if requested >= threshold {
            Ok(&self.at_or_above)
        } else {
            Ok(&self.below)
        }
    }
}

/// Parse a "major.minor" version string into a comparable pair
pub fn parse_version(version: &str) -> Result<(u32, u32)> {
    let (major, minor) = version
        .split_once('.')
        .with_context(|| format!("invalid version: {}", version))?;
    Ok((
        major
            .parse()
            .with_context(|| format!("invalid version: {}", version))?,
        minor
            .parse()
            .with_context(|| format!("invalid version: {}", version))?,
    ))
}

fn default_true() -> bool {
    true
}

fn default_alb_policy_path() -> PathBuf {
    PathBuf::from("policies/alb-iam-policy.json")
}

impl DeployConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!("failed to read configuration: {}", path.as_ref().display())
        })?;
        let config: DeployConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// The static environment table used when no file is given
    pub fn builtin() -> Self {
        let email_identity = PodIdentityConfig {
            purpose: "email-service".to_string(),
            namespace: "default".to_string(),
            service_account: "email-service-sa".to_string(),
            role_arn: "arn:aws:iam::792248914698:role/EmailServicePodRole".to_string(),
        };

        let environment = |vpc_cidr: &str, nat_gateways: usize| EnvironmentConfig {
            vpc_cidr: vpc_cidr.to_string(),
            max_azs: 2,
            nat_gateways,
            eks_version: None,
            node_image_policy: NodeImagePolicy::default(),
            oidc_provider: true,
            alb_controller: true,
            pod_identities: vec![email_identity.clone()],
        };

        Self {
            region: "ap-northeast-1".to_string(),
            alb_policy_path: default_alb_policy_path(),
            environments: BTreeMap::from([
                ("dev".to_string(), environment("10.10.0.0/16", 1)),
                ("qa".to_string(), environment("10.20.0.0/16", 1)),
                ("prod".to_string(), environment("10.30.0.0/16", 2)),
            ]),
        }
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self::builtin()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.region.is_empty() {
            bail!("region cannot be empty");
        }
        if self.environments.is_empty() {
            bail!("at least one environment is required");
        }

        for (name, env) in &self.environments {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                bail!("invalid environment name: {:?}", name);
            }

            let block: CidrBlock = env
                .vpc_cidr
                .parse()
                .with_context(|| format!("environment {}: invalid vpc_cidr", name))?;
            partition(&block, env.max_azs)
                .with_context(|| format!("environment {}: subnet layout", name))?;

            if env.nat_gateways != env.max_azs {
                warn!(
                    "environment {}: nat_gateways is {} but one NAT per private subnet is created ({})",
                    name, env.nat_gateways, env.max_azs
                );
            }

            parse_version(env.eks_version())
                .with_context(|| format!("environment {}: invalid eks_version", name))?;
            env.node_image_policy
                .ami_type(env.eks_version())
                .with_context(|| format!("environment {}: node_image_policy", name))?;

            if env.alb_controller && !env.oidc_provider {
                bail!(
                    "environment {}: alb_controller requires oidc_provider",
                    name
                );
            }

            for identity in &env.pod_identities {
                if identity.purpose.is_empty()
                    || identity.namespace.is_empty()
                    || identity.service_account.is_empty()
                    || identity.role_arn.is_empty()
                {
                    bail!("environment {}: incomplete pod identity entry", name);
                }
            }
        }

        Ok(())
    }
}
