/// Cluster module: security boundaries, IAM trust roles, the managed
/// cluster, the worker node pool, platform add-ons, access delegation,
/// and optional identity federation.
pub mod alb;
pub mod oidc;

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::config::EnvironmentConfig;
use crate::plan::{
    attribute, pseudo, reference, ParamStore, Plan, Resource, ResourceType, Tag,
};
use alb::AlbControllerPlanner;
use oidc::OidcProviderPlanner;

/// Port the control plane uses to reach worker nodes
const PLANE_TO_NODE_PORT: u16 = 443;

/// Worker pool scaling bounds are fixed by policy
const NODE_MIN_SIZE: u32 = 2;
const NODE_DESIRED_SIZE: u32 = 2;
const NODE_MAX_SIZE: u32 = 3;
const NODE_INSTANCE_TYPE: &str = "t3.medium";
const NODE_DISK_SIZE_GIB: u32 = 20;

/// Planner producing a managed cluster with supporting identity and
/// networking for one environment
pub struct EksPlanner<'a> {
    env_name: &'a str,
    config: &'a EnvironmentConfig,
    region: &'a str,
    alb_policy_path: &'a Path,
}

/// Identifiers other planners need after cluster synthesis
pub struct EksOutputs {
    pub cluster_logical_id: String,
    pub cluster_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ScalingConfig {
    min_size: u32,
    desired_size: u32,
    max_size: u32,
}

impl<'a> EksPlanner<'a> {
    pub fn new(
        env_name: &'a str,
        config: &'a EnvironmentConfig,
        region: &'a str,
        alb_policy_path: &'a Path,
    ) -> Self {
        Self {
            env_name,
            config,
            region,
            alb_policy_path,
        }
    }

    /// Evaluate the module. `vpc_id` and `private_subnet_ids` come from the
    /// naming/value store, never as direct references into the network plan.
    pub fn synthesize(
        &self,
        vpc_id: &str,
        private_subnet_ids: &[String],
        plan: &mut Plan,
        store: &mut ParamStore,
    ) -> Result<EksOutputs> {
        let env = self.env_name;
        let version = self.config.eks_version();

        info!(
            "Planning EKS cluster for {}: version {}, {} private subnets",
            env,
            version,
            private_subnet_ids.len()
        );

        // Security boundaries for the control plane and the workers
        let plane_sg_id = format!("{}-eks-plane-sg", env);
        let node_sg_id = format!("{}-eks-node-sg", env);
        for (sg_id, description) in [
            (&plane_sg_id, format!("{} Eks Plane Security Group", env)),
            (&node_sg_id, format!("{} Eks Node Security Group", env)),
        ] {
            plan.add(Resource::new(
                sg_id,
                ResourceType::SecurityGroup,
                serde_json::json!({
                    "GroupName": sg_id,
                    "GroupDescription": description,
                    "VpcId": vpc_id,
                    "Tags": Tag::name(sg_id),
                }),
            ))?;
        }

        // Workers accept inbound only from the control plane on the
        // plane-to-node port
        plan.add(Resource::new(
            format!("{}-node-ingress-from-plane", env),
            ResourceType::SecurityGroupIngress,
            serde_json::json!({
                "GroupId": reference(&node_sg_id),
                "SourceSecurityGroupId": reference(&plane_sg_id),
                "IpProtocol": "tcp",
                "FromPort": PLANE_TO_NODE_PORT,
                "ToPort": PLANE_TO_NODE_PORT,
                "Description": "Allow control plane to node traffic",
            }),
        ))?;
        // Self-referential rule permitting plane-to-node in both directions
        plan.add(Resource::new(
            format!("{}-plane-ingress-self", env),
            ResourceType::SecurityGroupIngress,
            serde_json::json!({
                "GroupId": reference(&plane_sg_id),
                "SourceSecurityGroupId": reference(&plane_sg_id),
                "IpProtocol": "-1",
                "Description": "Allow all traffic within the control plane boundary",
            }),
        ))?;

        // Trust roles for the cluster service and the compute service
        let eks_role_id = format!("{}-eks-role", env);
        plan.add(Resource::new(
            &eks_role_id,
            ResourceType::IamRole,
            serde_json::json!({
                "RoleName": eks_role_id,
                "AssumeRolePolicyDocument": assume_role_document("eks.amazonaws.com"),
                "ManagedPolicyArns": [
                    "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy",
                    "arn:aws:iam::aws:policy/AmazonEKSServicePolicy",
                ],
                "Tags": Tag::name(&eks_role_id),
            }),
        ))?;

        let node_role_id = format!("{}-eks-node-role", env);
        plan.add(Resource::new(
            &node_role_id,
            ResourceType::IamRole,
            serde_json::json!({
                "RoleName": node_role_id,
                "AssumeRolePolicyDocument": assume_role_document("ec2.amazonaws.com"),
                "ManagedPolicyArns": [
                    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
                    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
                    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
                ],
                "Tags": Tag::name(&node_role_id),
            }),
        ))?;

        // The managed cluster: private-only control-plane endpoint
        let cluster_id = format!("{}-eks-cluster", env);
        let cluster_name = cluster_id.clone();
        plan.add(Resource::new(
            &cluster_id,
            ResourceType::EksCluster,
            serde_json::json!({
                "Name": cluster_name,
                "RoleArn": attribute(&eks_role_id, "Arn"),
                "Version": version,
                "AccessConfig": {
                    "AuthenticationMode": "API_AND_CONFIG_MAP",
                    "BootstrapClusterCreatorAdminPermissions": true,
                },
                "ResourcesVpcConfig": {
                    "SubnetIds": private_subnet_ids,
                    "SecurityGroupIds": [reference(&plane_sg_id)],
                    "EndpointPrivateAccess": true,
                    "EndpointPublicAccess": false,
                },
                "Tags": Tag::name(&cluster_id),
            }),
        ))?;

        // Worker node pool. The engine does not infer ordering for
        // nodegroups, so the cluster dependency is explicit.
        let ami_type = self.config.node_image_policy.ami_type(version)?;
        let node_group_id = format!("{}-eks-node-group", env);
        plan.add(
            Resource::new(
                &node_group_id,
                ResourceType::EksNodegroup,
                serde_json::json!({
                    "NodegroupName": node_group_id,
                    "ClusterName": reference(&cluster_id),
                    "Version": version,
                    "NodeRole": attribute(&node_role_id, "Arn"),
                    "Subnets": private_subnet_ids,
                    "ScalingConfig": serde_json::to_value(ScalingConfig {
                        min_size: NODE_MIN_SIZE,
                        desired_size: NODE_DESIRED_SIZE,
                        max_size: NODE_MAX_SIZE,
                    })?,
                    "InstanceTypes": [NODE_INSTANCE_TYPE],
                    "AmiType": ami_type,
                    "DiskSize": NODE_DISK_SIZE_GIB,
                    "Tags": { "Environment": env },
                }),
            )
            .depends_on(&cluster_id),
        )?;

        // Access delegation for operators
        let devops_role_id = format!("{}-devops-role", env);
        plan.add(Resource::new(
            &devops_role_id,
            ResourceType::IamRole,
            serde_json::json!({
                "RoleName": devops_role_id,
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "AWS": pseudo::ACCOUNT_ID },
                        "Action": "sts:AssumeRole",
                    }],
                },
                "ManagedPolicyArns": [
                    "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy",
                    "arn:aws:iam::aws:policy/AmazonEKSServicePolicy",
                    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
                ],
                "Description": "Allows operators to access the EKS cluster via an access entry",
            }),
        ))?;
        plan.add(
            Resource::new(
                format!("{}-devops-access-entry", env),
                ResourceType::EksAccessEntry,
                serde_json::json!({
                    "ClusterName": reference(&cluster_id),
                    "PrincipalArn": attribute(&devops_role_id, "Arn"),
                    "Type": "STANDARD",
                }),
            )
            .depends_on(&cluster_id),
        )?;

        // Pod identity associations; ids derive from environment, purpose
        // and service account so unrelated associations cannot collide
        for identity in &self.config.pod_identities {
            plan.add(
                Resource::new(
                    format!(
                        "{}-pod-identity-{}-{}",
                        env, identity.purpose, identity.service_account
                    ),
                    ResourceType::PodIdentityAssociation,
                    serde_json::json!({
                        "ClusterName": reference(&cluster_id),
                        "RoleArn": identity.role_arn,
                        "Namespace": identity.namespace,
                        "ServiceAccount": identity.service_account,
                    }),
                )
                .depends_on(&cluster_id),
            )?;
        }

        // Baseline platform add-ons
        self.add_addon(plan, &cluster_id, "vpc-cni", Some("v1.20.4-eksbuild.2"))?;
        self.add_addon(plan, &cluster_id, "coredns", Some("v1.11.4-eksbuild.24"))?;
        self.add_addon(plan, &cluster_id, "kube-proxy", Some("v1.32.6-eksbuild.12"))?;
        self.add_addon(plan, &cluster_id, "aws-ebs-csi-driver", None)?;
        self.add_addon(plan, &cluster_id, "eks-pod-identity-agent", None)?;

        if self.config.oidc_provider {
            let oidc =
                OidcProviderPlanner::new(env, &cluster_id, &cluster_name, self.region);
            oidc.synthesize(plan, store)?;

            if self.config.alb_controller {
                let alb = AlbControllerPlanner::new(
                    env,
                    &cluster_name,
                    "kube-system",
                    self.alb_policy_path,
                );
                alb.synthesize(plan, store)?;
            }
        }

        info!("EKS cluster for {} planned: {} resources", env, plan.len());

        Ok(EksOutputs {
            cluster_logical_id: cluster_id,
            cluster_name,
        })
    }

    /// Declare one add-on, pinned or set to overwrite conflicting
    /// configuration, always ordered after the cluster
    fn add_addon(
        &self,
        plan: &mut Plan,
        cluster_id: &str,
        addon_name: &str,
        addon_version: Option<&str>,
    ) -> Result<()> {
        let logical_id = match addon_name {
            "coredns" => format!("{}-core-dns-addon", self.env_name),
            other => format!("{}-{}-addon", self.env_name, short_addon_slug(other)),
        };

        let mut properties = serde_json::json!({
            "AddonName": addon_name,
            "ClusterName": reference(cluster_id),
            "ResolveConflicts": "OVERWRITE",
        });
        if let Some(version) = addon_version {
            properties["AddonVersion"] = serde_json::json!(version);
        }

        plan.add(
            Resource::new(logical_id, ResourceType::EksAddon, properties)
                .depends_on(cluster_id),
        )?;
        Ok(())
    }
}

fn short_addon_slug(addon_name: &str) -> &str {
    match addon_name {
        "aws-ebs-csi-driver" => "ebs-csi",
        "eks-pod-identity-agent" => "pod-identity",
        other => other,
    }
}

fn assume_role_document(service: &str) -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
}
