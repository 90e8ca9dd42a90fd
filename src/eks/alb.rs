/// Load-balancer controller IAM: a managed policy loaded from an external
/// policy document and an IRSA role bound to the controller's service
/// account through the cluster's federated identity provider.
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::plan::{attribute, publish_string_parameter, reference, ParamStore, Plan, Resource, ResourceType};

const SERVICE_ACCOUNT: &str = "aws-load-balancer-controller";

const POLICY_DOWNLOAD_URL: &str =
    "https://raw.githubusercontent.com/kubernetes-sigs/aws-load-balancer-controller/main/docs/install/iam_policy.json";

pub struct AlbControllerPlanner<'a> {
    env_name: &'a str,
    cluster_name: &'a str,
    namespace: &'a str,
    policy_path: &'a Path,
}

impl<'a> AlbControllerPlanner<'a> {
    pub fn new(
        env_name: &'a str,
        cluster_name: &'a str,
        namespace: &'a str,
        policy_path: &'a Path,
    ) -> Self {
        Self {
            env_name,
            cluster_name,
            namespace,
            policy_path,
        }
    }

    /// Read the controller policy document. A missing file is a
    /// configuration error surfaced before any resource is declared.
    fn load_policy_document(&self) -> Result<serde_json::Value> {
        if !self.policy_path.exists() {
            bail!(
                "missing {}. Please download from {}",
                self.policy_path.display(),
                POLICY_DOWNLOAD_URL
            );
        }
        let content = std::fs::read_to_string(self.policy_path).with_context(|| {
            format!("failed to read policy document {}", self.policy_path.display())
        })?;
        serde_json::from_str(&content).with_context(|| {
            format!("invalid policy document {}", self.policy_path.display())
        })
    }

    pub fn synthesize(&self, plan: &mut Plan, store: &mut ParamStore) -> Result<()> {
        let env = self.env_name;
        let policy_document = self.load_policy_document()?;

        info!(
            "Planning load-balancer controller role for {} from {}",
            env,
            self.policy_path.display()
        );

        // Issuer and provider published by the federation sub-module
        let issuer_url = store.get(&format!("/oidc/{}/oidc-url", env))?.to_string();
        let provider_arn = store.get(&format!("/oidc/{}/oidc-arn", env))?.to_string();

        let policy_id = format!("{}-alb-controller-policy", env);
        plan.add(Resource::new(
            &policy_id,
            ResourceType::ManagedPolicy,
            serde_json::json!({
                "ManagedPolicyName": format!(
                    "{}-AmazonEKSLoadBalancerControllerPolicy",
                    self.cluster_name
                ),
                "PolicyDocument": policy_document,
            }),
        ))?;

        // The engine resolves the issuer token to its bare host path when
        // it appears in a condition key
        let mut string_equals = serde_json::Map::new();
        string_equals.insert(
            format!("{}:sub", issuer_url),
            serde_json::Value::String(format!(
                "system:serviceaccount:{}:{}",
                self.namespace, SERVICE_ACCOUNT
            )),
        );

        let role_id = format!("{}-alb-controller-role", env);
        plan.add(Resource::new(
            &role_id,
            ResourceType::IamRole,
            serde_json::json!({
                "RoleName": format!("eks-{}-alb-controller-role", self.cluster_name),
                "Description": format!(
                    "IRSA role for the load balancer controller on {}",
                    self.cluster_name
                ),
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Federated": provider_arn },
                        "Action": "sts:AssumeRoleWithWebIdentity",
                        "Condition": {
                            "StringEquals": string_equals
                        },
                    }],
                },
                "ManagedPolicyArns": [reference(&policy_id)],
            }),
        ))?;

        publish_string_parameter(
            plan,
            store,
            &format!("{}-alb-controller-role-arn-param", env),
            &format!("/alb/{}/alb-controller-role-arn", env),
            &attribute(&role_id, "Arn"),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store_with_oidc() -> ParamStore {
        let mut store = ParamStore::new();
        store
            .publish(
                "/oidc/dev/oidc-url",
                "${dev-eks-oidc-lookup.cluster.identity.oidc.issuer}",
            )
            .unwrap();
        store
            .publish("/oidc/dev/oidc-arn", "${dev-eks-oidc.Arn}")
            .unwrap();
        store
    }

    #[test]
    fn test_missing_policy_file_fails_before_declaring_resources() {
        let mut plan = Plan::new("dev-eks");
        let mut store = store_with_oidc();

        let path = Path::new("does/not/exist/alb-iam-policy.json");
        let planner = AlbControllerPlanner::new("dev", "dev-eks-cluster", "kube-system", path);
        let err = planner.synthesize(&mut plan, &mut store).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("does/not/exist/alb-iam-policy.json"));
        assert!(message.contains("download"));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_role_binds_controller_service_account() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alb-iam-policy.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"Version": "2012-10-17", "Statement": [{{"Effect": "Allow", "Action": ["ec2:DescribeSubnets"], "Resource": "*"}}]}}"#
        )
        .unwrap();

        let mut plan = Plan::new("dev-eks");
        let mut store = store_with_oidc();
        AlbControllerPlanner::new("dev", "dev-eks-cluster", "kube-system", &path)
            .synthesize(&mut plan, &mut store)
            .unwrap();

        let role = plan.get("dev-alb-controller-role").unwrap();
        let statement = &role.properties["AssumeRolePolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], "sts:AssumeRoleWithWebIdentity");
        assert_eq!(statement["Principal"]["Federated"], "${dev-eks-oidc.Arn}");
        let condition = statement["Condition"]["StringEquals"]
            .as_object()
            .unwrap();
        let (key, value) = condition.iter().next().unwrap();
        assert!(key.ends_with(":sub"));
        assert_eq!(
            value.as_str().unwrap(),
            "system:serviceaccount:kube-system:aws-load-balancer-controller"
        );

        assert_eq!(
            store.get("/alb/dev/alb-controller-role-arn").unwrap(),
            "${dev-alb-controller-role.Arn}"
        );

        let policy = plan.get("dev-alb-controller-policy").unwrap();
        assert_eq!(
            policy.properties["ManagedPolicyName"],
            "dev-eks-cluster-AmazonEKSLoadBalancerControllerPolicy"
        );
    }

    #[test]
    fn test_role_requires_published_oidc_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alb-iam-policy.json");
        std::fs::write(&path, r#"{"Version": "2012-10-17", "Statement": []}"#).unwrap();

        let mut plan = Plan::new("dev-eks");
        let mut store = ParamStore::new();
        let err = AlbControllerPlanner::new("dev", "dev-eks-cluster", "kube-system", &path)
            .synthesize(&mut plan, &mut store)
            .unwrap_err();
        assert!(err.to_string().contains("/oidc/dev/oidc-url"));
    }
}
