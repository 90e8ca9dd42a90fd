/// Identity federation: look up the cluster's token issuer endpoint and
/// register it as a federated identity provider.
///
/// The issuer lookup is the one imperative operation in the system. It is
/// declared as a custom resource the provisioning engine executes against
/// the live cluster, so its ordering after cluster creation must be stated
/// explicitly rather than inferred.
use anyhow::Result;
use tracing::info;

use crate::plan::{attribute, publish_string_parameter, ParamStore, Plan, Resource, ResourceType};

/// Root CA thumbprint for the cluster's issuer endpoint
const OIDC_THUMBPRINT: &str = "9e99a48a9960b14926bb7f3b02e22da0ecd0c5f6";

const OIDC_CLIENT_ID: &str = "sts.amazonaws.com";

pub struct OidcProviderPlanner<'a> {
    env_name: &'a str,
    cluster_logical_id: &'a str,
    cluster_name: &'a str,
    region: &'a str,
}

/// Issuer URL and provider ARN tokens for dependent roles
pub struct OidcOutputs {
    pub issuer_url: String,
    pub provider_arn: String,
}

impl<'a> OidcProviderPlanner<'a> {
    pub fn new(
        env_name: &'a str,
        cluster_logical_id: &'a str,
        cluster_name: &'a str,
        region: &'a str,
    ) -> Self {
        Self {
            env_name,
            cluster_logical_id,
            cluster_name,
            region,
        }
    }

    pub fn synthesize(&self, plan: &mut Plan, store: &mut ParamStore) -> Result<OidcOutputs> {
        let env = self.env_name;

        info!("Planning identity federation for {}", env);

        let lookup_id = format!("{}-eks-oidc-lookup", env);
        plan.add(
            Resource::new(
                &lookup_id,
                ResourceType::ApiCallLookup,
                serde_json::json!({
                    "Service": "EKS",
                    "Action": "describeCluster",
                    "Parameters": { "Name": self.cluster_name },
                    "Region": self.region,
                    "PhysicalResourceId": format!("{}-describe", self.cluster_name),
                }),
            )
            .depends_on(self.cluster_logical_id),
        )?;

        let issuer_url = attribute(&lookup_id, "cluster.identity.oidc.issuer");

        let provider_id = format!("{}-eks-oidc", env);
        plan.add(
            Resource::new(
                &provider_id,
                ResourceType::OidcProvider,
                serde_json::json!({
                    "Url": issuer_url,
                    "ClientIdList": [OIDC_CLIENT_ID],
                    "ThumbprintList": [OIDC_THUMBPRINT],
                }),
            )
            .depends_on(&lookup_id),
        )?;
        let provider_arn = attribute(&provider_id, "Arn");

        publish_string_parameter(
            plan,
            store,
            &format!("{}-oidc-url-param", env),
            &format!("/oidc/{}/oidc-url", env),
            &issuer_url,
        )?;
        publish_string_parameter(
            plan,
            store,
            &format!("{}-oidc-arn-param", env),
            &format!("/oidc/{}/oidc-arn", env),
            &provider_arn,
        )?;

        Ok(OidcOutputs {
            issuer_url,
            provider_arn,
        })
    }
}
