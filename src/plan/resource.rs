/// Resource declarations consumed by the provisioning engine
use serde::{Deserialize, Serialize};

/// Resource kinds the provisioning engine knows how to reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "AWS::EC2::VPC")]
    Vpc,
    #[serde(rename = "AWS::EC2::InternetGateway")]
    InternetGateway,
    #[serde(rename = "AWS::EC2::VPCGatewayAttachment")]
    VpcGatewayAttachment,
    #[serde(rename = "AWS::EC2::Subnet")]
    Subnet,
    #[serde(rename = "AWS::EC2::RouteTable")]
    RouteTable,
    #[serde(rename = "AWS::EC2::Route")]
    Route,
    #[serde(rename = "AWS::EC2::SubnetRouteTableAssociation")]
    SubnetRouteTableAssociation,
    #[serde(rename = "AWS::EC2::EIP")]
    Eip,
    #[serde(rename = "AWS::EC2::NatGateway")]
    NatGateway,
    #[serde(rename = "AWS::EC2::VPCEndpoint")]
    VpcEndpoint,
    #[serde(rename = "AWS::EC2::SecurityGroup")]
    SecurityGroup,
    #[serde(rename = "AWS::EC2::SecurityGroupIngress")]
    SecurityGroupIngress,
    #[serde(rename = "AWS::IAM::Role")]
    IamRole,
    #[serde(rename = "AWS::IAM::ManagedPolicy")]
    ManagedPolicy,
    #[serde(rename = "AWS::IAM::OIDCProvider")]
    OidcProvider,
    #[serde(rename = "AWS::EKS::Cluster")]
    EksCluster,
    #[serde(rename = "AWS::EKS::Nodegroup")]
    EksNodegroup,
    #[serde(rename = "AWS::EKS::Addon")]
    EksAddon,
    #[serde(rename = "AWS::EKS::AccessEntry")]
    EksAccessEntry,
    #[serde(rename = "AWS::EKS::PodIdentityAssociation")]
    PodIdentityAssociation,
    #[serde(rename = "AWS::SSM::Parameter")]
    StringParameter,
    #[serde(rename = "Custom::AwsApiCall")]
    ApiCallLookup,
}

/// A single declarative resource in a deployment plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub properties: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    /// Create a new resource declaration
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: ResourceType,
        properties: serde_json::Value,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type,
            properties,
            depends_on: Vec::new(),
        }
    }

    /// Add an explicit creation-order dependency
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    /// Reference token resolving to this resource's physical id at apply time
    pub fn reference(&self) -> String {
        reference(&self.logical_id)
    }

    /// Reference token resolving to a named attribute of this resource
    pub fn attribute(&self, name: &str) -> String {
        attribute(&self.logical_id, name)
    }
}

/// Name tag pair used on every taggable resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn name(value: impl Into<String>) -> Vec<Tag> {
        vec![Tag {
            key: "Name".to_string(),
            value: value.into(),
        }]
    }
}

/// Reference token for a logical id: `${id}`
pub fn reference(logical_id: &str) -> String {
    format!("${{{}}}", logical_id)
}

/// Attribute reference token: `${id.Attr}`
pub fn attribute(logical_id: &str, name: &str) -> String {
    format!("${{{}.{}}}", logical_id, name)
}

/// Tokens resolved by the provisioning engine from deployment context
/// rather than from declared resources.
pub mod pseudo {
    /// Account id of the deploying principal
    pub const ACCOUNT_ID: &str = "${AWS::AccountId}";

    /// Region fixed at assembly time
    pub const REGION: &str = "${AWS::Region}";

    /// Availability zone by index within the deployment region
    pub fn availability_zone(index: usize) -> String {
        format!("${{AWS::AvailabilityZones[{}]}}", index)
    }
}

/// Collect the logical-id part of every `${...}` token embedded in a
/// properties tree. Attribute suffixes are stripped; pseudo tokens
/// (`AWS::...`) and late-bound parameter tokens (`param:...`) are skipped,
/// since those resolve outside the current plan.
pub fn embedded_refs(value: &serde_json::Value) -> Vec<String> {
    let mut refs = Vec::new();
    collect_refs(value, &mut refs);
    refs
}

fn collect_refs(value: &serde_json::Value, refs: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("${") {
                let Some(len) = rest[start + 2..].find('}') else {
                    break;
                };
                let body = &rest[start + 2..start + 2 + len];
                rest = &rest[start + 2 + len + 1..];

                if body.contains("::") || body.starts_with("param:") {
                    continue;
                }
                let logical_id = body.split('.').next().unwrap_or(body);
                refs.push(logical_id.to_string());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_refs(item, refs);
            }
        }
        serde_json::Value::Object(map) => {
            // Tokens may appear in condition keys as well as values
            for (key, item) in map {
                collect_refs(&serde_json::Value::String(key.clone()), refs);
                collect_refs(item, refs);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_tokens() {
        let vpc = Resource::new("dev-vpc", ResourceType::Vpc, json!({}));
        assert_eq!(vpc.reference(), "${dev-vpc}");
        assert_eq!(vpc.attribute("CidrBlock"), "${dev-vpc.CidrBlock}");
    }

    #[test]
    fn test_type_names_serialize() {
        let s = serde_json::to_string(&ResourceType::Subnet).unwrap();
        assert_eq!(s, "\"AWS::EC2::Subnet\"");
        let s = serde_json::to_string(&ResourceType::ApiCallLookup).unwrap();
        assert_eq!(s, "\"Custom::AwsApiCall\"");
    }

    #[test]
    fn test_embedded_refs_found_in_nested_properties() {
        let props = json!({
            "VpcId": "${dev-vpc}",
            "SubnetIds": ["${dev-private-subnet-0}", "${dev-private-subnet-1}"],
            "Nested": { "Arn": "${dev-eks-role.Arn}" },
        });
        let mut refs = embedded_refs(&props);
        refs.sort();
        assert_eq!(
            refs,
            vec![
                "dev-eks-role",
                "dev-private-subnet-0",
                "dev-private-subnet-1",
                "dev-vpc",
            ]
        );
    }

    #[test]
    fn test_embedded_refs_skips_pseudo_and_param_tokens() {
        let props = json!({
            "Principal": pseudo::ACCOUNT_ID,
            "Az": pseudo::availability_zone(1),
            "VpcId": "${param:/network/dev/vpc-id}",
        });
        assert!(embedded_refs(&props).is_empty());
    }

    #[test]
    fn test_embedded_refs_in_object_keys() {
        let props = json!({
            "Condition": {
                "StringEquals": {
                    "${dev-eks-oidc-lookup.issuer}:sub": "system:serviceaccount:kube-system:sa"
                }
            }
        });
        assert_eq!(embedded_refs(&props), vec!["dev-eks-oidc-lookup"]);
    }
}
