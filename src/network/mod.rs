/// Network topology module: isolated address space, per-zone subnet
/// partitioning, internet and NAT egress, route associations.
pub mod cidr;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::config::EnvironmentConfig;
use crate::plan::{
    attribute, publish_string_parameter, pseudo, reference, ParamStore, Plan, Resource,
    ResourceType, Tag,
};
use cidr::{partition, CidrBlock};

/// Planner producing a fully routed network for one environment
pub struct NetworkPlanner<'a> {
    env_name: &'a str,
    config: &'a EnvironmentConfig,
}

/// Identifier tokens for the resources other modules consume
pub struct NetworkOutputs {
    pub vpc_id: String,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct VpcProperties {
    cidr_block: String,
    enable_dns_support: bool,
    enable_dns_hostnames: bool,
    tags: Vec<Tag>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubnetProperties {
    vpc_id: String,
    cidr_block: String,
    availability_zone: String,
    map_public_ip_on_launch: bool,
    tags: Vec<Tag>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RouteProperties {
    route_table_id: String,
    destination_cidr_block: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nat_gateway_id: Option<String>,
}

impl<'a> NetworkPlanner<'a> {
    pub fn new(env_name: &'a str, config: &'a EnvironmentConfig) -> Self {
        Self { env_name, config }
    }

    /// Evaluate the module: declare every network resource into `plan` and
    /// publish the resulting identifiers to the naming/value store.
    pub fn synthesize(
        &self,
        plan: &mut Plan,
        store: &mut ParamStore,
    ) -> Result<NetworkOutputs> {
        let env = self.env_name;
        let block: CidrBlock = self
            .config
            .vpc_cidr
            .parse()
            .with_context(|| format!("environment {}: invalid vpc_cidr", env))?;
        let zones = partition(&block, self.config.max_azs)?;

        info!(
            "Planning network topology for {}: {} across {} zones",
            env,
            block,
            zones.len()
        );

        let vpc_id = format!("{}-vpc", env);
        plan.add(Resource::new(
            &vpc_id,
            ResourceType::Vpc,
            serde_json::to_value(VpcProperties {
                cidr_block: block.to_string(),
                enable_dns_support: true,
                enable_dns_hostnames: true,
                tags: Tag::name(&vpc_id),
            })?,
        ))?;

        let igw_id = format!("{}-igw", env);
        plan.add(Resource::new(
            &igw_id,
            ResourceType::InternetGateway,
            serde_json::json!({ "Tags": Tag::name(&igw_id) }),
        ))?;
        plan.add(Resource::new(
            format!("{}-igw-attachment", env),
            ResourceType::VpcGatewayAttachment,
            serde_json::json!({
                "VpcId": reference(&vpc_id),
                "InternetGatewayId": reference(&igw_id),
            }),
        ))?;

        // Public and private subnets, one pair per zone
        let mut public_subnet_ids = Vec::new();
        let mut private_subnet_ids = Vec::new();

        for (i, zone) in zones.iter().enumerate() {
            let public_id = format!("{}-public-subnet-{}", env, i);
            plan.add(Resource::new(
                &public_id,
                ResourceType::Subnet,
                serde_json::to_value(SubnetProperties {
                    vpc_id: reference(&vpc_id),
                    cidr_block: zone.public.to_string(),
                    availability_zone: pseudo::availability_zone(i),
                    map_public_ip_on_launch: true,
                    tags: Tag::name(&public_id),
                })?,
            ))?;
            public_subnet_ids.push(reference(&public_id));

            let private_id = format!("{}-private-subnet-{}", env, i);
            plan.add(Resource::new(
                &private_id,
                ResourceType::Subnet,
                serde_json::to_value(SubnetProperties {
                    vpc_id: reference(&vpc_id),
                    cidr_block: zone.private.to_string(),
                    availability_zone: pseudo::availability_zone(i),
                    map_public_ip_on_launch: false,
                    tags: Tag::name(&private_id),
                })?,
            ))?;
            private_subnet_ids.push(reference(&private_id));
        }

        // One route table shared by all public subnets, default route to the IGW
        let public_rt_id = format!("{}-public-rt", env);
        plan.add(Resource::new(
            &public_rt_id,
            ResourceType::RouteTable,
            serde_json::json!({
                "VpcId": reference(&vpc_id),
                "Tags": Tag::name(&public_rt_id),
            }),
        ))?;
        plan.add(Resource::new(
            format!("{}-public-route", env),
            ResourceType::Route,
            serde_json::to_value(RouteProperties {
                route_table_id: reference(&public_rt_id),
                destination_cidr_block: "0.0.0.0/0".to_string(),
                gateway_id: Some(reference(&igw_id)),
                nat_gateway_id: None,
            })?,
        ))?;
        for (i, subnet_ref) in public_subnet_ids.iter().enumerate() {
            plan.add(Resource::new(
                format!("{}-public-rt-assoc-{}", env, i),
                ResourceType::SubnetRouteTableAssociation,
                serde_json::json!({
                    "SubnetId": subnet_ref,
                    "RouteTableId": reference(&public_rt_id),
                }),
            ))?;
        }

        // One NAT path per private subnet so losing a zone's egress does
        // not affect the others
        let mut nat_gateway_ids = Vec::new();
        for i in 0..zones.len() {
            let eip_id = format!("{}-nat-eip-{}", env, i);
            plan.add(Resource::new(
                &eip_id,
                ResourceType::Eip,
                serde_json::json!({
                    "Domain": "vpc",
                    "Tags": Tag::name(&eip_id),
                }),
            ))?;

            let nat_id = format!("{}-nat-gw-{}", env, i);
            plan.add(Resource::new(
                &nat_id,
                ResourceType::NatGateway,
                serde_json::json!({
                    "AllocationId": attribute(&eip_id, "AllocationId"),
                    "SubnetId": public_subnet_ids[i],
                    "Tags": Tag::name(&nat_id),
                }),
            ))?;
            nat_gateway_ids.push(nat_id);
        }

        // One route table per private subnet, default route to its own NAT
        for (i, subnet_ref) in private_subnet_ids.iter().enumerate() {
            let rt_id = format!("{}-private-rt-{}", env, i);
            plan.add(Resource::new(
                &rt_id,
                ResourceType::RouteTable,
                serde_json::json!({
                    "VpcId": reference(&vpc_id),
                    "Tags": Tag::name(&rt_id),
                }),
            ))?;
            plan.add(Resource::new(
                format!("{}-private-route-{}", env, i),
                ResourceType::Route,
                serde_json::to_value(RouteProperties {
                    route_table_id: reference(&rt_id),
                    destination_cidr_block: "0.0.0.0/0".to_string(),
                    gateway_id: None,
                    nat_gateway_id: Some(reference(&nat_gateway_ids[i])),
                })?,
            ))?;
            plan.add(Resource::new(
                format!("{}-private-rt-assoc-{}", env, i),
                ResourceType::SubnetRouteTableAssociation,
                serde_json::json!({
                    "SubnetId": subnet_ref,
                    "RouteTableId": reference(&rt_id),
                }),
            ))?;
        }

        // Keep object-storage traffic off the public egress path
        plan.add(Resource::new(
            format!("{}-s3-endpoint", env),
            ResourceType::VpcEndpoint,
            serde_json::json!({
                "VpcId": reference(&vpc_id),
                "ServiceName": format!("com.amazonaws.{}.s3", pseudo::REGION),
                "VpcEndpointType": "Gateway",
                "SubnetIds": private_subnet_ids,
            }),
        ))?;

        publish_string_parameter(
            plan,
            store,
            &format!("{}-vpc-id-param", env),
            &format!("/network/{}/vpc-id", env),
            &reference(&vpc_id),
        )?;
        publish_string_parameter(
            plan,
            store,
            &format!("{}-private-subnet-ids-param", env),
            &format!("/network/{}/private-subnet-ids", env),
            &private_subnet_ids.join(","),
        )?;
        publish_string_parameter(
            plan,
            store,
            &format!("{}-public-subnet-ids-param", env),
            &format!("/network/{}/public-subnet-ids", env),
            &public_subnet_ids.join(","),
        )?;

        info!(
            "Network topology for {} planned: {} resources",
            env,
            plan.len()
        );

        Ok(NetworkOutputs {
            vpc_id: reference(&vpc_id),
            public_subnet_ids,
            private_subnet_ids,
        })
    }
}
