//! Provider-side resource records
//!
//! These are plain values read back from the provider. Nothing here is
//! cached between calls; every record is a snapshot of one describe call.

use crate::cidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tags attached to a provider resource
pub type Tags = BTreeMap<String, String>;

/// Resource kinds the engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    RouteTable,
    InternetGateway,
    NatGateway,
    SecurityGroup,
    LoadBalancer,
    LaunchConfiguration,
    AutoScalingGroup,
    HostedZone,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::NatGateway => "nat-gateway",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::LaunchConfiguration => "launch-configuration",
            ResourceKind::AutoScalingGroup => "auto-scaling-group",
            ResourceKind::HostedZone => "hosted-zone",
        };
        write!(f, "{}", s)
    }
}

/// The network container (VPC)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub cidr: Ipv4Cidr,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub cidr: Ipv4Cidr,
    pub availability_zone: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub vpc_id: String,
    /// The VPC's implicit main table; removed with the VPC itself
    pub main: bool,
    pub associations: Vec<RouteTableAssociation>,
    pub routes: Vec<Route>,
    pub tags: Tags,
}

impl RouteTable {
    /// Gateways this table routes through, excluding the local route
    pub fn gateway_targets(&self) -> impl Iterator<Item = &RouteTarget> {
        self.routes
            .iter()
            .map(|r| &r.target)
            .filter(|t| !matches!(t, RouteTarget::Local))
    }

    pub fn references(&self, target: &RouteTarget) -> bool {
        self.routes.iter().any(|r| &r.target == target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableAssociation {
    pub id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: Ipv4Cidr,
    pub target: RouteTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum RouteTarget {
    Local,
    InternetGateway(String),
    NatGateway(String),
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteTarget::Local => write!(f, "local"),
            RouteTarget::InternetGateway(id) | RouteTarget::NatGateway(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetGateway {
    pub id: String,
    /// VPC ids this gateway is attached to
    pub attachments: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatGatewayState {
    Pending,
    Available,
    Deleting,
    Deleted,
    Failed,
}

impl NatGatewayState {
    /// Deleted and failed gateways linger in describe output for a while
    pub fn is_gone(&self) -> bool {
        matches!(self, NatGatewayState::Deleted | NatGatewayState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGateway {
    pub id: String,
    pub subnet_id: String,
    pub allocation_id: Option<String>,
    pub state: NatGatewayState,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub vpc_id: String,
    pub name: String,
    /// Whether an allow-all ingress rule from 0.0.0.0/0 is present
    pub open_to_world: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub protocol: String,
    pub port: u16,
    pub instance_protocol: String,
    pub instance_port: u16,
}

impl Listener {
    pub fn http(port: u16) -> Self {
        Self {
            protocol: "HTTP".to_string(),
            port,
            instance_protocol: "HTTP".to_string(),
            instance_port: port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub listeners: Vec<Listener>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    pub dns_name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfigurationSpec {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub security_group_ids: Vec<String>,
    /// Plain-text bootstrap script; backends encode it as they need
    pub user_data: String,
    pub associate_public_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfiguration {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthCheck {
    Ec2,
    Elb,
}

impl HealthCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCheck::Ec2 => "EC2",
            HealthCheck::Elb => "ELB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScalingGroupSpec {
    pub name: String,
    pub launch_configuration: String,
    pub subnet_ids: Vec<String>,
    pub load_balancers: Vec<String>,
    pub capacity: u32,
    pub health_check: HealthCheck,
    pub health_check_grace_period_secs: u32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    pub name: String,
    pub launch_configuration: Option<String>,
    pub subnet_ids: Vec<String>,
    pub load_balancers: Vec<String>,
    pub desired_capacity: u32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub id: String,
    /// Fully qualified, with the trailing dot (`example.com.`)
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub name: String,
    pub record_type: String,
    pub values: Vec<String>,
    pub ttl: Option<u32>,
}

impl RecordSet {
    pub fn cname(name: impl Into<String>, target: impl Into<String>, ttl: u32) -> Self {
        Self {
            name: name.into(),
            record_type: "CNAME".to_string(),
            values: vec![target.into()],
            ttl: Some(ttl),
        }
    }

    /// NS and SOA records come with every hosted zone
    pub fn is_zone_apex_default(&self) -> bool {
        matches!(self.record_type.as_str(), "NS" | "SOA")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordChange {
    Create,
    Delete,
}
