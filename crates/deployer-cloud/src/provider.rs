//! Cloud provider trait definition

use crate::cidr::Ipv4Cidr;
use crate::error::{CloudError, Result};
use crate::resource::{
    AutoScalingGroup, AutoScalingGroupSpec, HostedZone, InternetGateway, LaunchConfiguration,
    LaunchConfigurationSpec, LoadBalancer, LoadBalancerSpec, NatGateway, RecordChange, RecordSet,
    RouteTable, RouteTarget, SecurityGroup, Subnet, Tags, Vpc,
};
use async_trait::async_trait;

/// A condition on a describe call. Several filters are combined with AND.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Provider-assigned id (or name, for name-keyed kinds)
    Id(String),
    /// Resource carries tag `key` with exactly `value`
    Tag { key: String, value: String },
    /// Resource lives in this VPC
    VpcId(String),
    /// Route tables associated with, or NAT gateways placed in, this subnet
    SubnetId(String),
    /// Internet gateways attached to this VPC
    AttachedTo(String),
    /// Security group name, load balancer name, autoscaling group name
    Name(String),
}

impl Filter {
    pub fn id(id: impl Into<String>) -> Self {
        Filter::Id(id.into())
    }

    pub fn tag(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Tag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn vpc(id: impl Into<String>) -> Self {
        Filter::VpcId(id.into())
    }

    pub fn subnet(id: impl Into<String>) -> Self {
        Filter::SubnetId(id.into())
    }

    pub fn attached_to(vpc_id: impl Into<String>) -> Self {
        Filter::AttachedTo(vpc_id.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Filter::Name(name.into())
    }

    /// Whether `tags` satisfy this filter. Non-tag filters pass.
    pub fn matches_tags(&self, tags: &Tags) -> bool {
        match self {
            Filter::Tag { key, value } => tags.get(key) == Some(value),
            _ => true,
        }
    }
}

/// Cloud provider capability interface
///
/// One implementation per backend. The orchestration engine only ever talks
/// to this trait, so managers can be driven by deterministic test doubles.
/// Every call is a single remote request; nothing is cached.
///
/// Failed calls return [`crate::ProviderError`] already classified by the
/// backend's own code table: the retry layer retries only
/// [`crate::ErrorClass::Transient`], and deletes treat
/// [`crate::ErrorClass::AlreadyAbsent`] as success.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "aws", "sandbox")
    fn name(&self) -> &str;

    /// Zones new subnets are spread across. Backends without zone
    /// enumeration keep the default and callers fall back to a static list.
    async fn availability_zones(&self) -> Result<Vec<String>> {
        Err(CloudError::Unsupported(format!(
            "{}: availability zone enumeration",
            self.name()
        )))
    }

    /// Attach tags to one or more resources addressed by id
    async fn tag_resources(&self, ids: &[String], tags: &Tags) -> Result<()>;

    // Network container

    async fn create_vpc(&self, cidr: Ipv4Cidr) -> Result<String>;
    async fn describe_vpcs(&self, filters: &[Filter]) -> Result<Vec<Vpc>>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;

    // Subnets and routing

    async fn create_subnet(&self, vpc_id: &str, cidr: Ipv4Cidr, zone: &str) -> Result<String>;
    async fn describe_subnets(&self, filters: &[Filter]) -> Result<Vec<Subnet>>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;

    async fn create_route_table(&self, vpc_id: &str) -> Result<String>;
    async fn describe_route_tables(&self, filters: &[Filter]) -> Result<Vec<RouteTable>>;
    /// Returns the association id
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
    -> Result<String>;
    async fn disassociate_route_table(&self, association_id: &str) -> Result<()>;
    async fn create_route(
        &self,
        route_table_id: &str,
        destination: Ipv4Cidr,
        target: &RouteTarget,
    ) -> Result<()>;
    async fn delete_route_table(&self, route_table_id: &str) -> Result<()>;

    // Internet gateways

    async fn create_internet_gateway(&self) -> Result<String>;
    async fn describe_internet_gateways(&self, filters: &[Filter]) -> Result<Vec<InternetGateway>>;
    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()>;

    // Elastic addresses and managed NAT

    /// Returns the allocation id
    async fn allocate_address(&self) -> Result<String>;
    async fn release_address(&self, allocation_id: &str) -> Result<()>;
    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        client_token: &str,
    ) -> Result<String>;
    async fn describe_nat_gateways(&self, filters: &[Filter]) -> Result<Vec<NatGateway>>;
    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()>;

    // Security groups

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String>;
    async fn describe_security_groups(&self, filters: &[Filter]) -> Result<Vec<SecurityGroup>>;
    /// Allow all protocols from 0.0.0.0/0
    async fn authorize_ingress_from_anywhere(&self, group_id: &str) -> Result<()>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;

    // Load balancers (name-keyed)

    /// Returns the load balancer's DNS name
    async fn create_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<String>;
    async fn describe_load_balancers(&self, filters: &[Filter]) -> Result<Vec<LoadBalancer>>;
    async fn delete_load_balancer(&self, name: &str) -> Result<()>;

    // Compute (name-keyed)

    async fn create_launch_configuration(&self, spec: &LaunchConfigurationSpec) -> Result<()>;
    async fn describe_launch_configurations(
        &self,
        filters: &[Filter],
    ) -> Result<Vec<LaunchConfiguration>>;
    async fn delete_launch_configuration(&self, name: &str) -> Result<()>;

    async fn create_auto_scaling_group(&self, spec: &AutoScalingGroupSpec) -> Result<()>;
    async fn describe_auto_scaling_groups(
        &self,
        filters: &[Filter],
    ) -> Result<Vec<AutoScalingGroup>>;
    /// Also lowers the group's minimum size when it is above `capacity`
    async fn set_desired_capacity(&self, name: &str, capacity: u32) -> Result<()>;
    async fn delete_auto_scaling_group(&self, name: &str, force: bool) -> Result<()>;

    // DNS

    /// `name` is the zone apex without trailing dot (`example.com`)
    async fn create_hosted_zone(&self, name: &str) -> Result<HostedZone>;
    async fn find_hosted_zones(&self, name: &str) -> Result<Vec<HostedZone>>;
    async fn list_record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>>;
    async fn change_record_set(
        &self,
        zone_id: &str,
        change: RecordChange,
        record: &RecordSet,
    ) -> Result<()>;
    async fn delete_hosted_zone(&self, zone_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_filter_matching() {
        let mut tags = Tags::new();
        tags.insert("cloud-deployer-deployment".to_string(), "default".to_string());

        assert!(Filter::tag("cloud-deployer-deployment", "default").matches_tags(&tags));
        assert!(!Filter::tag("cloud-deployer-deployment", "staging").matches_tags(&tags));
        assert!(!Filter::tag("cloud-deployer-network", "dc-a").matches_tags(&tags));
        assert!(Filter::vpc("vpc-1").matches_tags(&tags));
    }
}
