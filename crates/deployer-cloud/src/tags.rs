//! Tag-based discovery
//!
//! The provider is the only record of what exists. Every managed resource
//! carries a deployment tag and a component tag, and every lookup here is a
//! fresh describe call filtered by them.

use crate::error::{CloudError, Result};
use crate::provider::{CloudProvider, Filter};
use crate::resource::{
    AutoScalingGroup, LoadBalancer, NatGateway, ResourceKind, RouteTable, SecurityGroup, Subnet,
    Tags, Vpc,
};
use tracing::debug;

/// Deployment scope tag key
pub const DEPLOYMENT_TAG: &str = "cloud-deployer-deployment";

/// Component tag key: datacenter name for the container and its internet
/// gateway, qualified network name for everything inside a network
pub const COMPONENT_TAG: &str = "cloud-deployer-network";

/// FQDN of the CNAME pointing at a load balancer
pub const DNS_TAG: &str = "cloud-deployer-dns";

/// Which component of a network owns a security group
pub const ROLE_TAG: &str = "cloud-deployer-role";

/// Owner of a security group. A load balancer and a service may share a
/// qualified name, so their groups are told apart by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    LoadBalancer,
    Service,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::LoadBalancer => "lb",
            GroupRole::Service => "svc",
        }
    }
}

/// Value of the component tag, if present
pub fn component_of(tags: &Tags) -> Option<&str> {
    tags.get(COMPONENT_TAG).map(String::as_str)
}

/// At most one match for singleton kinds; more is tag corruption left over
/// from an earlier partial failure and is never repaired automatically.
pub fn expect_singleton<T>(kind: ResourceKind, name: &str, found: Vec<T>) -> Result<Option<T>> {
    if found.len() > 1 {
        return Err(CloudError::BadEnvironmentState(format!(
            "found {} {} resources tagged '{}', expected at most one",
            found.len(),
            kind,
            name
        )));
    }
    Ok(found.into_iter().next())
}

/// Describe calls by id fail with a not-found error instead of returning
/// nothing once the resource is gone.
pub(crate) fn absent_as_empty<T>(result: Result<Vec<T>>) -> Result<Vec<T>> {
    match result {
        Err(e) if e.is_already_absent() => Ok(Vec::new()),
        other => other,
    }
}

/// Tag queries for one deployment scope
#[derive(Clone, Copy)]
pub struct ResourceTagIndex<'a> {
    provider: &'a dyn CloudProvider,
    deployment: &'a str,
}

impl<'a> ResourceTagIndex<'a> {
    pub fn new(provider: &'a dyn CloudProvider, deployment: &'a str) -> Self {
        Self {
            provider,
            deployment,
        }
    }

    pub fn deployment(&self) -> &str {
        self.deployment
    }

    /// Tags to attach to a resource belonging to `component`
    pub fn tags(&self, component: &str) -> Tags {
        let mut tags = Tags::new();
        tags.insert(DEPLOYMENT_TAG.to_string(), self.deployment.to_string());
        tags.insert(COMPONENT_TAG.to_string(), component.to_string());
        tags
    }

    pub fn scope(&self) -> Filter {
        Filter::tag(DEPLOYMENT_TAG, self.deployment)
    }

    pub fn filters(&self, component: &str) -> Vec<Filter> {
        vec![self.scope(), Filter::tag(COMPONENT_TAG, component)]
    }

    /// Every datacenter container in the deployment scope
    pub async fn datacenters(&self) -> Result<Vec<Vpc>> {
        let vpcs = self.provider.describe_vpcs(&[self.scope()]).await?;
        debug!(deployment = self.deployment, count = vpcs.len(), "listed datacenters");
        Ok(vpcs)
    }

    pub async fn datacenter(&self, name: &str) -> Result<Option<Vpc>> {
        let found = self.provider.describe_vpcs(&self.filters(name)).await?;
        expect_singleton(ResourceKind::Vpc, name, found)
    }

    pub async fn subnets(&self, component: &str) -> Result<Vec<Subnet>> {
        self.provider.describe_subnets(&self.filters(component)).await
    }

    pub async fn all_subnets(&self) -> Result<Vec<Subnet>> {
        self.provider.describe_subnets(&[self.scope()]).await
    }

    pub async fn route_tables(&self, component: &str) -> Result<Vec<RouteTable>> {
        self.provider
            .describe_route_tables(&self.filters(component))
            .await
    }

    /// NAT gateways of a network, skipping ones already deleted or failed
    pub async fn nat_gateways(&self, component: &str) -> Result<Vec<NatGateway>> {
        let gateways = self
            .provider
            .describe_nat_gateways(&self.filters(component))
            .await?;
        Ok(gateways.into_iter().filter(|g| !g.state.is_gone()).collect())
    }

    pub async fn all_nat_gateways(&self) -> Result<Vec<NatGateway>> {
        let gateways = self.provider.describe_nat_gateways(&[self.scope()]).await?;
        Ok(gateways.into_iter().filter(|g| !g.state.is_gone()).collect())
    }

    pub async fn security_groups(
        &self,
        component: &str,
        role: GroupRole,
    ) -> Result<Vec<SecurityGroup>> {
        let mut filters = self.filters(component);
        filters.push(Filter::tag(ROLE_TAG, role.as_str()));
        self.provider.describe_security_groups(&filters).await
    }

    pub async fn security_group(
        &self,
        component: &str,
        role: GroupRole,
    ) -> Result<Option<SecurityGroup>> {
        let found = self.security_groups(component, role).await?;
        expect_singleton(ResourceKind::SecurityGroup, component, found)
    }

    pub async fn load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        self.provider
            .describe_load_balancers(&[self.scope()])
            .await
    }

    pub async fn load_balancer(&self, component: &str) -> Result<Option<LoadBalancer>> {
        let found = self
            .provider
            .describe_load_balancers(&self.filters(component))
            .await?;
        expect_singleton(ResourceKind::LoadBalancer, component, found)
    }

    pub async fn auto_scaling_groups(&self) -> Result<Vec<AutoScalingGroup>> {
        self.provider
            .describe_auto_scaling_groups(&[self.scope()])
            .await
    }

    pub async fn auto_scaling_group(&self, component: &str) -> Result<Option<AutoScalingGroup>> {
        let found = self
            .provider
            .describe_auto_scaling_groups(&self.filters(component))
            .await?;
        expect_singleton(ResourceKind::AutoScalingGroup, component, found)
    }
}
