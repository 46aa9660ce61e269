//! Datacenter lifecycle
//!
//! A datacenter is the top-level network container (a VPC). Its identity is
//! the component tag; the provider id and CIDR are read back on every call.

use crate::cidr::{Ipv4Cidr, allocate_one_from};
use crate::deployment::Deployment;
use crate::error::{CloudError, Result};
use crate::naming::validate_label;
use crate::provider::Filter;
use crate::resource::{RouteTarget, Vpc};
use crate::tags::{absent_as_empty, component_of};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    pub name: String,
    pub id: String,
    pub cidr: Ipv4Cidr,
}

impl Datacenter {
    fn from_vpc(vpc: Vpc) -> Option<Self> {
        let name = component_of(&vpc.tags)?.to_string();
        Some(Self {
            name,
            id: vpc.id,
            cidr: vpc.cidr,
        })
    }
}

pub struct DatacenterManager {
    deployment: Deployment,
}

impl DatacenterManager {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Provision with the deployment's configured pool and prefix
    pub async fn provision_default(&self, name: &str) -> Result<Datacenter> {
        let defaults = &self.deployment.settings().datacenter;
        self.provision(
            name,
            defaults.prefix,
            &defaults.include_ranges,
            &defaults.exclude_ranges,
        )
        .await
    }

    /// Allocate a block and create the container for `name`.
    ///
    /// The block comes from `include_ranges`, avoiding `exclude_ranges` and
    /// every sibling datacenter visible in this deployment scope right now.
    #[instrument(skip(self, include_ranges, exclude_ranges), fields(deployment = %self.deployment.settings().name))]
    pub async fn provision(
        &self,
        name: &str,
        prefix: u8,
        include_ranges: &[Ipv4Cidr],
        exclude_ranges: &[Ipv4Cidr],
    ) -> Result<Datacenter> {
        validate_label(name)?;
        if let Some(existing) = self.discover(name).await? {
            return Err(CloudError::AlreadyExists(format!(
                "datacenter '{}' ({})",
                name, existing.id
            )));
        }

        let mut exclude = exclude_ranges.to_vec();
        exclude.extend(self.list().await?.into_iter().map(|dc| dc.cidr));
        let cidr = allocate_one_from(include_ranges, prefix, &exclude)?;
        info!(datacenter = name, cidr = %cidr, "allocated datacenter block");

        let provider = self.deployment.provider();
        let index = self.deployment.index();
        let tags = index.tags(name);

        self.deployment
            .retrier()
            .create(
                "vpc",
                async || provider.create_vpc(cidr).await,
                async |id: &str| {
                    provider.tag_resources(&[id.to_string()], &tags).await?;
                    let found = index.datacenter(name).await?;
                    Ok(found
                        .filter(|vpc| vpc.id == id)
                        .and_then(Datacenter::from_vpc))
                },
                async |id: &str| self.delete_container(id).await,
            )
            .await
    }

    pub async fn discover(&self, name: &str) -> Result<Option<Datacenter>> {
        let vpc = self.deployment.index().datacenter(name).await?;
        Ok(vpc.and_then(Datacenter::from_vpc))
    }

    /// Every datacenter in the deployment scope, ordered by name
    pub async fn list(&self) -> Result<Vec<Datacenter>> {
        let mut datacenters: Vec<Datacenter> = self
            .deployment
            .index()
            .datacenters()
            .await?
            .into_iter()
            .filter_map(Datacenter::from_vpc)
            .collect();
        datacenters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(datacenters)
    }

    /// Destroy the datacenter called `name`; absent is a no-op.
    #[instrument(skip(self), fields(deployment = %self.deployment.settings().name))]
    pub async fn destroy(&self, name: &str) -> Result<()> {
        match self.discover(name).await? {
            Some(datacenter) => self.destroy_by_id(&datacenter.id).await,
            None => {
                debug!(datacenter = name, "already absent");
                Ok(())
            }
        }
    }

    /// Release unreferenced internet gateways, then delete the container.
    pub async fn destroy_by_id(&self, id: &str) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();

        let vpcs = absent_as_empty(provider.describe_vpcs(&[Filter::id(id)]).await)?;
        if vpcs.is_empty() {
            debug!(vpc = id, "already absent");
            return Ok(());
        }

        let gateways = provider
            .describe_internet_gateways(&[Filter::attached_to(id)])
            .await?;
        for gateway in gateways {
            let target = RouteTarget::InternetGateway(gateway.id.clone());
            let tables = provider.describe_route_tables(&[Filter::vpc(id)]).await?;
            if tables.iter().any(|table| table.references(&target)) {
                warn!(
                    vpc = id,
                    gateway = %gateway.id,
                    "internet gateway still routed, leaving it attached"
                );
                continue;
            }
            self.release_internet_gateway(&gateway.id, id).await?;
        }

        self.delete_container(id).await?;
        retrier
            .wait_until_absent(&format!("vpc {}", id), async || {
                let found = absent_as_empty(provider.describe_vpcs(&[Filter::id(id)]).await)?;
                Ok(!found.is_empty())
            })
            .await?;
        info!(vpc = id, "datacenter destroyed");
        Ok(())
    }

    /// Detach a gateway from `vpc_id` and delete it.
    pub(crate) async fn release_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();

        retrier
            .delete(&format!("attachment {} -> {}", gateway_id, vpc_id), async || {
                provider.detach_internet_gateway(gateway_id, vpc_id).await
            })
            .await?;
        retrier
            .delete(&format!("internet gateway {}", gateway_id), async || {
                provider.delete_internet_gateway(gateway_id).await
            })
            .await
    }

    async fn delete_container(&self, id: &str) -> Result<()> {
        let provider = self.deployment.provider();
        self.deployment
            .retrier()
            .delete(&format!("vpc {}", id), async || provider.delete_vpc(id).await)
            .await
    }
}
