//! Managed NAT gateways, one per subnet of a network

use crate::deployment::Deployment;
use crate::error::{CloudError, Result};
use crate::naming::QualifiedName;
use crate::network::Network;
use crate::provider::Filter;
use crate::resource::{NatGateway, NatGatewayState};
use crate::tags::absent_as_empty;
use tracing::{debug, info, instrument, warn};

pub struct NatGatewayManager {
    deployment: Deployment,
}

impl NatGatewayManager {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Provision the network and place a NAT gateway with its own elastic
    /// address in every subnet.
    #[instrument(skip(self), fields(nat = %name))]
    pub async fn provision(&self, name: &QualifiedName) -> Result<Vec<NatGateway>> {
        if !self.discover(name).await?.is_empty() {
            return Err(CloudError::AlreadyExists(format!("NAT gateways of '{}'", name)));
        }

        let networks = self.deployment.networks();
        let (network, created_network) = networks.discover_or_provision(name).await?;

        match self.build(name, &network).await {
            Ok(gateways) => {
                info!(count = gateways.len(), "NAT gateways available");
                Ok(gateways)
            }
            Err(err) => {
                warn!(error = %err, "NAT provisioning failed, rolling back");
                let mut rollback = self.remove_gateways(name).await;
                if rollback.is_ok() && created_network {
                    rollback = networks.destroy(name).await;
                }
                match rollback {
                    Ok(()) => Err(err),
                    Err(secondary) => Err(err.with_compensation_failure(secondary)),
                }
            }
        }
    }

    async fn build(&self, name: &QualifiedName, network: &Network) -> Result<Vec<NatGateway>> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();
        let tags = index.tags(&name.to_string());

        // NAT gateways need a route to the internet themselves
        self.deployment.networks().expose(name).await?;

        let mut gateways = Vec::with_capacity(network.subnets.len());
        for subnet in &network.subnets {
            let allocation_id = provider.allocate_address().await?;
            debug!(allocation = %allocation_id, subnet = %subnet.id, "elastic address allocated");

            let created = retrier
                .create(
                    "nat gateway",
                    async || {
                        provider
                            .create_nat_gateway(&subnet.id, &allocation_id, &subnet.id)
                            .await
                    },
                    async |id: &str| {
                        provider.tag_resources(&[id.to_string()], &tags).await?;
                        let found = provider.describe_nat_gateways(&[Filter::id(id)]).await?;
                        match found.into_iter().next() {
                            Some(g) if g.state == NatGatewayState::Available => Ok(Some(g)),
                            Some(g) if g.state.is_gone() => Err(CloudError::BadEnvironmentState(
                                format!("NAT gateway {} ended up {:?}", g.id, g.state),
                            )),
                            _ => Ok(None),
                        }
                    },
                    async |id: &str| self.delete_gateway(id).await,
                )
                .await;

            match created {
                Ok(gateway) => gateways.push(gateway),
                Err(err) => {
                    return Err(match self.release_address(&allocation_id).await {
                        Ok(()) => err,
                        Err(secondary) => err.with_compensation_failure(secondary),
                    });
                }
            }
        }
        Ok(gateways)
    }

    /// Live NAT gateways of the network
    pub async fn discover(&self, name: &QualifiedName) -> Result<Vec<NatGateway>> {
        self.deployment.index().nat_gateways(&name.to_string()).await
    }

    /// Delete the gateways, release their addresses, then destroy the network.
    #[instrument(skip(self), fields(nat = %name))]
    pub async fn destroy(&self, name: &QualifiedName) -> Result<()> {
        self.remove_gateways(name).await?;
        self.deployment.networks().destroy(name).await
    }

    async fn remove_gateways(&self, name: &QualifiedName) -> Result<()> {
        let gateways = self.discover(name).await?;
        if gateways.is_empty() {
            debug!("no NAT gateways");
            return Ok(());
        }
        for gateway in &gateways {
            self.delete_gateway(&gateway.id).await?;
        }
        for gateway in &gateways {
            if let Some(allocation_id) = &gateway.allocation_id {
                self.release_address(allocation_id).await?;
            }
        }
        Ok(())
    }

    async fn delete_gateway(&self, id: &str) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        retrier
            .delete(&format!("nat gateway {}", id), async || {
                provider.delete_nat_gateway(id).await
            })
            .await?;
        retrier
            .wait_until_absent(&format!("nat gateway {}", id), async || {
                let found = absent_as_empty(provider.describe_nat_gateways(&[Filter::id(id)]).await)?;
                Ok(found.iter().any(|g| !g.state.is_gone()))
            })
            .await
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        let provider = self.deployment.provider();
        self.deployment
            .retrier()
            .delete(&format!("elastic address {}", allocation_id), async || {
                provider.release_address(allocation_id).await
            })
            .await
    }
}
