//! Load balancers in front of a network
//!
//! Each load balancer owns a network of the same qualified name and a
//! dedicated security group, which stays closed until `expose`. An optional
//! CNAME is recorded in a tag on the balancer so destroy can find it again.
//! A CNAME already in use fails the provision before anything is created,
//! and a rollback only removes a record this provision wrote.

use crate::deployment::Deployment;
use crate::error::{CloudError, Result};
use crate::naming::QualifiedName;
use crate::network::Network;
use crate::resource::{Listener, LoadBalancer, LoadBalancerSpec, SecurityGroup};
use crate::tags::{DNS_TAG, GroupRole};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedLoadBalancer {
    pub name: String,
    /// Provider-side name (dots are not allowed there)
    pub balancer_name: String,
    pub dns_name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_id: Option<String>,
    pub fqdn: Option<String>,
}

pub struct LoadBalancerManager {
    deployment: Deployment,
}

impl LoadBalancerManager {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Provision the network, security group and balancer for `name`,
    /// optionally pointing `dns` at it.
    #[instrument(skip(self), fields(load_balancer = %name))]
    pub async fn provision(
        &self,
        name: &QualifiedName,
        dns: Option<&str>,
    ) -> Result<ManagedLoadBalancer> {
        if let Some(existing) = self.discover(name).await? {
            return Err(CloudError::AlreadyExists(format!(
                "load balancer '{}' ({})",
                name, existing.dns_name
            )));
        }

        if let Some(fqdn) = dns
            && let Some(record) = self.deployment.dns().discover(fqdn).await?
        {
            return Err(CloudError::AlreadyExists(format!(
                "record '{}' -> {}",
                record.fqdn, record.target
            )));
        }

        let networks = self.deployment.networks();
        let (network, created_network) = networks.discover_or_provision(name).await?;

        let mut owns_dns = false;
        match self.build(name, &network, dns, &mut owns_dns).await {
            Ok(balancer) => Ok(balancer),
            Err(err) => {
                warn!(error = %err, owns_dns, "load balancer provisioning failed, rolling back");
                let rollback = self.remove(name, owns_dns, created_network).await;
                match rollback {
                    Ok(()) => Err(err),
                    Err(secondary) => Err(err.with_compensation_failure(secondary)),
                }
            }
        }
    }

    async fn build(
        &self,
        name: &QualifiedName,
        network: &Network,
        dns: Option<&str>,
        owns_dns: &mut bool,
    ) -> Result<ManagedLoadBalancer> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();
        let networks = self.deployment.networks();
        let component = name.to_string();

        networks.expose(name).await?;
        let group = networks
            .create_security_group(
                name,
                GroupRole::LoadBalancer,
                network,
                &format!("load balancer {}", name),
            )
            .await?;

        let mut tags = index.tags(&component);
        if let Some(fqdn) = dns {
            tags.insert(DNS_TAG.to_string(), fqdn.to_string());
        }
        let spec = LoadBalancerSpec {
            name: name.resource_name(),
            subnet_ids: network.subnet_ids(),
            security_group_ids: vec![group.id.clone()],
            listeners: vec![Listener::http(80)],
            tags,
        };

        let balancer = retrier
            .create(
                "load balancer",
                async || {
                    provider.create_load_balancer(&spec).await?;
                    Ok(spec.name.clone())
                },
                async |id: &str| {
                    let found = index.load_balancer(&component).await?;
                    Ok(found.filter(|lb| lb.name == id))
                },
                async |id: &str| {
                    retrier
                        .delete(&format!("load balancer {}", id), async || {
                            provider.delete_load_balancer(id).await
                        })
                        .await
                },
            )
            .await?;

        if let Some(fqdn) = dns {
            // Someone else may have claimed the name since the check above
            *owns_dns = true;
            if let Err(err) = self.deployment.dns().provision(fqdn, &balancer.dns_name).await {
                if matches!(err, CloudError::AlreadyExists(_)) {
                    *owns_dns = false;
                }
                return Err(err);
            }
        }

        info!(dns_name = %balancer.dns_name, "load balancer provisioned");
        Ok(managed(name, balancer, Some(group)))
    }

    pub async fn discover(&self, name: &QualifiedName) -> Result<Option<ManagedLoadBalancer>> {
        let index = self.deployment.index();
        let component = name.to_string();
        let Some(balancer) = index.load_balancer(&component).await? else {
            return Ok(None);
        };
        let group = index.security_group(&component, GroupRole::LoadBalancer).await?;
        Ok(Some(managed(name, balancer, group)))
    }

    /// Open the balancer's security group to all ingress.
    #[instrument(skip(self), fields(load_balancer = %name))]
    pub async fn expose(&self, name: &QualifiedName) -> Result<SecurityGroup> {
        if self.discover(name).await?.is_none() {
            return Err(CloudError::NotFound(format!("load balancer '{}'", name)));
        }
        self.deployment
            .networks()
            .open_security_group(name, GroupRole::LoadBalancer)
            .await
    }

    /// DNS record, balancer, security group, then the network.
    #[instrument(skip(self), fields(load_balancer = %name))]
    pub async fn destroy(&self, name: &QualifiedName) -> Result<()> {
        self.remove(name, true, true).await
    }

    async fn remove(&self, name: &QualifiedName, with_dns: bool, with_network: bool) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();
        let component = name.to_string();

        if let Some(balancer) = index.load_balancer(&component).await? {
            if let Some(fqdn) = balancer.tags.get(DNS_TAG)
                && with_dns
            {
                self.deployment.dns().destroy(fqdn).await?;
            }
            retrier
                .delete(&format!("load balancer {}", balancer.name), async || {
                    provider.delete_load_balancer(&balancer.name).await
                })
                .await?;
            retrier
                .wait_until_absent(&format!("load balancer {}", balancer.name), async || {
                    Ok(index.load_balancer(&component).await?.is_some())
                })
                .await?;
        } else {
            debug!("no load balancer");
        }

        let networks = self.deployment.networks();
        networks
            .destroy_security_groups(name, GroupRole::LoadBalancer)
            .await?;
        if with_network {
            networks.destroy(name).await?;
        }
        Ok(())
    }
}

fn managed(
    name: &QualifiedName,
    balancer: LoadBalancer,
    group: Option<SecurityGroup>,
) -> ManagedLoadBalancer {
    ManagedLoadBalancer {
        name: name.to_string(),
        fqdn: balancer.tags.get(DNS_TAG).cloned(),
        balancer_name: balancer.name,
        dns_name: balancer.dns_name,
        subnet_ids: balancer.subnet_ids,
        security_group_id: group.map(|g| g.id),
    }
}
