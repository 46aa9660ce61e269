//! Networks: subnets and route tables carved out of a datacenter
//!
//! A network is addressed by its qualified name `<datacenter>.<network>`.
//! Every subnet gets its own route table, so exposing a network to the
//! internet is a per-table default route through the datacenter's single
//! internet gateway. Gateways are shared between sibling networks and are
//! released only once no route table in the datacenter points at them.

use crate::cidr::{Ipv4Cidr, allocate};
use crate::datacenter::Datacenter;
use crate::deployment::Deployment;
use crate::error::{CloudError, Result};
use crate::naming::QualifiedName;
use crate::provider::Filter;
use crate::resource::{ResourceKind, RouteTable, RouteTarget, SecurityGroup, Subnet};
use crate::tags::{GroupRole, ROLE_TAG, absent_as_empty, expect_singleton};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSubnet {
    pub id: String,
    pub cidr: Ipv4Cidr,
    pub availability_zone: String,
    pub route_table_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub datacenter_id: String,
    /// Ordered by CIDR
    pub subnets: Vec<NetworkSubnet>,
}

impl Network {
    pub fn subnet_ids(&self) -> Vec<String> {
        self.subnets.iter().map(|s| s.id.clone()).collect()
    }
}

pub struct NetworkManager {
    deployment: Deployment,
}

impl NetworkManager {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Carve a new network, provisioning its datacenter if needed.
    ///
    /// Anything created before a failure is torn down again, including the
    /// datacenter when this call created it.
    #[instrument(skip(self), fields(network = %name))]
    pub async fn provision(&self, name: &QualifiedName) -> Result<Network> {
        if self.discover(name).await?.is_some() {
            return Err(CloudError::AlreadyExists(format!("network '{}'", name)));
        }

        let datacenters = self.deployment.datacenters();
        let (datacenter, created_datacenter) = match datacenters.discover(name.datacenter()).await? {
            Some(datacenter) => (datacenter, false),
            None => {
                info!(datacenter = name.datacenter(), "datacenter absent, provisioning it");
                (datacenters.provision_default(name.datacenter()).await?, true)
            }
        };

        match self.carve(name, &datacenter).await {
            Ok(network) => {
                info!(subnets = network.subnets.len(), "network provisioned");
                Ok(network)
            }
            Err(err) => {
                warn!(error = %err, "network provisioning failed, rolling back");
                let mut rollback = self.remove_resources(name).await;
                if rollback.is_ok() && created_datacenter {
                    rollback = datacenters.destroy_by_id(&datacenter.id).await;
                }
                match rollback {
                    Ok(()) => Err(err),
                    Err(secondary) => Err(err.with_compensation_failure(secondary)),
                }
            }
        }
    }

    async fn carve(&self, name: &QualifiedName, datacenter: &Datacenter) -> Result<Network> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();
        let settings = &self.deployment.settings().network;
        let component = name.to_string();
        let tags = index.tags(&component);

        let zones = self.availability_zones().await;
        let count = settings.subnets_per_network.min(zones.len());
        if count == 0 {
            return Err(CloudError::BadEnvironmentState(
                "no availability zones to place subnets in".to_string(),
            ));
        }

        let existing: Vec<Ipv4Cidr> = provider
            .describe_subnets(&[Filter::vpc(&datacenter.id)])
            .await?
            .into_iter()
            .map(|subnet| subnet.cidr)
            .collect();
        let blocks = allocate(datacenter.cidr, settings.subnet_prefix, &existing, count)?;

        let mut subnets = Vec::with_capacity(count);
        for (cidr, zone) in blocks.into_iter().zip(zones) {
            let subnet = retrier
                .create(
                    "subnet",
                    async || provider.create_subnet(&datacenter.id, cidr, &zone).await,
                    async |id: &str| {
                        provider.tag_resources(&[id.to_string()], &tags).await?;
                        let mut filters = index.filters(&component);
                        filters.push(Filter::id(id));
                        Ok(provider.describe_subnets(&filters).await?.into_iter().next())
                    },
                    async |id: &str| {
                        retrier
                            .delete(&format!("subnet {}", id), async || provider.delete_subnet(id).await)
                            .await
                    },
                )
                .await?;

            let table = retrier
                .create(
                    "route table",
                    async || provider.create_route_table(&datacenter.id).await,
                    async |id: &str| {
                        provider.tag_resources(&[id.to_string()], &tags).await?;
                        let mut filters = index.filters(&component);
                        filters.push(Filter::id(id));
                        Ok(provider.describe_route_tables(&filters).await?.into_iter().next())
                    },
                    async |id: &str| {
                        retrier
                            .delete(&format!("route table {}", id), async || {
                                provider.delete_route_table(id).await
                            })
                            .await
                    },
                )
                .await?;

            retrier
                .poll(&format!("associate {} with {}", table.id, subnet.id), async || {
                    match provider.associate_route_table(&table.id, &subnet.id).await {
                        Ok(association) => Ok(Some(association)),
                        Err(e) if e.is_already_absent() => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await?;
            debug!(subnet = %subnet.id, route_table = %table.id, cidr = %cidr, "subnet ready");

            subnets.push(NetworkSubnet {
                id: subnet.id,
                cidr: subnet.cidr,
                availability_zone: subnet.availability_zone,
                route_table_id: Some(table.id),
            });
        }

        Ok(Network {
            name: component,
            datacenter_id: datacenter.id.clone(),
            subnets,
        })
    }

    async fn availability_zones(&self) -> Vec<String> {
        let fallback = &self.deployment.settings().network.availability_zones;
        match self.deployment.provider().availability_zones().await {
            Ok(zones) if !zones.is_empty() => zones,
            Ok(_) => fallback.clone(),
            Err(e) => {
                debug!(error = %e, "zone enumeration unavailable, using configured zones");
                fallback.clone()
            }
        }
    }

    /// Subnets tagged with the network, all within one datacenter.
    pub async fn discover(&self, name: &QualifiedName) -> Result<Option<Network>> {
        let component = name.to_string();
        let mut subnets = self.deployment.index().subnets(&component).await?;
        if subnets.is_empty() {
            return Ok(None);
        }

        let vpc_ids: BTreeSet<&str> = subnets.iter().map(|s| s.vpc_id.as_str()).collect();
        if vpc_ids.len() > 1 {
            return Err(CloudError::BadEnvironmentState(format!(
                "network '{}' spans {} datacenters",
                name,
                vpc_ids.len()
            )));
        }
        let datacenter_id = subnets[0].vpc_id.clone();

        subnets.sort_by_key(|s| s.cidr);
        let mut network_subnets = Vec::with_capacity(subnets.len());
        for subnet in subnets {
            let table = self.route_table_of(&subnet).await?;
            network_subnets.push(NetworkSubnet {
                id: subnet.id,
                cidr: subnet.cidr,
                availability_zone: subnet.availability_zone,
                route_table_id: table.map(|t| t.id),
            });
        }

        Ok(Some(Network {
            name: component,
            datacenter_id,
            subnets: network_subnets,
        }))
    }

    /// The explicit (non-main) route table of a subnet, if any
    async fn route_table_of(&self, subnet: &Subnet) -> Result<Option<RouteTable>> {
        let tables = self
            .deployment
            .provider()
            .describe_route_tables(&[Filter::subnet(&subnet.id)])
            .await?;
        let tables: Vec<RouteTable> = tables.into_iter().filter(|t| !t.main).collect();
        expect_singleton(ResourceKind::RouteTable, &subnet.id, tables)
    }

    /// Route the whole network to the internet.
    ///
    /// Makes sure the datacenter has exactly one internet gateway attached,
    /// creating it if needed, and gives every subnet's route table a default
    /// route through it. Returns the gateway id.
    #[instrument(skip(self), fields(network = %name))]
    pub async fn expose(&self, name: &QualifiedName) -> Result<String> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();

        let network = self
            .discover(name)
            .await?
            .ok_or_else(|| CloudError::NotFound(format!("network '{}'", name)))?;
        let gateway_id = self
            .ensure_internet_gateway(name.datacenter(), &network.datacenter_id)
            .await?;
        let target = RouteTarget::InternetGateway(gateway_id.clone());

        for subnet in &network.subnets {
            let table_id = subnet.route_table_id.as_deref().ok_or_else(|| {
                CloudError::BadEnvironmentState(format!(
                    "subnet {} of '{}' has no route table",
                    subnet.id, name
                ))
            })?;

            if self.routes_through(table_id, &target).await? {
                debug!(route_table = table_id, "default route already present");
                continue;
            }

            retrier
                .poll(&format!("default route in {}", table_id), async || {
                    match provider.create_route(table_id, Ipv4Cidr::ANYWHERE, &target).await {
                        Ok(()) => Ok(Some(())),
                        Err(e) if e.is_already_absent() => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await?;
            retrier
                .poll(&format!("default route in {} visible", table_id), async || {
                    Ok(self.routes_through(table_id, &target).await?.then_some(()))
                })
                .await?;
            info!(route_table = table_id, gateway = %gateway_id, "default route added");
        }

        Ok(gateway_id)
    }

    async fn routes_through(&self, table_id: &str, target: &RouteTarget) -> Result<bool> {
        let tables = self
            .deployment
            .provider()
            .describe_route_tables(&[Filter::id(table_id)])
            .await?;
        Ok(tables.iter().any(|t| t.references(target)))
    }

    async fn ensure_internet_gateway(&self, datacenter: &str, vpc_id: &str) -> Result<String> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();

        let attached = provider
            .describe_internet_gateways(&[Filter::attached_to(vpc_id)])
            .await?;
        match attached.len() {
            0 => {}
            1 => return Ok(attached[0].id.clone()),
            n => {
                return Err(CloudError::BadEnvironmentState(format!(
                    "datacenter '{}' has {} internet gateways attached",
                    datacenter, n
                )));
            }
        }

        let tags = index.tags(datacenter);
        let gateway_id = retrier
            .create(
                "internet gateway",
                async || provider.create_internet_gateway().await,
                async |id: &str| {
                    provider.tag_resources(&[id.to_string()], &tags).await?;
                    let found = provider.describe_internet_gateways(&[Filter::id(id)]).await?;
                    Ok(found.into_iter().next().map(|g| g.id))
                },
                async |id: &str| {
                    retrier
                        .delete(&format!("internet gateway {}", id), async || {
                            provider.delete_internet_gateway(id).await
                        })
                        .await
                },
            )
            .await?;

        let attached = async {
            retrier
                .poll(&format!("attach {} to {}", gateway_id, vpc_id), async || {
                    match provider.attach_internet_gateway(&gateway_id, vpc_id).await {
                        Ok(()) => Ok(Some(())),
                        Err(e) if e.is_already_absent() => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await?;
            retrier
                .poll(&format!("{} attached", gateway_id), async || {
                    let found = provider
                        .describe_internet_gateways(&[Filter::attached_to(vpc_id)])
                        .await?;
                    Ok(found.iter().any(|g| g.id == gateway_id).then_some(()))
                })
                .await
        }
        .await;

        if let Err(err) = attached {
            warn!(gateway = %gateway_id, error = %err, "attach failed, deleting gateway");
            let cleanup = self
                .deployment
                .datacenters()
                .release_internet_gateway(&gateway_id, vpc_id)
                .await;
            return Err(match cleanup {
                Ok(()) => err,
                Err(secondary) => err.with_compensation_failure(secondary),
            });
        }

        info!(gateway = %gateway_id, datacenter, "internet gateway attached");
        Ok(gateway_id)
    }

    /// Tear down the network; cascades into the datacenter once it holds no
    /// subnets. Absent networks are a no-op.
    #[instrument(skip(self), fields(network = %name))]
    pub async fn destroy(&self, name: &QualifiedName) -> Result<()> {
        let component = name.to_string();
        let index = self.deployment.index();
        let subnets = index.subnets(&component).await?;
        let tables = index.route_tables(&component).await?;
        if subnets.is_empty() && tables.is_empty() {
            debug!("already absent");
            return Ok(());
        }

        let vpc_id = subnets
            .first()
            .map(|s| s.vpc_id.clone())
            .or_else(|| tables.first().map(|t| t.vpc_id.clone()));

        self.remove_resources(name).await?;

        if let Some(vpc_id) = vpc_id {
            let remaining = self
                .deployment
                .provider()
                .describe_subnets(&[Filter::vpc(&vpc_id)])
                .await?;
            if remaining.is_empty() {
                info!(vpc = %vpc_id, "datacenter is empty, destroying it");
                self.deployment.datacenters().destroy_by_id(&vpc_id).await?;
            } else {
                debug!(vpc = %vpc_id, subnets = remaining.len(), "datacenter still in use");
            }
        }
        Ok(())
    }

    /// Delete route tables, unreferenced internet gateways and subnets of a
    /// network, leaving the datacenter alone.
    async fn remove_resources(&self, name: &QualifiedName) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();
        let component = name.to_string();

        let subnets = index.subnets(&component).await?;

        // Tagged tables plus whatever is associated with our subnets
        let mut tables: BTreeMap<String, RouteTable> = index
            .route_tables(&component)
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        for subnet in &subnets {
            if let Some(table) = self.route_table_of(subnet).await? {
                tables.entry(table.id.clone()).or_insert(table);
            }
        }

        let mut released: BTreeMap<String, String> = BTreeMap::new();
        for table in tables.values() {
            for target in table.gateway_targets() {
                if let RouteTarget::InternetGateway(id) = target {
                    released.insert(id.clone(), table.vpc_id.clone());
                }
            }
            for association in &table.associations {
                retrier
                    .delete(&format!("association {}", association.id), async || {
                        provider.disassociate_route_table(&association.id).await
                    })
                    .await?;
            }
            retrier
                .delete(&format!("route table {}", table.id), async || {
                    provider.delete_route_table(&table.id).await
                })
                .await?;
        }

        for (gateway_id, vpc_id) in &released {
            let target = RouteTarget::InternetGateway(gateway_id.clone());
            let still_routed = provider
                .describe_route_tables(&[Filter::vpc(vpc_id)])
                .await?
                .iter()
                .any(|t| t.references(&target));
            if still_routed {
                info!(gateway = %gateway_id, "gateway still referenced by a sibling network");
                continue;
            }
            info!(gateway = %gateway_id, "last reference gone, releasing gateway");
            self.deployment
                .datacenters()
                .release_internet_gateway(gateway_id, vpc_id)
                .await?;
        }

        for subnet in &subnets {
            retrier
                .delete(&format!("subnet {}", subnet.id), async || {
                    provider.delete_subnet(&subnet.id).await
                })
                .await?;
        }
        retrier
            .wait_until_absent(&format!("subnets of {}", name), async || {
                Ok(!index.subnets(&component).await?.is_empty())
            })
            .await
    }

    /// Whether all `subnet_ids` exist and live in the same datacenter.
    pub async fn colocated(&self, subnet_ids: &[String]) -> Result<bool> {
        let provider = self.deployment.provider();
        let mut vpc_ids = BTreeSet::new();
        for id in subnet_ids {
            let found = absent_as_empty(provider.describe_subnets(&[Filter::id(id)]).await)?;
            match found.first() {
                Some(subnet) => {
                    vpc_ids.insert(subnet.vpc_id.clone());
                }
                None => return Ok(false),
            }
        }
        Ok(vpc_ids.len() <= 1)
    }

    /// Create the single security group `role` owns in a network, named
    /// `<resource name>-<role>`.
    pub async fn create_security_group(
        &self,
        name: &QualifiedName,
        role: GroupRole,
        network: &Network,
        description: &str,
    ) -> Result<SecurityGroup> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();
        let component = name.to_string();
        let mut tags = index.tags(&component);
        tags.insert(ROLE_TAG.to_string(), role.as_str().to_string());
        let group_name = format!("{}-{}", name.resource_name(), role.as_str());

        retrier
            .create(
                "security group",
                async || {
                    provider
                        .create_security_group(&network.datacenter_id, &group_name, description)
                        .await
                },
                async |id: &str| {
                    provider.tag_resources(&[id.to_string()], &tags).await?;
                    let found = index.security_group(&component, role).await?;
                    Ok(found.filter(|g| g.id == id))
                },
                async |id: &str| {
                    retrier
                        .delete(&format!("security group {}", id), async || {
                            provider.delete_security_group(id).await
                        })
                        .await
                },
            )
            .await
    }

    /// Open the security group `role` owns to all ingress. Exactly one group
    /// must exist.
    pub async fn open_security_group(
        &self,
        name: &QualifiedName,
        role: GroupRole,
    ) -> Result<SecurityGroup> {
        let provider = self.deployment.provider();
        let index = self.deployment.index();
        let component = name.to_string();

        let groups = index.security_groups(&component, role).await?;
        let group = match <[SecurityGroup; 1]>::try_from(groups) {
            Ok([group]) => group,
            Err(groups) => {
                return Err(CloudError::BadEnvironmentState(format!(
                    "expected exactly one security group for '{}', found {}",
                    name,
                    groups.len()
                )));
            }
        };
        if group.open_to_world {
            debug!(group = %group.id, "already open");
            return Ok(group);
        }

        provider.authorize_ingress_from_anywhere(&group.id).await?;
        let opened = self
            .deployment
            .retrier()
            .poll(&format!("ingress on {}", group.id), async || {
                let found = provider
                    .describe_security_groups(&[Filter::id(&group.id)])
                    .await?;
                Ok(found.into_iter().find(|g| g.open_to_world))
            })
            .await?;
        info!(group = %opened.id, network = %name, "opened to all ingress");
        Ok(opened)
    }

    /// Delete every security group `role` owns in the network.
    pub async fn destroy_security_groups(&self, name: &QualifiedName, role: GroupRole) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        for group in self
            .deployment
            .index()
            .security_groups(&name.to_string(), role)
            .await? {
            retrier
                .delete(&format!("security group {}", group.id), async || {
                    provider.delete_security_group(&group.id).await
                })
                .await?;
        }
        Ok(())
    }

    /// Discover the network, or provision it when absent. The flag says
    /// whether this call created it.
    pub(crate) async fn discover_or_provision(&self, name: &QualifiedName) -> Result<(Network, bool)> {
        match self.discover(name).await? {
            Some(network) => Ok((network, false)),
            None => Ok((self.provision(name).await?, true)),
        }
    }
}
