//! Deployment context shared by every manager

use crate::cidr::Ipv4Cidr;
use crate::datacenter::DatacenterManager;
use crate::dns::DnsManager;
use crate::load_balancer::LoadBalancerManager;
use crate::nat::NatGatewayManager;
use crate::network::NetworkManager;
use crate::provider::CloudProvider;
use crate::retry::{ConsistencyRetrier, RetryConfig};
use crate::service::ServiceManager;
use crate::tags::ResourceTagIndex;
use crate::teardown::Teardown;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Zones used when the provider cannot enumerate its own
pub const FALLBACK_AVAILABILITY_ZONES: [&str; 3] = ["us-east-1a", "us-east-1b", "us-east-1c"];

/// Defaults for datacenters provisioned implicitly by a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatacenterDefaults {
    pub prefix: u8,
    pub include_ranges: Vec<Ipv4Cidr>,
    pub exclude_ranges: Vec<Ipv4Cidr>,
}

impl Default for DatacenterDefaults {
    fn default() -> Self {
        Self {
            prefix: 16,
            include_ranges: vec![Ipv4Cidr::PRIVATE],
            exclude_ranges: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkDefaults {
    pub subnet_prefix: u8,
    pub subnets_per_network: usize,
    /// Used when the provider does not enumerate zones itself
    pub availability_zones: Vec<String>,
}

impl Default for NetworkDefaults {
    fn default() -> Self {
        Self {
            subnet_prefix: 28,
            subnets_per_network: 3,
            availability_zones: FALLBACK_AVAILABILITY_ZONES
                .iter()
                .map(|z| z.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefaults {
    pub capacity: u32,
    /// Fixed instance type; when unset the cheapest fitting type is used
    pub instance_type: Option<String>,
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            capacity: 3,
            instance_type: None,
        }
    }
}

/// Everything a manager needs to know besides the provider itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSettings {
    /// Deployment scope; the value of the deployment tag
    pub name: String,
    pub retry: RetryConfig,
    pub datacenter: DatacenterDefaults,
    pub network: NetworkDefaults,
    pub service: ServiceDefaults,
}

impl DeploymentSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            retry: RetryConfig::default(),
            datacenter: DatacenterDefaults::default(),
            network: NetworkDefaults::default(),
            service: ServiceDefaults::default(),
        }
    }
}

/// An injected provider plus the settings of one deployment scope.
///
/// Cheap to clone; every manager holds its own copy.
#[derive(Clone)]
pub struct Deployment {
    provider: Arc<dyn CloudProvider>,
    settings: Arc<DeploymentSettings>,
    retrier: ConsistencyRetrier,
}

impl Deployment {
    pub fn new(provider: Arc<dyn CloudProvider>, settings: DeploymentSettings) -> Self {
        let retrier = ConsistencyRetrier::new(settings.retry.clone());
        Self {
            provider,
            settings: Arc::new(settings),
            retrier,
        }
    }

    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    pub fn settings(&self) -> &DeploymentSettings {
        &self.settings
    }

    pub fn retrier(&self) -> &ConsistencyRetrier {
        &self.retrier
    }

    pub fn index(&self) -> ResourceTagIndex<'_> {
        ResourceTagIndex::new(self.provider.as_ref(), &self.settings.name)
    }

    pub fn datacenters(&self) -> DatacenterManager {
        DatacenterManager::new(self.clone())
    }

    pub fn networks(&self) -> NetworkManager {
        NetworkManager::new(self.clone())
    }

    pub fn load_balancers(&self) -> LoadBalancerManager {
        LoadBalancerManager::new(self.clone())
    }

    pub fn nat_gateways(&self) -> NatGatewayManager {
        NatGatewayManager::new(self.clone())
    }

    pub fn services(&self) -> ServiceManager {
        ServiceManager::new(self.clone())
    }

    pub fn dns(&self) -> DnsManager {
        DnsManager::new(self.clone())
    }

    pub fn teardown(&self) -> Teardown {
        Teardown::new(self.clone())
    }
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("provider", &self.provider.name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = DeploymentSettings::default();
        assert_eq!(settings.name, "default");
        assert_eq!(settings.datacenter.prefix, 16);
        assert_eq!(
            settings.datacenter.include_ranges,
            vec!["10.0.0.0/8".parse::<Ipv4Cidr>().unwrap()]
        );
        assert_eq!(settings.network.subnets_per_network, 3);
        assert_eq!(settings.network.availability_zones.len(), 3);
        assert_eq!(settings.service.capacity, 3);
        assert_eq!(settings.retry.max_attempts, 60);
    }
}
