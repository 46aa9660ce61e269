//! Leaf-first teardown of a whole deployment
//!
//! Destroy always runs from the leaves towards the datacenter:
//! DNS records, then load balancers, services and NAT gateways, then
//! networks (subnets, route tables and any gateway they were the last to
//! reference), then datacenters. Every step is a no-op on an absent target,
//! so a teardown that stopped halfway can simply be run again.

use crate::deployment::Deployment;
use crate::error::Result;
use crate::naming::QualifiedName;
use crate::tags::{DNS_TAG, component_of};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

/// One level of the teardown order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    DnsRecord,
    LoadBalancer,
    ComputeService,
    NatGateway,
    Network,
    Datacenter,
}

impl Stage {
    /// Leaf first
    pub const ORDER: [Stage; 6] = [
        Stage::DnsRecord,
        Stage::LoadBalancer,
        Stage::ComputeService,
        Stage::NatGateway,
        Stage::Network,
        Stage::Datacenter,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::DnsRecord => "dns",
            Stage::LoadBalancer => "load-balancer",
            Stage::ComputeService => "service",
            Stage::NatGateway => "nat",
            Stage::Network => "network",
            Stage::Datacenter => "datacenter",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of destroying one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownStep {
    pub stage: Stage,
    pub target: String,
    /// Error message if the destroy failed
    pub error: Option<String>,
}

/// Result of a teardown run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Successfully destroyed targets
    pub destroyed: Vec<TeardownStep>,

    /// Targets whose destroy failed
    pub failed: Vec<TeardownStep>,

    /// Stage the run stopped at because something in it failed
    pub halted_at: Option<Stage>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, stage: Stage, target: String) {
        self.destroyed.push(TeardownStep {
            stage,
            target,
            error: None,
        });
    }

    pub fn add_failure(&mut self, stage: Stage, target: String, error: String) {
        self.failed.push(TeardownStep {
            stage,
            target,
            error: Some(error),
        });
    }
}

pub struct Teardown {
    deployment: Deployment,
}

impl Teardown {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Destroy everything tagged with this deployment, stage by stage.
    ///
    /// Within a stage every target is attempted; a failed stage stops the
    /// run since everything above it would only fail on dependencies.
    #[instrument(skip(self), fields(deployment = %self.deployment.settings().name))]
    pub async fn destroy_deployment(&self) -> Result<TeardownReport> {
        let start = Instant::now();
        let mut report = TeardownReport::new();

        for stage in Stage::ORDER {
            let targets = self.targets(stage).await?;
            if targets.is_empty() {
                continue;
            }
            info!(%stage, count = targets.len(), "tearing down");

            let mut stage_failed = false;
            for target in targets {
                match self.destroy(stage, &target).await {
                    Ok(()) => report.add_success(stage, target),
                    Err(e) => {
                        error!(%stage, target = %target, error = %e, "destroy failed");
                        report.add_failure(stage, target, e.to_string());
                        stage_failed = true;
                    }
                }
            }

            if stage_failed {
                warn!(%stage, "halting teardown, later stages depend on this one");
                report.halted_at = Some(stage);
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// What currently exists at `stage`, re-read from the provider
    async fn targets(&self, stage: Stage) -> Result<Vec<String>> {
        let index = self.deployment.index();
        let targets: BTreeSet<String> = match stage {
            Stage::DnsRecord => index
                .load_balancers()
                .await?
                .into_iter()
                .filter_map(|lb| lb.tags.get(DNS_TAG).cloned())
                .collect(),
            Stage::LoadBalancer => index
                .load_balancers()
                .await?
                .iter()
                .filter_map(|lb| component_of(&lb.tags).map(str::to_string))
                .collect(),
            Stage::ComputeService => index
                .auto_scaling_groups()
                .await?
                .iter()
                .filter_map(|g| component_of(&g.tags).map(str::to_string))
                .collect(),
            Stage::NatGateway => index
                .all_nat_gateways()
                .await?
                .iter()
                .filter_map(|g| component_of(&g.tags).map(str::to_string))
                .collect(),
            Stage::Network => index
                .all_subnets()
                .await?
                .iter()
                .filter_map(|s| component_of(&s.tags).map(str::to_string))
                .collect(),
            Stage::Datacenter => self
                .deployment
                .datacenters()
                .list()
                .await?
                .into_iter()
                .map(|dc| dc.name)
                .collect(),
        };
        Ok(targets.into_iter().collect())
    }

    async fn destroy(&self, stage: Stage, target: &str) -> Result<()> {
        match stage {
            Stage::DnsRecord => self.deployment.dns().destroy(target).await,
            Stage::LoadBalancer => {
                let name: QualifiedName = target.parse()?;
                self.deployment.load_balancers().destroy(&name).await
            }
            Stage::ComputeService => {
                let name: QualifiedName = target.parse()?;
                self.deployment.services().destroy(&name).await
            }
            Stage::NatGateway => {
                let name: QualifiedName = target.parse()?;
                self.deployment.nat_gateways().destroy(&name).await
            }
            Stage::Network => {
                let name: QualifiedName = target.parse()?;
                self.deployment.networks().destroy(&name).await
            }
            Stage::Datacenter => self.deployment.datacenters().destroy(target).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_leaf_first() {
        assert_eq!(Stage::ORDER.first(), Some(&Stage::DnsRecord));
        assert_eq!(Stage::ORDER.last(), Some(&Stage::Datacenter));
        let network = Stage::ORDER.iter().position(|s| *s == Stage::Network);
        let nat = Stage::ORDER.iter().position(|s| *s == Stage::NatGateway);
        assert!(nat < network);
    }

    #[test]
    fn test_report_tracks_failures() {
        let mut report = TeardownReport::new();
        report.add_success(Stage::Network, "dc-a.public".to_string());
        assert!(report.is_success());
        report.add_failure(Stage::Datacenter, "dc-a".to_string(), "boom".to_string());
        assert!(!report.is_success());
        assert_eq!(report.failed[0].error.as_deref(), Some("boom"));
    }
}
