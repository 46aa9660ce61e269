#![allow(dead_code)]

use deployer_cloud::resource::ResourceKind;
use deployer_cloud::{Deployment, DeploymentSettings, QualifiedName, RetryConfig, SandboxProvider};
use std::sync::Arc;
use std::time::Duration;

/// Attempts per operation in tests; time is paused so delays cost nothing
pub const ATTEMPTS: u32 = 10;

pub struct TestDeployment {
    pub sandbox: Arc<SandboxProvider>,
    pub deployment: Deployment,
}

impl TestDeployment {
    pub fn new() -> Self {
        Self::with_sandbox(SandboxProvider::new())
    }

    pub fn with_sandbox(sandbox: SandboxProvider) -> Self {
        Self::with_settings(sandbox, DeploymentSettings::new("test"))
    }

    pub fn with_settings(sandbox: SandboxProvider, settings: DeploymentSettings) -> Self {
        let sandbox = Arc::new(sandbox);
        let settings = settings.with_retry(RetryConfig::new(ATTEMPTS, Duration::from_secs(1)));
        let deployment = Deployment::new(sandbox.clone(), settings);
        Self {
            sandbox,
            deployment,
        }
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.sandbox.count(kind)
    }

    /// Nothing left at all, addresses included
    pub fn assert_empty(&self) {
        for kind in [
            ResourceKind::Vpc,
            ResourceKind::Subnet,
            ResourceKind::RouteTable,
            ResourceKind::InternetGateway,
            ResourceKind::NatGateway,
            ResourceKind::SecurityGroup,
            ResourceKind::LoadBalancer,
            ResourceKind::LaunchConfiguration,
            ResourceKind::AutoScalingGroup,
            ResourceKind::HostedZone,
        ] {
            assert_eq!(self.count(kind), 0, "{} left behind", kind);
        }
        assert_eq!(self.sandbox.address_count(), 0, "elastic addresses left behind");
    }
}

pub fn qualified(s: &str) -> QualifiedName {
    s.parse().unwrap()
}
