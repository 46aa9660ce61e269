//! Cloud Deployer orchestration engine
//!
//! Provisions and tears down layered cloud infrastructure: datacenters
//! (VPCs), networks of subnets, load balancers, NAT gateways, autoscaled
//! compute services and the DNS records in front of them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  deployer CLI                    │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 deployer-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Managers: datacenter / network / lb /    │   │
//! │  │  nat / service / dns / teardown           │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Tag index   │  │   Retrier    │            │
//! │  └──────────────┘  └──────────────┘            │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait CloudProvider { ... }              │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │    sandbox    │ │      aws      │
//! │   (in-memory) │ │ (deployer-    │
//! │               │ │  cloud-aws)   │
//! └───────────────┘ └───────────────┘
//! ```
//!
//! No local state is kept: every resource carries a deployment tag and a
//! component tag, and every operation re-reads the provider.

pub mod cidr;
pub mod datacenter;
pub mod deployment;
pub mod dns;
pub mod error;
pub mod load_balancer;
pub mod naming;
pub mod nat;
pub mod network;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod sandbox;
pub mod service;
pub mod tags;
pub mod teardown;

// Re-exports
pub use cidr::Ipv4Cidr;
pub use datacenter::{Datacenter, DatacenterManager};
pub use deployment::{
    DatacenterDefaults, Deployment, DeploymentSettings, FALLBACK_AVAILABILITY_ZONES,
    NetworkDefaults, ServiceDefaults,
};
pub use dns::{DnsManager, DnsRecord};
pub use error::{CloudError, ErrorClass, ProviderError, Result};
pub use load_balancer::{LoadBalancerManager, ManagedLoadBalancer};
pub use naming::QualifiedName;
pub use nat::NatGatewayManager;
pub use network::{Network, NetworkManager, NetworkSubnet};
pub use provider::{CloudProvider, Filter};
pub use resource::{ResourceKind, Tags};
pub use retry::{ConsistencyRetrier, RetryConfig};
pub use sandbox::SandboxProvider;
pub use service::{ComputeService, ImageArtifact, InstanceRequirements, ServiceManager};
pub use tags::{GroupRole, ResourceTagIndex};
pub use teardown::{Stage, Teardown, TeardownReport, TeardownStep};
