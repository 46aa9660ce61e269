//! AWS provider for the cloud deployer
//!
//! This crate implements the `CloudProvider` trait on top of the AWS SDK:
//! EC2 for VPCs, subnets, routing, gateways, elastic addresses and security
//! groups; Classic ELB; Auto Scaling with launch configurations; Route 53.
//!
//! # Requirements
//!
//! - Credentials resolvable by the standard SDK chain (environment, profile,
//!   instance role)
//! - A region, either configured or passed to [`AwsProvider::from_env`]
//!
//! # Example
//!
//! ```ignore
//! use deployer_cloud::{Deployment, DeploymentSettings};
//! use deployer_cloud_aws::AwsProvider;
//! use std::sync::Arc;
//!
//! let provider = AwsProvider::from_env(Some("us-east-1")).await;
//! let deployment = Deployment::new(Arc::new(provider), DeploymentSettings::new("staging"));
//! let network = deployment.networks().provision(&"dc-a.public".parse()?).await?;
//! ```

mod convert;
pub mod error;
pub mod provider;

pub use error::{AwsError, classify_code};
pub use provider::AwsProvider;
