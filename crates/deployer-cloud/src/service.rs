//! Compute services: an autoscaling group of instances booted from an
//! externally built image, optionally registered with a load balancer.

use crate::deployment::Deployment;
use crate::error::{CloudError, Result};
use crate::naming::QualifiedName;
use crate::network::Network;
use crate::provider::Filter;
use crate::tags::GroupRole;
use crate::resource::{
    AutoScalingGroup, AutoScalingGroupSpec, HealthCheck, LaunchConfigurationSpec, SecurityGroup,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Seconds a fresh instance gets before load balancer health checks count
const HEALTH_CHECK_GRACE_PERIOD_SECS: u32 = 120;

/// Where the bootstrap script checks out the playbook repository
const PLAYBOOK_CHECKOUT: &str = "/opt/ansible-cloud-init/repo";

/// Output of the image build pipeline.
///
/// The engine never looks inside: the image id goes into the launch
/// configuration and the script becomes the instance user data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub image_id: String,
    pub bootstrap_script: String,
}

impl ImageArtifact {
    pub fn new(image_id: impl Into<String>, bootstrap_script: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            bootstrap_script: bootstrap_script.into(),
        }
    }

    /// An artifact whose instances pull and apply an ansible playbook from
    /// `repo` on first boot.
    pub fn with_playbook(image_id: impl Into<String>, repo: &str) -> Self {
        let script = format!(
            "#!/bin/bash\n\
             set -euo pipefail\n\
             rm -rf {checkout}\n\
             mkdir -p {checkout}\n\
             git clone {repo} {checkout}\n\
             cd {checkout}\n\
             ansible-playbook -i localhost, --connection=local playbook.yml\n",
            checkout = PLAYBOOK_CHECKOUT,
            repo = repo,
        );
        Self::new(image_id, script)
    }
}

/// Minimum resources an instance must offer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequirements {
    pub cpus: Option<u32>,
    pub memory_gib: Option<f64>,
    pub storage_gib: Option<u32>,
}

impl InstanceRequirements {
    pub fn is_empty(&self) -> bool {
        self.cpus.is_none() && self.memory_gib.is_none() && self.storage_gib.is_none()
    }
}

/// (type, vCPUs, memory GiB), cheapest first
const INSTANCE_TYPES: &[(&str, u32, f64)] = &[
    ("t2.micro", 1, 1.0),
    ("t2.small", 1, 2.0),
    ("t2.medium", 2, 4.0),
    ("t2.large", 2, 8.0),
    ("m5.large", 2, 8.0),
    ("m5.xlarge", 4, 16.0),
    ("m5.2xlarge", 8, 32.0),
    ("m5.4xlarge", 16, 64.0),
];

/// Cheapest instance type satisfying `requirements`.
///
/// Storage is EBS-backed on every listed type, so any size fits.
pub fn fit_instance_type(requirements: &InstanceRequirements) -> Result<&'static str> {
    INSTANCE_TYPES
        .iter()
        .find(|(_, cpus, memory)| {
            requirements.cpus.is_none_or(|wanted| *cpus >= wanted)
                && requirements.memory_gib.is_none_or(|wanted| *memory >= wanted)
        })
        .map(|(name, _, _)| *name)
        .ok_or_else(|| {
            CloudError::Unsupported(format!("no instance type fits {:?}", requirements))
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeService {
    pub name: String,
    pub launch_configuration: Option<String>,
    pub auto_scaling_group: String,
    pub subnet_ids: Vec<String>,
    pub load_balancers: Vec<String>,
    pub security_group_id: Option<String>,
    pub desired_capacity: u32,
}

impl ComputeService {
    fn from_group(name: &QualifiedName, group: AutoScalingGroup, security: Option<SecurityGroup>) -> Self {
        Self {
            name: name.to_string(),
            launch_configuration: group.launch_configuration,
            auto_scaling_group: group.name,
            subnet_ids: group.subnet_ids,
            load_balancers: group.load_balancers,
            security_group_id: security.map(|g| g.id),
            desired_capacity: group.desired_capacity,
        }
    }
}

pub struct ServiceManager {
    deployment: Deployment,
}

impl ServiceManager {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Boot `image` into an autoscaling group on the network `name`.
    #[instrument(skip(self, image), fields(service = %name, image = %image.image_id))]
    pub async fn provision(
        &self,
        name: &QualifiedName,
        image: &ImageArtifact,
        load_balancer: Option<&QualifiedName>,
    ) -> Result<ComputeService> {
        if self.discover(name).await?.is_some() {
            return Err(CloudError::AlreadyExists(format!("service '{}'", name)));
        }

        let balancer = match load_balancer {
            Some(lb) => Some(
                self.deployment
                    .load_balancers()
                    .discover(lb)
                    .await?
                    .ok_or_else(|| CloudError::NotFound(format!("load balancer '{}'", lb)))?,
            ),
            None => None,
        };

        let networks = self.deployment.networks();
        let (network, created_network) = networks.discover_or_provision(name).await?;

        let balancer_names: Vec<String> = balancer.into_iter().map(|b| b.balancer_name).collect();
        match self.build(name, &network, image, balancer_names).await {
            Ok(service) => {
                info!(capacity = service.desired_capacity, "service provisioned");
                Ok(service)
            }
            Err(err) => {
                warn!(error = %err, "service provisioning failed, rolling back");
                match self.remove(name, created_network).await {
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
        image: &ImageArtifact,
        load_balancers: Vec<String>,
    ) -> Result<ComputeService> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let index = self.deployment.index();
        let networks = self.deployment.networks();
        let settings = &self.deployment.settings().service;
        let component = name.to_string();

        // Instances fetch their playbook over the internet on boot
        networks.expose(name).await?;
        let group = networks
            .create_security_group(name, GroupRole::Service, network, &format!("service {}", name))
            .await?;

        let instance_type = match &settings.instance_type {
            Some(fixed) => fixed.clone(),
            None => fit_instance_type(&InstanceRequirements::default())?.to_string(),
        };
        let launch_configuration = LaunchConfigurationSpec {
            name: name.resource_name(),
            image_id: image.image_id.clone(),
            instance_type,
            security_group_ids: vec![group.id.clone()],
            user_data: image.bootstrap_script.clone(),
            associate_public_ip: true,
        };
        retrier
            .create(
                "launch configuration",
                async || {
                    provider.create_launch_configuration(&launch_configuration).await?;
                    Ok(launch_configuration.name.clone())
                },
                async |id: &str| {
                    let found = provider
                        .describe_launch_configurations(&[Filter::name(id)])
                        .await?;
                    Ok(found.into_iter().next())
                },
                async |id: &str| self.delete_launch_configuration(id).await,
            )
            .await?;

        let health_check = if load_balancers.is_empty() {
            HealthCheck::Ec2
        } else {
            HealthCheck::Elb
        };
        let spec = AutoScalingGroupSpec {
            name: name.resource_name(),
            launch_configuration: launch_configuration.name.clone(),
            subnet_ids: network.subnet_ids(),
            load_balancers,
            capacity: settings.capacity,
            health_check,
            health_check_grace_period_secs: HEALTH_CHECK_GRACE_PERIOD_SECS,
            tags: index.tags(&component),
        };
        let auto_scaling_group = retrier
            .create(
                "autoscaling group",
                async || {
                    provider.create_auto_scaling_group(&spec).await?;
                    Ok(spec.name.clone())
                },
                async |id: &str| {
                    let found = index.auto_scaling_group(&component).await?;
                    Ok(found.filter(|g| g.name == id))
                },
                async |id: &str| self.delete_auto_scaling_group(id).await,
            )
            .await?;

        Ok(ComputeService::from_group(name, auto_scaling_group, Some(group)))
    }

    pub async fn discover(&self, name: &QualifiedName) -> Result<Option<ComputeService>> {
        let index = self.deployment.index();
        let component = name.to_string();
        let Some(group) = index.auto_scaling_group(&component).await? else {
            return Ok(None);
        };
        let security = index.security_group(&component, GroupRole::Service).await?;
        Ok(Some(ComputeService::from_group(name, group, security)))
    }

    /// Open the service's security group to all ingress.
    #[instrument(skip(self), fields(service = %name))]
    pub async fn allow(&self, name: &QualifiedName) -> Result<SecurityGroup> {
        if self.discover(name).await?.is_none() {
            return Err(CloudError::NotFound(format!("service '{}'", name)));
        }
        self.deployment.networks().open_security_group(name, GroupRole::Service).await
    }

    /// Scale to zero, delete group, launch configuration and security
    /// group, then destroy the network.
    #[instrument(skip(self), fields(service = %name))]
    pub async fn destroy(&self, name: &QualifiedName) -> Result<()> {
        self.remove(name, true).await
    }

    async fn remove(&self, name: &QualifiedName, with_network: bool) -> Result<()> {
        let provider = self.deployment.provider();
        let index = self.deployment.index();
        let component = name.to_string();

        if let Some(group) = index.auto_scaling_group(&component).await? {
            self.delete_auto_scaling_group(&group.name).await?;
        } else {
            debug!("no autoscaling group");
        }

        let launch_configurations = provider
            .describe_launch_configurations(&[Filter::name(name.resource_name())])
            .await?;
        for launch_configuration in launch_configurations {
            self.delete_launch_configuration(&launch_configuration.name)
                .await?;
        }

        let networks = self.deployment.networks();
        networks.destroy_security_groups(name, GroupRole::Service).await?;
        if with_network {
            networks.destroy(name).await?;
        }
        Ok(())
    }

    async fn delete_auto_scaling_group(&self, group: &str) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();

        retrier
            .delete(&format!("scale {} to zero", group), async || {
                provider.set_desired_capacity(group, 0).await
            })
            .await?;
        retrier
            .delete(&format!("autoscaling group {}", group), async || {
                provider.delete_auto_scaling_group(group, true).await
            })
            .await?;
        retrier
            .wait_until_absent(&format!("autoscaling group {}", group), async || {
                let found = provider
                    .describe_auto_scaling_groups(&[Filter::name(group)])
                    .await?;
                Ok(!found.is_empty())
            })
            .await
    }

    async fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        let provider = self.deployment.provider();
        self.deployment
            .retrier()
            .delete(&format!("launch configuration {}", name), async || {
                provider.delete_launch_configuration(name).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cheapest_instance_without_requirements() {
        assert_eq!(
            fit_instance_type(&InstanceRequirements::default()).unwrap(),
            "t2.micro"
        );
    }

    #[test]
    fn test_fit_instance_by_cpu_and_memory() {
        let requirements = InstanceRequirements {
            cpus: Some(2),
            memory_gib: Some(6.0),
            storage_gib: Some(100),
        };
        assert_eq!(fit_instance_type(&requirements).unwrap(), "t2.large");

        let too_big = InstanceRequirements {
            cpus: Some(128),
            ..Default::default()
        };
        assert!(matches!(
            fit_instance_type(&too_big),
            Err(CloudError::Unsupported(_))
        ));
    }

    #[test]
    fn test_playbook_bootstrap_script() {
        let image = ImageArtifact::with_playbook("ami-123", "https://example.com/playbooks.git");
        assert_eq!(image.image_id, "ami-123");
        assert!(image.bootstrap_script.starts_with("#!/bin/bash\n"));
        assert!(
            image
                .bootstrap_script
                .contains("git clone https://example.com/playbooks.git /opt/ansible-cloud-init/repo")
        );
        assert!(image.bootstrap_script.contains("ansible-playbook"));
    }
}
