//! AWS provider implementation

use crate::convert::{self, Ec2Kind, Field, ec2_filters, ec2_tags, open_ingress, required};
use crate::error::AwsError;
use async_trait::async_trait;
use aws_sdk_autoscaling as autoscaling;
use aws_sdk_ec2 as ec2;
use aws_sdk_elasticloadbalancing as elb;
use aws_sdk_route53 as route53;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use deployer_cloud::resource::{
    AutoScalingGroup, AutoScalingGroupSpec, HostedZone, InternetGateway, LaunchConfiguration,
    LaunchConfigurationSpec, LoadBalancer, LoadBalancerSpec, NatGateway, RecordChange, RecordSet,
    RouteTable, RouteTarget, SecurityGroup, Subnet, Tags, Vpc,
};
use deployer_cloud::{CloudError, CloudProvider, Filter, Ipv4Cidr, Result};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// DescribeTags on Classic ELB accepts at most this many names per call
const ELB_TAG_BATCH: usize = 20;

/// AWS backend: EC2 for networking, Classic ELB, Auto Scaling with launch
/// configurations, and Route 53.
pub struct AwsProvider {
    ec2: ec2::Client,
    elb: elb::Client,
    autoscaling: autoscaling::Client,
    route53: route53::Client,
}

impl AwsProvider {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            ec2: ec2::Client::new(config),
            elb: elb::Client::new(config),
            autoscaling: autoscaling::Client::new(config),
            route53: route53::Client::new(config),
        }
    }

    /// Resolve credentials and region the standard SDK way.
    /// `region` takes precedence over the environment and profile.
    #[instrument]
    pub async fn from_env(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;
        debug!(region = ?config.region(), "AWS configuration loaded");
        Self::new(&config)
    }

    async fn load_balancer_tags(&self, names: &[String]) -> crate::error::Result<HashMap<String, Tags>> {
        let mut tags = HashMap::new();
        for chunk in names.chunks(ELB_TAG_BATCH) {
            let out = self
                .elb
                .describe_tags()
                .set_load_balancer_names(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| AwsError::from_sdk("DescribeTags", e))?;
            for description in out.tag_descriptions() {
                let Some(name) = description.load_balancer_name() else {
                    continue;
                };
                let set: Tags = description
                    .tags()
                    .iter()
                    .filter_map(|tag| {
                        let key = tag.key().field()?;
                        Some((key.to_string(), tag.value().unwrap_or_default().to_string()))
                    })
                    .collect();
                tags.insert(name.to_string(), set);
            }
        }
        Ok(tags)
    }
}

/// Follow a marker-paginated describe call until the last page
async fn collect_pages<T>(
    mut fetch: impl AsyncFnMut(Option<String>) -> Result<(Vec<T>, Option<String>)>,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut marker = None;
    loop {
        let (page, next) = fetch(marker.take()).await?;
        items.extend(page);
        match next {
            Some(next) => marker = Some(next),
            None => return Ok(items),
        }
    }
}

/// Names the caller asked for through id or name filters
fn requested_names(filters: &[Filter]) -> Option<Vec<String>> {
    let names: Vec<String> = filters
        .iter()
        .filter_map(|f| match f {
            Filter::Id(name) | Filter::Name(name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    (!names.is_empty()).then_some(names)
}

fn build_failed(operation: &'static str) -> impl Fn(ec2::error::BuildError) -> AwsError {
    move |source| AwsError::Build { operation, source }
}

fn hosted_zone(zone: &route53::types::HostedZone, operation: &'static str) -> crate::error::Result<HostedZone> {
    Ok(HostedZone {
        id: required(zone.id(), operation, "Id")?.to_string(),
        name: required(zone.name(), operation, "Name")?.to_string(),
    })
}

fn record_set(
    set: &route53::types::ResourceRecordSet,
    operation: &'static str,
) -> crate::error::Result<RecordSet> {
    let record_type = required(set.r#type(), operation, "Type")?;
    Ok(RecordSet {
        name: required(set.name(), operation, "Name")?.to_string(),
        record_type: record_type.as_str().to_string(),
        values: set
            .resource_records()
            .iter()
            .filter_map(|r| r.value().field().map(str::to_string))
            .collect(),
        ttl: set.ttl().and_then(|ttl| u32::try_from(ttl).ok()),
    })
}

fn capacity(value: u32, operation: &'static str) -> crate::error::Result<i32> {
    i32::try_from(value).map_err(|_| AwsError::Malformed {
        operation,
        value: value.to_string(),
    })
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    async fn availability_zones(&self) -> Result<Vec<String>> {
        let out = self
            .ec2
            .describe_availability_zones()
            .filters(
                ec2::types::Filter::builder()
                    .name("state")
                    .values("available")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeAvailabilityZones", e))?;
        let mut zones: Vec<String> = out
            .availability_zones()
            .iter()
            .filter_map(|zone| zone.zone_name().map(str::to_string))
            .collect();
        zones.sort();
        Ok(zones)
    }

    async fn tag_resources(&self, ids: &[String], tags: &Tags) -> Result<()> {
        if ids.is_empty() || tags.is_empty() {
            return Ok(());
        }
        self.ec2
            .create_tags()
            .set_resources(Some(ids.to_vec()))
            .set_tags(Some(ec2_tags(tags)))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("CreateTags", e))?;
        Ok(())
    }

    // Network container

    async fn create_vpc(&self, cidr: Ipv4Cidr) -> Result<String> {
        const OP: &str = "CreateVpc";
        let out = self
            .ec2
            .create_vpc()
            .cidr_block(cidr.to_string())
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let vpc = required(out.vpc(), OP, "Vpc")?;
        Ok(required(vpc.vpc_id(), OP, "VpcId")?.to_string())
    }

    async fn describe_vpcs(&self, filters: &[Filter]) -> Result<Vec<Vpc>> {
        const OP: &str = "DescribeVpcs";
        let out = self
            .ec2
            .describe_vpcs()
            .set_filters(Some(ec2_filters(Ec2Kind::Vpc, filters, OP)?))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let vpcs = out
            .vpcs()
            .iter()
            .map(convert::vpc)
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(vpcs)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        self.ec2
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteVpc", e))?;
        Ok(())
    }

    // Subnets and routing

    async fn create_subnet(&self, vpc_id: &str, cidr: Ipv4Cidr, zone: &str) -> Result<String> {
        const OP: &str = "CreateSubnet";
        let out = self
            .ec2
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr.to_string())
            .availability_zone(zone)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let subnet = required(out.subnet(), OP, "Subnet")?;
        Ok(required(subnet.subnet_id(), OP, "SubnetId")?.to_string())
    }

    async fn describe_subnets(&self, filters: &[Filter]) -> Result<Vec<Subnet>> {
        const OP: &str = "DescribeSubnets";
        let out = self
            .ec2
            .describe_subnets()
            .set_filters(Some(ec2_filters(Ec2Kind::Subnet, filters, OP)?))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let subnets = out
            .subnets()
            .iter()
            .map(convert::subnet)
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(subnets)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.ec2
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteSubnet", e))?;
        Ok(())
    }

    async fn create_route_table(&self, vpc_id: &str) -> Result<String> {
        const OP: &str = "CreateRouteTable";
        let out = self
            .ec2
            .create_route_table()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let table = required(out.route_table(), OP, "RouteTable")?;
        Ok(required(table.route_table_id(), OP, "RouteTableId")?.to_string())
    }

    async fn describe_route_tables(&self, filters: &[Filter]) -> Result<Vec<RouteTable>> {
        const OP: &str = "DescribeRouteTables";
        let out = self
            .ec2
            .describe_route_tables()
            .set_filters(Some(ec2_filters(Ec2Kind::RouteTable, filters, OP)?))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let tables = out
            .route_tables()
            .iter()
            .map(convert::route_table)
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(tables)
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<String> {
        const OP: &str = "AssociateRouteTable";
        let out = self
            .ec2
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        Ok(required(out.association_id(), OP, "AssociationId")?.to_string())
    }

    async fn disassociate_route_table(&self, association_id: &str) -> Result<()> {
        self.ec2
            .disassociate_route_table()
            .association_id(association_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DisassociateRouteTable", e))?;
        Ok(())
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination: Ipv4Cidr,
        target: &RouteTarget,
    ) -> Result<()> {
        let request = self
            .ec2
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination.to_string());
        let request = match target {
            RouteTarget::InternetGateway(id) => request.gateway_id(id),
            RouteTarget::NatGateway(id) => request.nat_gateway_id(id),
            RouteTarget::Local => {
                return Err(CloudError::Unsupported(format!(
                    "explicit local route to {}",
                    destination
                )));
            }
        };
        request
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("CreateRoute", e))?;
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<()> {
        self.ec2
            .delete_route_table()
            .route_table_id(route_table_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteRouteTable", e))?;
        Ok(())
    }

    // Internet gateways

    async fn create_internet_gateway(&self) -> Result<String> {
        const OP: &str = "CreateInternetGateway";
        let out = self
            .ec2
            .create_internet_gateway()
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let gateway = required(out.internet_gateway(), OP, "InternetGateway")?;
        Ok(required(gateway.internet_gateway_id(), OP, "InternetGatewayId")?.to_string())
    }

    async fn describe_internet_gateways(&self, filters: &[Filter]) -> Result<Vec<InternetGateway>> {
        const OP: &str = "DescribeInternetGateways";
        let out = self
            .ec2
            .describe_internet_gateways()
            .set_filters(Some(ec2_filters(Ec2Kind::InternetGateway, filters, OP)?))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let gateways = out
            .internet_gateways()
            .iter()
            .map(convert::internet_gateway)
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(gateways)
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        self.ec2
            .attach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("AttachInternetGateway", e))?;
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        self.ec2
            .detach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DetachInternetGateway", e))?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        self.ec2
            .delete_internet_gateway()
            .internet_gateway_id(gateway_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteInternetGateway", e))?;
        Ok(())
    }

    // Elastic addresses and managed NAT

    async fn allocate_address(&self) -> Result<String> {
        const OP: &str = "AllocateAddress";
        let out = self
            .ec2
            .allocate_address()
            .domain(ec2::types::DomainType::Vpc)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        Ok(required(out.allocation_id(), OP, "AllocationId")?.to_string())
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        self.ec2
            .release_address()
            .allocation_id(allocation_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("ReleaseAddress", e))?;
        Ok(())
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        client_token: &str,
    ) -> Result<String> {
        const OP: &str = "CreateNatGateway";
        let out = self
            .ec2
            .create_nat_gateway()
            .subnet_id(subnet_id)
            .allocation_id(allocation_id)
            .client_token(client_token)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let gateway = required(out.nat_gateway(), OP, "NatGateway")?;
        Ok(required(gateway.nat_gateway_id(), OP, "NatGatewayId")?.to_string())
    }

    async fn describe_nat_gateways(&self, filters: &[Filter]) -> Result<Vec<NatGateway>> {
        const OP: &str = "DescribeNatGateways";
        let out = self
            .ec2
            .describe_nat_gateways()
            .set_filter(Some(ec2_filters(Ec2Kind::NatGateway, filters, OP)?))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let gateways = out
            .nat_gateways()
            .iter()
            .map(convert::nat_gateway)
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(gateways)
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
        self.ec2
            .delete_nat_gateway()
            .nat_gateway_id(nat_gateway_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteNatGateway", e))?;
        Ok(())
    }

    // Security groups

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String> {
        const OP: &str = "CreateSecurityGroup";
        let out = self
            .ec2
            .create_security_group()
            .vpc_id(vpc_id)
            .group_name(name)
            .description(description)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        Ok(required(out.group_id(), OP, "GroupId")?.to_string())
    }

    async fn describe_security_groups(&self, filters: &[Filter]) -> Result<Vec<SecurityGroup>> {
        const OP: &str = "DescribeSecurityGroups";
        let out = self
            .ec2
            .describe_security_groups()
            .set_filters(Some(ec2_filters(Ec2Kind::SecurityGroup, filters, OP)?))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let groups = out
            .security_groups()
            .iter()
            .map(convert::security_group)
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(groups)
    }

    async fn authorize_ingress_from_anywhere(&self, group_id: &str) -> Result<()> {
        const OP: &str = "AuthorizeSecurityGroupIngress";
        let result = self
            .ec2
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(open_ingress())
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = AwsError::from_sdk(OP, e);
                if err.code() == Some("InvalidPermission.Duplicate") {
                    debug!(group = group_id, "ingress already open");
                    return Ok(());
                }
                Err(err.into())
            }
        }
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.ec2
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteSecurityGroup", e))?;
        Ok(())
    }

    // Load balancers

    async fn create_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<String> {
        const OP: &str = "CreateLoadBalancer";
        let listeners = spec
            .listeners
            .iter()
            .map(|listener| {
                elb::types::Listener::builder()
                    .protocol(&listener.protocol)
                    .load_balancer_port(i32::from(listener.port))
                    .instance_protocol(&listener.instance_protocol)
                    .instance_port(i32::from(listener.instance_port))
                    .build()
                    .map_err(build_failed(OP))
            })
            .collect::<crate::error::Result<Vec<_>>>()?;
        let tags = spec
            .tags
            .iter()
            .map(|(key, value)| {
                elb::types::Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(build_failed(OP))
            })
            .collect::<crate::error::Result<Vec<_>>>()?;

        let out = self
            .elb
            .create_load_balancer()
            .load_balancer_name(&spec.name)
            .set_listeners(Some(listeners))
            .set_subnets(Some(spec.subnet_ids.clone()))
            .set_security_groups(Some(spec.security_group_ids.clone()))
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        Ok(required(out.dns_name(), OP, "DNSName")?.to_string())
    }

    async fn describe_load_balancers(&self, filters: &[Filter]) -> Result<Vec<LoadBalancer>> {
        const OP: &str = "DescribeLoadBalancers";
        let requested = requested_names(filters);
        let descriptions = collect_pages(async |marker| {
            let out = self
                .elb
                .describe_load_balancers()
                .set_load_balancer_names(requested.clone())
                .set_marker(marker)
                .send()
                .await
                .map_err(|e| AwsError::from_sdk(OP, e))?;
            Ok((
                out.load_balancer_descriptions().to_vec(),
                out.next_marker().map(str::to_string),
            ))
        })
        .await?;
        let names: Vec<String> = descriptions
            .iter()
            .filter_map(|d| d.load_balancer_name().map(str::to_string))
            .collect();
        let mut tags = self.load_balancer_tags(&names).await?;

        Ok(descriptions
            .iter()
            .filter(|d| {
                filters.iter().all(|filter| match filter {
                    Filter::VpcId(vpc) => d.vpc_id() == Some(vpc.as_str()),
                    Filter::SubnetId(subnet) => d.subnets().contains(subnet),
                    _ => true,
                })
            })
            .filter_map(|d| {
                let name = d.load_balancer_name()?.to_string();
                Some(LoadBalancer {
                    dns_name: d.dns_name().unwrap_or_default().to_string(),
                    subnet_ids: d.subnets().to_vec(),
                    security_group_ids: d.security_groups().to_vec(),
                    tags: tags.remove(&name).unwrap_or_default(),
                    name,
                })
            })
            .filter(|lb| filters.iter().all(|f| f.matches_tags(&lb.tags)))
            .collect())
    }

    async fn delete_load_balancer(&self, name: &str) -> Result<()> {
        // Classic ELB reports success for a balancer that does not exist
        self.elb
            .delete_load_balancer()
            .load_balancer_name(name)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteLoadBalancer", e))?;
        Ok(())
    }

    // Compute

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create_launch_configuration(&self, spec: &LaunchConfigurationSpec) -> Result<()> {
        self.autoscaling
            .create_launch_configuration()
            .launch_configuration_name(&spec.name)
            .image_id(&spec.image_id)
            .instance_type(&spec.instance_type)
            .set_security_groups(Some(spec.security_group_ids.clone()))
            .user_data(BASE64.encode(&spec.user_data))
            .associate_public_ip_address(spec.associate_public_ip)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("CreateLaunchConfiguration", e))?;
        Ok(())
    }

    async fn describe_launch_configurations(
        &self,
        filters: &[Filter],
    ) -> Result<Vec<LaunchConfiguration>> {
        const OP: &str = "DescribeLaunchConfigurations";
        let names = requested_names(filters);
        let mut found = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .autoscaling
                .describe_launch_configurations()
                .set_launch_configuration_names(names.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| AwsError::from_sdk(OP, e))?;
            for configuration in out.launch_configurations() {
                found.push(LaunchConfiguration {
                    name: required(
                        configuration.launch_configuration_name(),
                        OP,
                        "LaunchConfigurationName",
                    )?
                    .to_string(),
                    image_id: configuration.image_id().field().unwrap_or_default().to_string(),
                    instance_type: configuration
                        .instance_type()
                        .field()
                        .unwrap_or_default()
                        .to_string(),
                    security_group_ids: configuration.security_groups().to_vec(),
                });
            }
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(found)
    }

    async fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        self.autoscaling
            .delete_launch_configuration()
            .launch_configuration_name(name)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteLaunchConfiguration", e).missing_as_not_found())?;
        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create_auto_scaling_group(&self, spec: &AutoScalingGroupSpec) -> Result<()> {
        const OP: &str = "CreateAutoScalingGroup";
        let size = capacity(spec.capacity, OP)?;
        let grace_period = capacity(spec.health_check_grace_period_secs, OP)?;
        let tags = spec
            .tags
            .iter()
            .map(|(key, value)| {
                autoscaling::types::Tag::builder()
                    .key(key)
                    .value(value)
                    .propagate_at_launch(true)
                    .build()
                    .map_err(build_failed(OP))
            })
            .collect::<crate::error::Result<Vec<_>>>()?;

        self.autoscaling
            .create_auto_scaling_group()
            .auto_scaling_group_name(&spec.name)
            .launch_configuration_name(&spec.launch_configuration)
            .vpc_zone_identifier(spec.subnet_ids.join(","))
            .set_load_balancer_names(
                (!spec.load_balancers.is_empty()).then(|| spec.load_balancers.clone()),
            )
            .min_size(size)
            .max_size(size)
            .desired_capacity(size)
            .health_check_type(spec.health_check.as_str())
            .health_check_grace_period(grace_period)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        Ok(())
    }

    async fn describe_auto_scaling_groups(
        &self,
        filters: &[Filter],
    ) -> Result<Vec<AutoScalingGroup>> {
        const OP: &str = "DescribeAutoScalingGroups";
        let names = requested_names(filters);
        let mut found = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .autoscaling
                .describe_auto_scaling_groups()
                .set_auto_scaling_group_names(names.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| AwsError::from_sdk(OP, e))?;
            for group in out.auto_scaling_groups() {
                let tags: Tags = group
                    .tags()
                    .iter()
                    .filter_map(|tag| {
                        let key = tag.key().field()?;
                        let value = tag.value().field().unwrap_or_default();
                        Some((key.to_string(), value.to_string()))
                    })
                    .collect();
                if !filters.iter().all(|f| f.matches_tags(&tags)) {
                    continue;
                }
                let desired = group.desired_capacity().field().unwrap_or(0);
                found.push(AutoScalingGroup {
                    name: required(group.auto_scaling_group_name(), OP, "AutoScalingGroupName")?
                        .to_string(),
                    launch_configuration: group.launch_configuration_name().map(str::to_string),
                    subnet_ids: group
                        .vpc_zone_identifier()
                        .unwrap_or_default()
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                    load_balancers: group.load_balancer_names().to_vec(),
                    desired_capacity: u32::try_from(desired).unwrap_or(0),
                    tags,
                });
            }
            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(found)
    }

    async fn set_desired_capacity(&self, name: &str, capacity_wanted: u32) -> Result<()> {
        const OP: &str = "UpdateAutoScalingGroup";
        let size = capacity(capacity_wanted, OP)?;
        self.autoscaling
            .update_auto_scaling_group()
            .auto_scaling_group_name(name)
            .min_size(size)
            .desired_capacity(size)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e).missing_as_not_found())?;
        Ok(())
    }

    async fn delete_auto_scaling_group(&self, name: &str, force: bool) -> Result<()> {
        self.autoscaling
            .delete_auto_scaling_group()
            .auto_scaling_group_name(name)
            .force_delete(force)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteAutoScalingGroup", e).missing_as_not_found())?;
        Ok(())
    }

    // DNS

    async fn create_hosted_zone(&self, name: &str) -> Result<HostedZone> {
        const OP: &str = "CreateHostedZone";
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let out = self
            .route53
            .create_hosted_zone()
            .name(name)
            .caller_reference(format!("{}-{}", name, nonce))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let zone = required(out.hosted_zone(), OP, "HostedZone")?;
        Ok(hosted_zone(zone, OP)?)
    }

    async fn find_hosted_zones(&self, name: &str) -> Result<Vec<HostedZone>> {
        const OP: &str = "ListHostedZonesByName";
        let wanted = format!("{}.", name.trim_end_matches('.'));
        let out = self
            .route53
            .list_hosted_zones_by_name()
            .dns_name(&wanted)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk(OP, e))?;
        let zones = out
            .hosted_zones()
            .iter()
            .filter(|zone| zone.name().field() == Some(wanted.as_str()))
            .map(|zone| hosted_zone(zone, OP))
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(zones)
    }

    async fn list_record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        const OP: &str = "ListResourceRecordSets";
        let mut records = Vec::new();
        let mut start: Option<(String, route53::types::RrType)> = None;
        loop {
            let mut request = self
                .route53
                .list_resource_record_sets()
                .hosted_zone_id(zone_id);
            if let Some((name, record_type)) = start.take() {
                request = request
                    .start_record_name(name)
                    .start_record_type(record_type);
            }
            let out = request
                .send()
                .await
                .map_err(|e| AwsError::from_sdk(OP, e))?;
            for set in out.resource_record_sets() {
                records.push(record_set(set, OP)?);
            }
            let truncated = out.is_truncated().field().unwrap_or(false);
            match (truncated, out.next_record_name(), out.next_record_type()) {
                (true, Some(name), Some(record_type)) => {
                    start = Some((name.to_string(), record_type.clone()));
                }
                _ => break,
            }
        }
        Ok(records)
    }

    #[instrument(skip(self, record), fields(name = %record.name))]
    async fn change_record_set(
        &self,
        zone_id: &str,
        change: RecordChange,
        record: &RecordSet,
    ) -> Result<()> {
        use route53::types::{Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType};
        const OP: &str = "ChangeResourceRecordSets";

        let resource_records = record
            .values
            .iter()
            .map(|value| ResourceRecord::builder().value(value).build().map_err(build_failed(OP)))
            .collect::<crate::error::Result<Vec<_>>>()?;
        let mut set = ResourceRecordSet::builder()
            .name(&record.name)
            .r#type(RrType::from(record.record_type.as_str()))
            .set_resource_records(Some(resource_records));
        if let Some(ttl) = record.ttl {
            set = set.ttl(i64::from(ttl));
        }
        let set = set.build().map_err(build_failed(OP))?;

        let action = match change {
            RecordChange::Create => ChangeAction::Create,
            RecordChange::Delete => ChangeAction::Delete,
        };
        let batch = ChangeBatch::builder()
            .changes(
                Change::builder()
                    .action(action)
                    .resource_record_set(set)
                    .build()
                    .map_err(build_failed(OP))?,
            )
            .build()
            .map_err(build_failed(OP))?;

        self.route53
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| {
                let err = AwsError::from_sdk(OP, e);
                match change {
                    RecordChange::Delete => err.missing_as_not_found(),
                    RecordChange::Create => err,
                }
            })?;
        Ok(())
    }

    async fn delete_hosted_zone(&self, zone_id: &str) -> Result<()> {
        self.route53
            .delete_hosted_zone()
            .id(zone_id)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DeleteHostedZone", e))?;
        Ok(())
    }
}
