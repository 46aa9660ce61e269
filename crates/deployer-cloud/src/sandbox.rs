//! In-memory provider for rehearsals and tests
//!
//! Behaves like a small, deterministic EC2/ELB/Auto Scaling/Route 53:
//! resource ids are sequential, deletes fail with `DependencyViolation` while
//! something still hangs off the resource, and describe calls by id fail with
//! `*.NotFound` codes. Eventual consistency is simulated per resource kind:
//! with a lag of `n`, a new resource is skipped by the first `n` describe
//! calls that would otherwise return it (NAT gateways instead report
//! `pending` for that many reads). Faults can be queued per operation name.

use crate::cidr::Ipv4Cidr;
use crate::error::{CloudError, ErrorClass, ProviderError, Result};
use crate::provider::{CloudProvider, Filter};
use crate::resource::{
    AutoScalingGroup, AutoScalingGroupSpec, HostedZone, InternetGateway, LaunchConfiguration,
    LaunchConfigurationSpec, LoadBalancer, LoadBalancerSpec, NatGateway, NatGatewayState,
    RecordChange, RecordSet, ResourceKind, Route, RouteTable, RouteTableAssociation, RouteTarget,
    SecurityGroup, Subnet, Tags, Vpc,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Error code classification shared by the sandbox's AWS-style codes
pub fn classify_code(code: &str) -> ErrorClass {
    match code {
        "DependencyViolation"
        | "RequestLimitExceeded"
        | "Throttling"
        | "ResourceInUse"
        | "ScalingActivityInProgress"
        | "InvalidIPAddress.InUse"
        | "PriorRequestNotComplete"
        | "IncorrectState" => ErrorClass::Transient,
        "NoSuchHostedZone" | "Gateway.NotAttached" => ErrorClass::AlreadyAbsent,
        c if c.ends_with("NotFound") => ErrorClass::AlreadyAbsent,
        _ => ErrorClass::Fatal,
    }
}

/// A record plus the number of describe calls it stays hidden from
struct Entry<T> {
    record: T,
    hidden_reads: u32,
}

trait Record: Clone {
    fn id(&self) -> &str;

    fn tags(&self) -> Option<&Tags> {
        None
    }

    /// Filters other than id and tag
    fn matches_other(&self, _filter: &Filter) -> bool {
        false
    }

    fn matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::Id(id) => self.id() == id,
            Filter::Tag { .. } => self.tags().is_some_and(|tags| filter.matches_tags(tags)),
            other => self.matches_other(other),
        }
    }
}

impl Record for Vpc {
    fn id(&self) -> &str {
        &self.id
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
}

impl Record for Subnet {
    fn id(&self) -> &str {
        &self.id
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        matches!(filter, Filter::VpcId(vpc) if *vpc == self.vpc_id)
    }
}

impl Record for RouteTable {
    fn id(&self) -> &str {
        &self.id
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        match filter {
            Filter::VpcId(vpc) => *vpc == self.vpc_id,
            Filter::SubnetId(subnet) => self.associations.iter().any(|a| a.subnet_id == *subnet),
            _ => false,
        }
    }
}

impl Record for InternetGateway {
    fn id(&self) -> &str {
        &self.id
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        matches!(filter, Filter::AttachedTo(vpc) if self.attachments.contains(vpc))
    }
}

impl Record for NatGateway {
    fn id(&self) -> &str {
        &self.id
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        matches!(filter, Filter::SubnetId(subnet) if *subnet == self.subnet_id)
    }
}

impl Record for SecurityGroup {
    fn id(&self) -> &str {
        &self.id
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        match filter {
            Filter::VpcId(vpc) => *vpc == self.vpc_id,
            Filter::Name(name) => *name == self.name,
            _ => false,
        }
    }
}

impl Record for LoadBalancer {
    fn id(&self) -> &str {
        &self.name
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        matches!(filter, Filter::Name(name) if *name == self.name)
    }
}

impl Record for LaunchConfiguration {
    fn id(&self) -> &str {
        &self.name
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        matches!(filter, Filter::Name(name) if *name == self.name)
    }
}

impl Record for AutoScalingGroup {
    fn id(&self) -> &str {
        &self.name
    }
    fn tags(&self) -> Option<&Tags> {
        Some(&self.tags)
    }
    fn matches_other(&self, filter: &Filter) -> bool {
        matches!(filter, Filter::Name(name) if *name == self.name)
    }
}

struct Address {
    nat_gateway: Option<String>,
}

struct Zone {
    zone: HostedZone,
    records: Vec<RecordSet>,
}

#[derive(Default)]
struct SandboxState {
    next_id: u64,
    vpcs: BTreeMap<String, Entry<Vpc>>,
    subnets: BTreeMap<String, Entry<Subnet>>,
    route_tables: BTreeMap<String, Entry<RouteTable>>,
    internet_gateways: BTreeMap<String, Entry<InternetGateway>>,
    addresses: BTreeMap<String, Address>,
    nat_gateways: BTreeMap<String, Entry<NatGateway>>,
    nat_tokens: BTreeMap<String, String>,
    security_groups: BTreeMap<String, Entry<SecurityGroup>>,
    load_balancers: BTreeMap<String, Entry<LoadBalancer>>,
    launch_configurations: BTreeMap<String, Entry<LaunchConfiguration>>,
    auto_scaling_groups: BTreeMap<String, Entry<AutoScalingGroup>>,
    hosted_zones: BTreeMap<String, Zone>,
    lag: BTreeMap<ResourceKind, u32>,
    faults: BTreeMap<String, VecDeque<String>>,
    calls: BTreeMap<String, u32>,
}

impl SandboxState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    fn entry<T>(&self, kind: ResourceKind, record: T) -> Entry<T> {
        Entry {
            record,
            hidden_reads: self.lag.get(&kind).copied().unwrap_or(0),
        }
    }
}

/// Run a describe over one resource map, honouring visibility lag.
fn describe<T: Record>(map: &mut BTreeMap<String, Entry<T>>, filters: &[Filter]) -> Vec<T> {
    let mut found = Vec::new();
    for entry in map.values_mut() {
        if !filters.iter().all(|f| entry.record.matches(f)) {
            continue;
        }
        if entry.hidden_reads > 0 {
            entry.hidden_reads -= 1;
            continue;
        }
        found.push(entry.record.clone());
    }
    found
}

fn id_filter(filters: &[Filter]) -> Option<&str> {
    filters.iter().find_map(|f| match f {
        Filter::Id(id) => Some(id.as_str()),
        _ => None,
    })
}

/// Deterministic in-memory [`CloudProvider`]
pub struct SandboxProvider {
    availability_zones: Option<Vec<String>>,
    state: Mutex<SandboxState>,
}

impl Default for SandboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxProvider {
    pub fn new() -> Self {
        Self {
            availability_zones: Some(vec![
                "sandbox-1a".to_string(),
                "sandbox-1b".to_string(),
                "sandbox-1c".to_string(),
            ]),
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Report zone enumeration as unsupported, like a minimal backend
    pub fn without_zone_enumeration(mut self) -> Self {
        self.availability_zones = None;
        self
    }

    pub fn with_availability_zones(mut self, zones: &[&str]) -> Self {
        self.availability_zones = Some(zones.iter().map(|z| z.to_string()).collect());
        self
    }

    /// Hide new resources of `kind` from the next `reads` describe calls
    pub fn with_lag(self, kind: ResourceKind, reads: u32) -> Self {
        self.set_lag(kind, reads);
        self
    }

    pub fn set_lag(&self, kind: ResourceKind, reads: u32) {
        self.lock().lag.insert(kind, reads);
    }

    /// Make the next `times` calls of `operation` (e.g. `DeleteVpc`) fail
    /// with `code`
    pub fn fail_next(&self, operation: &str, code: &str, times: u32) {
        let mut state = self.lock();
        let queue = state.faults.entry(operation.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(code.to_string());
        }
    }

    /// How many times `operation` has been called
    pub fn calls(&self, operation: &str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Number of live resources of `kind`, ignoring visibility lag
    pub fn count(&self, kind: ResourceKind) -> usize {
        let state = self.lock();
        match kind {
            ResourceKind::Vpc => state.vpcs.len(),
            ResourceKind::Subnet => state.subnets.len(),
            ResourceKind::RouteTable => state.route_tables.len(),
            ResourceKind::InternetGateway => state.internet_gateways.len(),
            ResourceKind::NatGateway => state
                .nat_gateways
                .values()
                .filter(|e| !e.record.state.is_gone())
                .count(),
            ResourceKind::SecurityGroup => state.security_groups.len(),
            ResourceKind::LoadBalancer => state.load_balancers.len(),
            ResourceKind::LaunchConfiguration => state.launch_configurations.len(),
            ResourceKind::AutoScalingGroup => state.auto_scaling_groups.len(),
            ResourceKind::HostedZone => state.hosted_zones.len(),
        }
    }

    /// Elastic addresses still allocated
    pub fn address_count(&self) -> usize {
        self.lock().addresses.len()
    }

    /// Every internet gateway, ignoring visibility lag
    pub fn internet_gateways(&self) -> Vec<InternetGateway> {
        let state = self.lock();
        state
            .internet_gateways
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Every route table, ignoring visibility lag
    pub fn route_tables(&self) -> Vec<RouteTable> {
        let state = self.lock();
        state.route_tables.values().map(|e| e.record.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error(&self, operation: &str, code: &str, message: impl Into<String>) -> CloudError {
        CloudError::Provider(ProviderError::new(
            operation,
            code,
            message,
            classify_code(code),
        ))
    }

    /// Count the call and pop an injected fault, if any
    fn begin(&self, operation: &str) -> Result<MutexGuard<'_, SandboxState>> {
        let mut state = self.lock();
        *state.calls.entry(operation.to_string()).or_default() += 1;
        trace!(operation, "sandbox call");
        let fault = state
            .faults
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());
        match fault {
            Some(code) => Err(self.error(operation, &code, "injected fault")),
            None => Ok(state),
        }
    }

    fn not_found(&self, operation: &str, code: &str, id: &str) -> CloudError {
        self.error(operation, code, format!("'{}' does not exist", id))
    }

    fn dependency(&self, operation: &str, message: impl Into<String>) -> CloudError {
        self.error(operation, "DependencyViolation", message)
    }

    /// Describe by id fails once nothing matches, like EC2 does
    fn describe_ec2<T: Record>(
        &self,
        operation: &str,
        code: &str,
        map: &mut BTreeMap<String, Entry<T>>,
        filters: &[Filter],
    ) -> Result<Vec<T>> {
        let found = describe(map, filters);
        match id_filter(filters) {
            Some(id) if found.is_empty() => Err(self.not_found(operation, code, id)),
            _ => Ok(found),
        }
    }
}

#[async_trait]
impl CloudProvider for SandboxProvider {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn availability_zones(&self) -> Result<Vec<String>> {
        let _state = self.begin("DescribeAvailabilityZones")?;
        self.availability_zones
            .clone()
            .ok_or_else(|| CloudError::Unsupported("sandbox: availability zones".to_string()))
    }

    async fn tag_resources(&self, ids: &[String], tags: &Tags) -> Result<()> {
        let op = "CreateTags";
        let mut guard = self.begin(op)?;
        let state = &mut *guard;
        for id in ids {
            let target = if let Some(e) = state.vpcs.get_mut(id) {
                &mut e.record.tags
            } else if let Some(e) = state.subnets.get_mut(id) {
                &mut e.record.tags
            } else if let Some(e) = state.route_tables.get_mut(id) {
                &mut e.record.tags
            } else if let Some(e) = state.internet_gateways.get_mut(id) {
                &mut e.record.tags
            } else if let Some(e) = state.nat_gateways.get_mut(id) {
                &mut e.record.tags
            } else if let Some(e) = state.security_groups.get_mut(id) {
                &mut e.record.tags
            } else if state.addresses.contains_key(id) {
                continue;
            } else {
                return Err(self.not_found(op, "InvalidID.NotFound", id));
            };
            target.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }

    async fn create_vpc(&self, cidr: Ipv4Cidr) -> Result<String> {
        let mut state = self.begin("CreateVpc")?;
        let id = state.next_id("vpc");
        let vpc = Vpc {
            id: id.clone(),
            cidr,
            tags: Tags::new(),
        };
        let entry = state.entry(ResourceKind::Vpc, vpc);
        state.vpcs.insert(id.clone(), entry);

        // Every VPC comes with a main route table holding the local route
        let table_id = state.next_id("rtb");
        let main = RouteTable {
            id: table_id.clone(),
            vpc_id: id.clone(),
            main: true,
            associations: Vec::new(),
            routes: vec![Route {
                destination: cidr,
                target: RouteTarget::Local,
            }],
            tags: Tags::new(),
        };
        state.route_tables.insert(
            table_id,
            Entry {
                record: main,
                hidden_reads: 0,
            },
        );
        Ok(id)
    }

    async fn describe_vpcs(&self, filters: &[Filter]) -> Result<Vec<Vpc>> {
        let op = "DescribeVpcs";
        let mut state = self.begin(op)?;
        self.describe_ec2(op, "InvalidVpcID.NotFound", &mut state.vpcs, filters)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let op = "DeleteVpc";
        let mut state = self.begin(op)?;
        if !state.vpcs.contains_key(vpc_id) {
            return Err(self.not_found(op, "InvalidVpcID.NotFound", vpc_id));
        }
        if state.subnets.values().any(|e| e.record.vpc_id == vpc_id) {
            return Err(self.dependency(op, format!("{} has subnets", vpc_id)));
        }
        if state
            .internet_gateways
            .values()
            .any(|e| e.record.attachments.iter().any(|v| v == vpc_id))
        {
            return Err(self.dependency(op, format!("{} has an internet gateway attached", vpc_id)));
        }
        if state
            .route_tables
            .values()
            .any(|e| e.record.vpc_id == vpc_id && !e.record.main)
        {
            return Err(self.dependency(op, format!("{} has route tables", vpc_id)));
        }
        if state.security_groups.values().any(|e| e.record.vpc_id == vpc_id) {
            return Err(self.dependency(op, format!("{} has security groups", vpc_id)));
        }
        state.route_tables.retain(|_, e| e.record.vpc_id != vpc_id);
        state.vpcs.remove(vpc_id);
        Ok(())
    }

    async fn create_subnet(&self, vpc_id: &str, cidr: Ipv4Cidr, zone: &str) -> Result<String> {
        let op = "CreateSubnet";
        let mut state = self.begin(op)?;
        let Some(vpc) = state.vpcs.get(vpc_id) else {
            return Err(self.not_found(op, "InvalidVpcID.NotFound", vpc_id));
        };
        if !vpc.record.cidr.contains(&cidr) {
            return Err(self.error(
                op,
                "InvalidSubnet.Range",
                format!("{} is outside {}", cidr, vpc.record.cidr),
            ));
        }
        if state
            .subnets
            .values()
            .any(|e| e.record.vpc_id == vpc_id && e.record.cidr.overlaps(&cidr))
        {
            return Err(self.error(
                op,
                "InvalidSubnet.Conflict",
                format!("{} overlaps an existing subnet", cidr),
            ));
        }
        let id = state.next_id("subnet");
        let subnet = Subnet {
            id: id.clone(),
            vpc_id: vpc_id.to_string(),
            cidr,
            availability_zone: zone.to_string(),
            tags: Tags::new(),
        };
        let entry = state.entry(ResourceKind::Subnet, subnet);
        state.subnets.insert(id.clone(), entry);
        Ok(id)
    }

    async fn describe_subnets(&self, filters: &[Filter]) -> Result<Vec<Subnet>> {
        let op = "DescribeSubnets";
        let mut state = self.begin(op)?;
        self.describe_ec2(op, "InvalidSubnetID.NotFound", &mut state.subnets, filters)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let op = "DeleteSubnet";
        let mut state = self.begin(op)?;
        if !state.subnets.contains_key(subnet_id) {
            return Err(self.not_found(op, "InvalidSubnetID.NotFound", subnet_id));
        }
        if state
            .nat_gateways
            .values()
            .any(|e| e.record.subnet_id == subnet_id && !e.record.state.is_gone())
        {
            return Err(self.dependency(op, format!("{} hosts a NAT gateway", subnet_id)));
        }
        if state
            .load_balancers
            .values()
            .any(|e| e.record.subnet_ids.iter().any(|s| s == subnet_id))
        {
            return Err(self.dependency(op, format!("{} is used by a load balancer", subnet_id)));
        }
        if state
            .auto_scaling_groups
            .values()
            .any(|e| e.record.subnet_ids.iter().any(|s| s == subnet_id))
        {
            return Err(self.dependency(op, format!("{} is used by an autoscaling group", subnet_id)));
        }
        for entry in state.route_tables.values_mut() {
            entry.record.associations.retain(|a| a.subnet_id != subnet_id);
        }
        state.subnets.remove(subnet_id);
        Ok(())
    }

    async fn create_route_table(&self, vpc_id: &str) -> Result<String> {
        let op = "CreateRouteTable";
        let mut state = self.begin(op)?;
        let Some(vpc) = state.vpcs.get(vpc_id) else {
            return Err(self.not_found(op, "InvalidVpcID.NotFound", vpc_id));
        };
        let cidr = vpc.record.cidr;
        let id = state.next_id("rtb");
        let table = RouteTable {
            id: id.clone(),
            vpc_id: vpc_id.to_string(),
            main: false,
            associations: Vec::new(),
            routes: vec![Route {
                destination: cidr,
                target: RouteTarget::Local,
            }],
            tags: Tags::new(),
        };
        let entry = state.entry(ResourceKind::RouteTable, table);
        state.route_tables.insert(id.clone(), entry);
        Ok(id)
    }

    async fn describe_route_tables(&self, filters: &[Filter]) -> Result<Vec<RouteTable>> {
        let op = "DescribeRouteTables";
        let mut state = self.begin(op)?;
        self.describe_ec2(op, "InvalidRouteTableID.NotFound", &mut state.route_tables, filters)
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<String> {
        let op = "AssociateRouteTable";
        let mut state = self.begin(op)?;
        if !state.subnets.contains_key(subnet_id) {
            return Err(self.not_found(op, "InvalidSubnetID.NotFound", subnet_id));
        }
        if !state.route_tables.contains_key(route_table_id) {
            return Err(self.not_found(op, "InvalidRouteTableID.NotFound", route_table_id));
        }
        if state
            .route_tables
            .values()
            .any(|e| e.record.associations.iter().any(|a| a.subnet_id == subnet_id))
        {
            return Err(self.error(
                op,
                "Resource.AlreadyAssociated",
                format!("{} already has a route table", subnet_id),
            ));
        }
        let association_id = state.next_id("rtbassoc");
        if let Some(entry) = state.route_tables.get_mut(route_table_id) {
            entry.record.associations.push(RouteTableAssociation {
                id: association_id.clone(),
                subnet_id: subnet_id.to_string(),
            });
        }
        Ok(association_id)
    }

    async fn disassociate_route_table(&self, association_id: &str) -> Result<()> {
        let op = "DisassociateRouteTable";
        let mut state = self.begin(op)?;
        for entry in state.route_tables.values_mut() {
            let before = entry.record.associations.len();
            entry.record.associations.retain(|a| a.id != association_id);
            if entry.record.associations.len() != before {
                return Ok(());
            }
        }
        Err(self.not_found(op, "InvalidAssociationID.NotFound", association_id))
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination: Ipv4Cidr,
        target: &RouteTarget,
    ) -> Result<()> {
        let op = "CreateRoute";
        let mut state = self.begin(op)?;
        let exists = match target {
            RouteTarget::Local => true,
            RouteTarget::InternetGateway(id) => state.internet_gateways.contains_key(id),
            RouteTarget::NatGateway(id) => state.nat_gateways.contains_key(id),
        };
        if !exists {
            return Err(self.not_found(op, "InvalidGatewayID.NotFound", &target.to_string()));
        }
        let Some(entry) = state.route_tables.get_mut(route_table_id) else {
            return Err(self.not_found(op, "InvalidRouteTableID.NotFound", route_table_id));
        };
        if entry.record.routes.iter().any(|r| r.destination == destination) {
            return Err(self.error(
                op,
                "RouteAlreadyExists",
                format!("{} already routes {}", route_table_id, destination),
            ));
        }
        entry.record.routes.push(Route {
            destination,
            target: target.clone(),
        });
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<()> {
        let op = "DeleteRouteTable";
        let mut state = self.begin(op)?;
        let Some(entry) = state.route_tables.get(route_table_id) else {
            return Err(self.not_found(op, "InvalidRouteTableID.NotFound", route_table_id));
        };
        if entry.record.main {
            return Err(self.dependency(op, "the main route table goes with its VPC"));
        }
        if !entry.record.associations.is_empty() {
            return Err(self.dependency(op, format!("{} has associations", route_table_id)));
        }
        state.route_tables.remove(route_table_id);
        Ok(())
    }

    async fn create_internet_gateway(&self) -> Result<String> {
        let mut state = self.begin("CreateInternetGateway")?;
        let id = state.next_id("igw");
        let gateway = InternetGateway {
            id: id.clone(),
            attachments: Vec::new(),
            tags: Tags::new(),
        };
        let entry = state.entry(ResourceKind::InternetGateway, gateway);
        state.internet_gateways.insert(id.clone(), entry);
        Ok(id)
    }

    async fn describe_internet_gateways(&self, filters: &[Filter]) -> Result<Vec<InternetGateway>> {
        let op = "DescribeInternetGateways";
        let mut state = self.begin(op)?;
        self.describe_ec2(
            op,
            "InvalidInternetGatewayID.NotFound",
            &mut state.internet_gateways,
            filters,
        )
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let op = "AttachInternetGateway";
        let mut state = self.begin(op)?;
        if !state.vpcs.contains_key(vpc_id) {
            return Err(self.not_found(op, "InvalidVpcID.NotFound", vpc_id));
        }
        let Some(entry) = state.internet_gateways.get_mut(gateway_id) else {
            return Err(self.not_found(op, "InvalidInternetGatewayID.NotFound", gateway_id));
        };
        if !entry.record.attachments.is_empty() {
            return Err(self.error(
                op,
                "Resource.AlreadyAssociated",
                format!("{} is already attached", gateway_id),
            ));
        }
        entry.record.attachments.push(vpc_id.to_string());
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let op = "DetachInternetGateway";
        let mut state = self.begin(op)?;
        let Some(entry) = state.internet_gateways.get_mut(gateway_id) else {
            return Err(self.not_found(op, "InvalidInternetGatewayID.NotFound", gateway_id));
        };
        if !entry.record.attachments.iter().any(|v| v == vpc_id) {
            return Err(self.error(
                op,
                "Gateway.NotAttached",
                format!("{} is not attached to {}", gateway_id, vpc_id),
            ));
        }
        entry.record.attachments.retain(|v| v != vpc_id);
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        let op = "DeleteInternetGateway";
        let mut state = self.begin(op)?;
        let Some(entry) = state.internet_gateways.get(gateway_id) else {
            return Err(self.not_found(op, "InvalidInternetGatewayID.NotFound", gateway_id));
        };
        if !entry.record.attachments.is_empty() {
            return Err(self.dependency(op, format!("{} is still attached", gateway_id)));
        }
        state.internet_gateways.remove(gateway_id);
        Ok(())
    }

    async fn allocate_address(&self) -> Result<String> {
        let mut state = self.begin("AllocateAddress")?;
        let id = state.next_id("eipalloc");
        state
            .addresses
            .insert(id.clone(), Address { nat_gateway: None });
        Ok(id)
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        let op = "ReleaseAddress";
        let mut state = self.begin(op)?;
        let Some(address) = state.addresses.get(allocation_id) else {
            return Err(self.not_found(op, "InvalidAllocationID.NotFound", allocation_id));
        };
        if let Some(nat) = &address.nat_gateway {
            let in_use = state
                .nat_gateways
                .get(nat)
                .is_some_and(|e| !e.record.state.is_gone());
            if in_use {
                return Err(self.error(
                    op,
                    "InvalidIPAddress.InUse",
                    format!("{} is used by {}", allocation_id, nat),
                ));
            }
        }
        state.addresses.remove(allocation_id);
        Ok(())
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        client_token: &str,
    ) -> Result<String> {
        let op = "CreateNatGateway";
        let mut state = self.begin(op)?;

        // Same client token, same gateway
        if let Some(existing) = state.nat_tokens.get(client_token) {
            let live = state
                .nat_gateways
                .get(existing)
                .is_some_and(|e| !e.record.state.is_gone());
            if live {
                return Ok(existing.clone());
            }
        }

        if !state.subnets.contains_key(subnet_id) {
            return Err(self.not_found(op, "InvalidSubnetID.NotFound", subnet_id));
        }
        let Some(address) = state.addresses.get(allocation_id) else {
            return Err(self.not_found(op, "InvalidAllocationID.NotFound", allocation_id));
        };
        if address.nat_gateway.is_some() {
            return Err(self.error(
                op,
                "Resource.AlreadyAssociated",
                format!("{} is already in use", allocation_id),
            ));
        }

        let id = state.next_id("nat");
        let gateway = NatGateway {
            id: id.clone(),
            subnet_id: subnet_id.to_string(),
            allocation_id: Some(allocation_id.to_string()),
            state: NatGatewayState::Pending,
            tags: Tags::new(),
        };
        let entry = state.entry(ResourceKind::NatGateway, gateway);
        state.nat_gateways.insert(id.clone(), entry);
        state.nat_tokens.insert(client_token.to_string(), id.clone());
        if let Some(address) = state.addresses.get_mut(allocation_id) {
            address.nat_gateway = Some(id.clone());
        }
        Ok(id)
    }

    async fn describe_nat_gateways(&self, filters: &[Filter]) -> Result<Vec<NatGateway>> {
        let op = "DescribeNatGateways";
        let mut state = self.begin(op)?;
        let mut found = Vec::new();
        for entry in state.nat_gateways.values_mut() {
            if !filters.iter().all(|f| entry.record.matches(f)) {
                continue;
            }
            // Lag shows up as time spent pending
            if entry.record.state == NatGatewayState::Pending {
                if entry.hidden_reads > 0 {
                    entry.hidden_reads -= 1;
                } else {
                    entry.record.state = NatGatewayState::Available;
                }
            }
            found.push(entry.record.clone());
        }
        match id_filter(filters) {
            Some(id) if found.is_empty() => Err(self.not_found(op, "NatGatewayNotFound", id)),
            _ => Ok(found),
        }
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
        let op = "DeleteNatGateway";
        let mut state = self.begin(op)?;
        let Some(entry) = state.nat_gateways.get_mut(nat_gateway_id) else {
            return Err(self.not_found(op, "NatGatewayNotFound", nat_gateway_id));
        };
        entry.record.state = NatGatewayState::Deleted;
        Ok(())
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        _description: &str,
    ) -> Result<String> {
        let op = "CreateSecurityGroup";
        let mut state = self.begin(op)?;
        if !state.vpcs.contains_key(vpc_id) {
            return Err(self.not_found(op, "InvalidVpcID.NotFound", vpc_id));
        }
        if state
            .security_groups
            .values()
            .any(|e| e.record.vpc_id == vpc_id && e.record.name == name)
        {
            return Err(self.error(
                op,
                "InvalidGroup.Duplicate",
                format!("security group '{}' already exists", name),
            ));
        }
        let id = state.next_id("sg");
        let group = SecurityGroup {
            id: id.clone(),
            vpc_id: vpc_id.to_string(),
            name: name.to_string(),
            open_to_world: false,
            tags: Tags::new(),
        };
        let entry = state.entry(ResourceKind::SecurityGroup, group);
        state.security_groups.insert(id.clone(), entry);
        Ok(id)
    }

    async fn describe_security_groups(&self, filters: &[Filter]) -> Result<Vec<SecurityGroup>> {
        let op = "DescribeSecurityGroups";
        let mut state = self.begin(op)?;
        self.describe_ec2(op, "InvalidGroup.NotFound", &mut state.security_groups, filters)
    }

    async fn authorize_ingress_from_anywhere(&self, group_id: &str) -> Result<()> {
        let op = "AuthorizeSecurityGroupIngress";
        let mut state = self.begin(op)?;
        let Some(entry) = state.security_groups.get_mut(group_id) else {
            return Err(self.not_found(op, "InvalidGroup.NotFound", group_id));
        };
        entry.record.open_to_world = true;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let op = "DeleteSecurityGroup";
        let mut state = self.begin(op)?;
        if !state.security_groups.contains_key(group_id) {
            return Err(self.not_found(op, "InvalidGroup.NotFound", group_id));
        }
        let referenced = state
            .load_balancers
            .values()
            .any(|e| e.record.security_group_ids.iter().any(|g| g == group_id))
            || state
                .launch_configurations
                .values()
                .any(|e| e.record.security_group_ids.iter().any(|g| g == group_id));
        if referenced {
            return Err(self.dependency(op, format!("{} is still referenced", group_id)));
        }
        state.security_groups.remove(group_id);
        Ok(())
    }

    async fn create_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<String> {
        let op = "CreateLoadBalancer";
        let mut state = self.begin(op)?;
        if state.load_balancers.contains_key(&spec.name) {
            return Err(self.error(
                op,
                "DuplicateLoadBalancerName",
                format!("'{}' already exists", spec.name),
            ));
        }
        if let Some(missing) = spec
            .subnet_ids
            .iter()
            .find(|s| !state.subnets.contains_key(*s))
        {
            return Err(self.not_found(op, "SubnetNotFound", missing));
        }
        if let Some(missing) = spec
            .security_group_ids
            .iter()
            .find(|g| !state.security_groups.contains_key(*g))
        {
            return Err(self.not_found(op, "InvalidSecurityGroup", missing));
        }
        state.next_id += 1;
        let dns_name = format!("{}-{}.sandbox.elb.internal", spec.name, state.next_id);
        let balancer = LoadBalancer {
            name: spec.name.clone(),
            dns_name: dns_name.clone(),
            subnet_ids: spec.subnet_ids.clone(),
            security_group_ids: spec.security_group_ids.clone(),
            tags: spec.tags.clone(),
        };
        let entry = state.entry(ResourceKind::LoadBalancer, balancer);
        state.load_balancers.insert(spec.name.clone(), entry);
        Ok(dns_name)
    }

    async fn describe_load_balancers(&self, filters: &[Filter]) -> Result<Vec<LoadBalancer>> {
        let op = "DescribeLoadBalancers";
        let mut state = self.begin(op)?;
        let found = describe(&mut state.load_balancers, filters);
        let named = filters.iter().find_map(|f| match f {
            Filter::Name(name) | Filter::Id(name) => Some(name),
            _ => None,
        });
        match named {
            Some(name) if found.is_empty() => Err(self.not_found(op, "LoadBalancerNotFound", name)),
            _ => Ok(found),
        }
    }

    async fn delete_load_balancer(&self, name: &str) -> Result<()> {
        // Deleting a missing load balancer succeeds, as on ELB
        let mut state = self.begin("DeleteLoadBalancer")?;
        state.load_balancers.remove(name);
        Ok(())
    }

    async fn create_launch_configuration(&self, spec: &LaunchConfigurationSpec) -> Result<()> {
        let op = "CreateLaunchConfiguration";
        let mut state = self.begin(op)?;
        if state.launch_configurations.contains_key(&spec.name) {
            return Err(self.error(
                op,
                "AlreadyExists",
                format!("launch configuration '{}' already exists", spec.name),
            ));
        }
        let launch_configuration = LaunchConfiguration {
            name: spec.name.clone(),
            image_id: spec.image_id.clone(),
            instance_type: spec.instance_type.clone(),
            security_group_ids: spec.security_group_ids.clone(),
        };
        let entry = state.entry(ResourceKind::LaunchConfiguration, launch_configuration);
        state.launch_configurations.insert(spec.name.clone(), entry);
        Ok(())
    }

    async fn describe_launch_configurations(
        &self,
        filters: &[Filter],
    ) -> Result<Vec<LaunchConfiguration>> {
        let mut state = self.begin("DescribeLaunchConfigurations")?;
        Ok(describe(&mut state.launch_configurations, filters))
    }

    async fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        let op = "DeleteLaunchConfiguration";
        let mut state = self.begin(op)?;
        if !state.launch_configurations.contains_key(name) {
            return Err(self.not_found(op, "LaunchConfigurationNotFound", name));
        }
        if state
            .auto_scaling_groups
            .values()
            .any(|e| e.record.launch_configuration.as_deref() == Some(name))
        {
            return Err(self.error(op, "ResourceInUse", format!("'{}' is in use", name)));
        }
        state.launch_configurations.remove(name);
        Ok(())
    }

    async fn create_auto_scaling_group(&self, spec: &AutoScalingGroupSpec) -> Result<()> {
        let op = "CreateAutoScalingGroup";
        let mut state = self.begin(op)?;
        if state.auto_scaling_groups.contains_key(&spec.name) {
            return Err(self.error(
                op,
                "AlreadyExists",
                format!("autoscaling group '{}' already exists", spec.name),
            ));
        }
        if !state
            .launch_configurations
            .contains_key(&spec.launch_configuration)
        {
            return Err(self.error(
                op,
                "ValidationError",
                format!("launch configuration '{}' not found", spec.launch_configuration),
            ));
        }
        if let Some(missing) = spec
            .load_balancers
            .iter()
            .find(|lb| !state.load_balancers.contains_key(*lb))
        {
            return Err(self.error(
                op,
                "ValidationError",
                format!("load balancer '{}' not found", missing),
            ));
        }
        let group = AutoScalingGroup {
            name: spec.name.clone(),
            launch_configuration: Some(spec.launch_configuration.clone()),
            subnet_ids: spec.subnet_ids.clone(),
            load_balancers: spec.load_balancers.clone(),
            desired_capacity: spec.capacity,
            tags: spec.tags.clone(),
        };
        let entry = state.entry(ResourceKind::AutoScalingGroup, group);
        state.auto_scaling_groups.insert(spec.name.clone(), entry);
        Ok(())
    }

    async fn describe_auto_scaling_groups(
        &self,
        filters: &[Filter],
    ) -> Result<Vec<AutoScalingGroup>> {
        let mut state = self.begin("DescribeAutoScalingGroups")?;
        Ok(describe(&mut state.auto_scaling_groups, filters))
    }

    async fn set_desired_capacity(&self, name: &str, capacity: u32) -> Result<()> {
        let op = "UpdateAutoScalingGroup";
        let mut state = self.begin(op)?;
        let Some(entry) = state.auto_scaling_groups.get_mut(name) else {
            return Err(self.not_found(op, "AutoScalingGroupNotFound", name));
        };
        entry.record.desired_capacity = capacity;
        Ok(())
    }

    async fn delete_auto_scaling_group(&self, name: &str, force: bool) -> Result<()> {
        let op = "DeleteAutoScalingGroup";
        let mut state = self.begin(op)?;
        let Some(entry) = state.auto_scaling_groups.get(name) else {
            return Err(self.not_found(op, "AutoScalingGroupNotFound", name));
        };
        if !force && entry.record.desired_capacity > 0 {
            return Err(self.error(op, "ResourceInUse", format!("'{}' has instances", name)));
        }
        state.auto_scaling_groups.remove(name);
        Ok(())
    }

    async fn create_hosted_zone(&self, name: &str) -> Result<HostedZone> {
        let mut state = self.begin("CreateHostedZone")?;
        state.next_id += 1;
        let id = format!("/hostedzone/Z{:012X}", state.next_id);
        let apex = format!("{}.", name.trim_end_matches('.'));
        let zone = HostedZone {
            id: id.clone(),
            name: apex.clone(),
        };
        let records = vec![
            RecordSet {
                name: apex.clone(),
                record_type: "NS".to_string(),
                values: vec!["ns-1.sandbox.internal.".to_string()],
                ttl: Some(172800),
            },
            RecordSet {
                name: apex,
                record_type: "SOA".to_string(),
                values: vec!["ns-1.sandbox.internal. hostmaster.sandbox.internal. 1 7200 900 1209600 86400".to_string()],
                ttl: Some(900),
            },
        ];
        state.hosted_zones.insert(
            id,
            Zone {
                zone: zone.clone(),
                records,
            },
        );
        Ok(zone)
    }

    async fn find_hosted_zones(&self, name: &str) -> Result<Vec<HostedZone>> {
        let state = self.begin("ListHostedZonesByName")?;
        let wanted = name.trim_end_matches('.');
        Ok(state
            .hosted_zones
            .values()
            .filter(|z| z.zone.name.trim_end_matches('.') == wanted)
            .map(|z| z.zone.clone())
            .collect())
    }

    async fn list_record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        let op = "ListResourceRecordSets";
        let state = self.begin(op)?;
        match state.hosted_zones.get(zone_id) {
            Some(zone) => Ok(zone.records.clone()),
            None => Err(self.not_found(op, "NoSuchHostedZone", zone_id)),
        }
    }

    async fn change_record_set(
        &self,
        zone_id: &str,
        change: RecordChange,
        record: &RecordSet,
    ) -> Result<()> {
        let op = "ChangeResourceRecordSets";
        let mut state = self.begin(op)?;
        let Some(zone) = state.hosted_zones.get_mut(zone_id) else {
            return Err(self.not_found(op, "NoSuchHostedZone", zone_id));
        };
        let name = record.name.trim_end_matches('.');
        let position = zone.records.iter().position(|r| {
            r.record_type == record.record_type && r.name.trim_end_matches('.') == name
        });
        match (change, position) {
            (RecordChange::Create, Some(_)) => Err(self.error(
                op,
                "InvalidChangeBatch",
                format!("{} {} already exists", record.record_type, name),
            )),
            (RecordChange::Create, None) => {
                let mut stored = record.clone();
                stored.name = format!("{}.", name);
                zone.records.push(stored);
                Ok(())
            }
            (RecordChange::Delete, Some(index)) => {
                zone.records.remove(index);
                Ok(())
            }
            (RecordChange::Delete, None) => Err(self.not_found(op, "InvalidChangeBatch.NotFound", name)),
        }
    }

    async fn delete_hosted_zone(&self, zone_id: &str) -> Result<()> {
        let op = "DeleteHostedZone";
        let mut state = self.begin(op)?;
        let Some(zone) = state.hosted_zones.get(zone_id) else {
            return Err(self.not_found(op, "NoSuchHostedZone", zone_id));
        };
        if !zone.records.iter().all(RecordSet::is_zone_apex_default) {
            return Err(self.error(
                op,
                "HostedZoneNotEmpty",
                format!("{} still has records", zone.zone.name),
            ));
        }
        state.hosted_zones.remove(zone_id);
        Ok(())
    }
}
