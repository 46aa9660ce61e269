//! Translation between SDK shapes and deployer resource records

use crate::error::{AwsError, Result};
use aws_sdk_ec2::types as ec2;
use deployer_cloud::resource::{
    InternetGateway, NatGateway, NatGatewayState, Route, RouteTable, RouteTableAssociation,
    RouteTarget, SecurityGroup, Subnet, Tags, Vpc,
};
use deployer_cloud::{Filter, Ipv4Cidr};

/// Getter results differ between the SDKs: required members come back bare,
/// optional ones wrapped in `Option`.
pub(crate) trait Field<T> {
    fn field(self) -> Option<T>;
}

impl<'a, T: ?Sized> Field<&'a T> for &'a T {
    fn field(self) -> Option<&'a T> {
        Some(self)
    }
}

impl<'a, T: ?Sized> Field<&'a T> for Option<&'a T> {
    fn field(self) -> Option<&'a T> {
        self
    }
}

macro_rules! copy_field {
    ($($ty:ty),*) => {
        $(
            impl Field<$ty> for $ty {
                fn field(self) -> Option<$ty> {
                    Some(self)
                }
            }

            impl Field<$ty> for Option<$ty> {
                fn field(self) -> Option<$ty> {
                    self
                }
            }
        )*
    };
}

copy_field!(i32, i64, bool);

/// A required value, or [`AwsError::MissingField`]
pub(crate) fn required<'a, T: ?Sized>(
    value: impl Field<&'a T>,
    operation: &'static str,
    field: &'static str,
) -> Result<&'a T> {
    value
        .field()
        .ok_or(AwsError::MissingField { operation, field })
}

pub(crate) fn parse_cidr(value: Option<&str>, operation: &'static str) -> Result<Ipv4Cidr> {
    let value = value.ok_or(AwsError::MissingField {
        operation,
        field: "CidrBlock",
    })?;
    value.parse().map_err(|_| AwsError::Malformed {
        operation,
        value: value.to_string(),
    })
}

/// EC2 resource families, each with its own filter names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ec2Kind {
    Vpc,
    Subnet,
    RouteTable,
    InternetGateway,
    NatGateway,
    SecurityGroup,
}

impl Ec2Kind {
    fn id_filter(&self) -> &'static str {
        match self {
            Ec2Kind::Vpc => "vpc-id",
            Ec2Kind::Subnet => "subnet-id",
            Ec2Kind::RouteTable => "route-table-id",
            Ec2Kind::InternetGateway => "internet-gateway-id",
            Ec2Kind::NatGateway => "nat-gateway-id",
            Ec2Kind::SecurityGroup => "group-id",
        }
    }

    fn filter_name(&self, filter: &Filter) -> Option<String> {
        let name = match (self, filter) {
            (_, Filter::Id(_)) => self.id_filter(),
            (_, Filter::Tag { key, .. }) => return Some(format!("tag:{}", key)),
            (Ec2Kind::InternetGateway, Filter::AttachedTo(_)) => "attachment.vpc-id",
            (Ec2Kind::InternetGateway, _) => return None,
            (_, Filter::VpcId(_)) => "vpc-id",
            (Ec2Kind::RouteTable, Filter::SubnetId(_)) => "association.subnet-id",
            (Ec2Kind::Subnet | Ec2Kind::NatGateway, Filter::SubnetId(_)) => "subnet-id",
            (Ec2Kind::SecurityGroup, Filter::Name(_)) => "group-name",
            _ => return None,
        };
        Some(name.to_string())
    }
}

fn filter_value(filter: &Filter) -> &str {
    match filter {
        Filter::Id(v)
        | Filter::VpcId(v)
        | Filter::SubnetId(v)
        | Filter::AttachedTo(v)
        | Filter::Name(v) => v,
        Filter::Tag { value, .. } => value,
    }
}

/// Translate engine filters into EC2 describe filters
pub(crate) fn ec2_filters(
    kind: Ec2Kind,
    filters: &[Filter],
    operation: &'static str,
) -> Result<Vec<ec2::Filter>> {
    filters
        .iter()
        .map(|filter| {
            let name = kind.filter_name(filter).ok_or_else(|| AwsError::Malformed {
                operation,
                value: format!("{:?}", filter),
            })?;
            Ok(ec2::Filter::builder()
                .name(name)
                .values(filter_value(filter))
                .build())
        })
        .collect()
}

pub(crate) fn ec2_tags(tags: &Tags) -> Vec<ec2::Tag> {
    tags.iter()
        .map(|(key, value)| ec2::Tag::builder().key(key).value(value).build())
        .collect()
}

pub(crate) fn from_ec2_tags(tags: &[ec2::Tag]) -> Tags {
    tags.iter()
        .filter_map(|tag| {
            let key = tag.key()?;
            Some((key.to_string(), tag.value().unwrap_or_default().to_string()))
        })
        .collect()
}

fn owned(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

pub(crate) fn vpc(vpc: &ec2::Vpc) -> Result<Vpc> {
    const OP: &str = "DescribeVpcs";
    Ok(Vpc {
        id: required(vpc.vpc_id(), OP, "VpcId")?.to_string(),
        cidr: parse_cidr(vpc.cidr_block(), OP)?,
        tags: from_ec2_tags(vpc.tags()),
    })
}

pub(crate) fn subnet(subnet: &ec2::Subnet) -> Result<Subnet> {
    const OP: &str = "DescribeSubnets";
    Ok(Subnet {
        id: required(subnet.subnet_id(), OP, "SubnetId")?.to_string(),
        vpc_id: owned(subnet.vpc_id()),
        cidr: parse_cidr(subnet.cidr_block(), OP)?,
        availability_zone: owned(subnet.availability_zone()),
        tags: from_ec2_tags(subnet.tags()),
    })
}

fn route(route: &ec2::Route) -> Option<Route> {
    // IPv6 and prefix-list routes are not managed here
    let destination = route.destination_cidr_block()?.parse().ok()?;
    let target = match (route.gateway_id(), route.nat_gateway_id()) {
        (Some("local"), _) => RouteTarget::Local,
        (Some(gateway), _) if gateway.starts_with("igw-") => {
            RouteTarget::InternetGateway(gateway.to_string())
        }
        (_, Some(nat)) => RouteTarget::NatGateway(nat.to_string()),
        _ => return None,
    };
    Some(Route {
        destination,
        target,
    })
}

pub(crate) fn route_table(table: &ec2::RouteTable) -> Result<RouteTable> {
    const OP: &str = "DescribeRouteTables";
    let associations = table.associations();
    Ok(RouteTable {
        id: required(table.route_table_id(), OP, "RouteTableId")?.to_string(),
        vpc_id: owned(table.vpc_id()),
        main: associations.iter().any(|a| a.main() == Some(true)),
        associations: associations
            .iter()
            .filter_map(|a| {
                Some(RouteTableAssociation {
                    id: a.route_table_association_id()?.to_string(),
                    subnet_id: a.subnet_id()?.to_string(),
                })
            })
            .collect(),
        routes: table.routes().iter().filter_map(route).collect(),
        tags: from_ec2_tags(table.tags()),
    })
}

pub(crate) fn internet_gateway(gateway: &ec2::InternetGateway) -> Result<InternetGateway> {
    Ok(InternetGateway {
        id: required(
            gateway.internet_gateway_id(),
            "DescribeInternetGateways",
            "InternetGatewayId",
        )?
        .to_string(),
        attachments: gateway
            .attachments()
            .iter()
            .filter_map(|a| a.vpc_id().map(str::to_string))
            .collect(),
        tags: from_ec2_tags(gateway.tags()),
    })
}

fn nat_state(state: Option<&ec2::NatGatewayState>) -> NatGatewayState {
    match state {
        Some(ec2::NatGatewayState::Available) => NatGatewayState::Available,
        Some(ec2::NatGatewayState::Deleting) => NatGatewayState::Deleting,
        Some(ec2::NatGatewayState::Deleted) => NatGatewayState::Deleted,
        Some(ec2::NatGatewayState::Failed) => NatGatewayState::Failed,
        _ => NatGatewayState::Pending,
    }
}

pub(crate) fn nat_gateway(gateway: &ec2::NatGateway) -> Result<NatGateway> {
    const OP: &str = "DescribeNatGateways";
    Ok(NatGateway {
        id: required(gateway.nat_gateway_id(), OP, "NatGatewayId")?.to_string(),
        subnet_id: owned(gateway.subnet_id()),
        allocation_id: gateway
            .nat_gateway_addresses()
            .iter()
            .find_map(|a| a.allocation_id().map(str::to_string)),
        state: nat_state(gateway.state()),
        tags: from_ec2_tags(gateway.tags()),
    })
}

/// Whether a permission is the allow-all rule from 0.0.0.0/0
fn allows_everything(permission: &ec2::IpPermission) -> bool {
    permission.ip_protocol() == Some("-1")
        && permission
            .ip_ranges()
            .iter()
            .any(|range| range.cidr_ip() == Some("0.0.0.0/0"))
}

pub(crate) fn security_group(group: &ec2::SecurityGroup) -> Result<SecurityGroup> {
    Ok(SecurityGroup {
        id: required(group.group_id(), "DescribeSecurityGroups", "GroupId")?.to_string(),
        vpc_id: owned(group.vpc_id()),
        name: owned(group.group_name()),
        open_to_world: group.ip_permissions().iter().any(allows_everything),
        tags: from_ec2_tags(group.tags()),
    })
}

pub(crate) fn open_ingress() -> ec2::IpPermission {
    ec2::IpPermission::builder()
        .ip_protocol("-1")
        .ip_ranges(ec2::IpRange::builder().cidr_ip("0.0.0.0/0").build())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(key: &str, value: &str) -> ec2::Tag {
        ec2::Tag::builder().key(key).value(value).build()
    }

    #[test]
    fn test_filter_names_per_kind() {
        let filters = ec2_filters(
            Ec2Kind::RouteTable,
            &[
                Filter::vpc("vpc-1"),
                Filter::subnet("subnet-1"),
                Filter::tag("cloud-deployer-network", "dc-a.public"),
            ],
            "DescribeRouteTables",
        )
        .unwrap();

        let names: Vec<_> = filters.iter().map(|f| f.name().unwrap_or_default()).collect();
        assert_eq!(
            names,
            vec!["vpc-id", "association.subnet-id", "tag:cloud-deployer-network"]
        );
        assert_eq!(filters[2].values(), ["dc-a.public".to_string()]);
    }

    #[test]
    fn test_gateway_filters() {
        let filters = ec2_filters(
            Ec2Kind::InternetGateway,
            &[Filter::attached_to("vpc-1"), Filter::id("igw-1")],
            "DescribeInternetGateways",
        )
        .unwrap();
        let names: Vec<_> = filters.iter().map(|f| f.name().unwrap_or_default()).collect();
        assert_eq!(names, vec!["attachment.vpc-id", "internet-gateway-id"]);
    }

    #[test]
    fn test_unsupported_filter_is_rejected() {
        let result = ec2_filters(Ec2Kind::Vpc, &[Filter::name("web")], "DescribeVpcs");
        assert!(matches!(result, Err(AwsError::Malformed { .. })));

        let result = ec2_filters(
            Ec2Kind::InternetGateway,
            &[Filter::vpc("vpc-1")],
            "DescribeInternetGateways",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_route_table_conversion() {
        let table = ec2::RouteTable::builder()
            .route_table_id("rtb-1")
            .vpc_id("vpc-1")
            .associations(
                ec2::RouteTableAssociation::builder()
                    .route_table_association_id("rtbassoc-1")
                    .subnet_id("subnet-1")
                    .main(false)
                    .build(),
            )
            .routes(
                ec2::Route::builder()
                    .destination_cidr_block("10.0.0.0/16")
                    .gateway_id("local")
                    .build(),
            )
            .routes(
                ec2::Route::builder()
                    .destination_cidr_block("0.0.0.0/0")
                    .gateway_id("igw-1")
                    .build(),
            )
            .routes(
                ec2::Route::builder()
                    .destination_ipv6_cidr_block("::/0")
                    .gateway_id("igw-1")
                    .build(),
            )
            .tags(tag("cloud-deployer-network", "dc-a.public"))
            .build();

        let converted = route_table(&table).unwrap();
        assert!(!converted.main);
        assert_eq!(converted.associations.len(), 1);
        assert_eq!(converted.associations[0].subnet_id, "subnet-1");
        assert_eq!(converted.routes.len(), 2);
        assert_eq!(converted.routes[0].target, RouteTarget::Local);
        assert!(converted.references(&RouteTarget::InternetGateway("igw-1".to_string())));
        assert_eq!(
            converted.tags.get("cloud-deployer-network").map(String::as_str),
            Some("dc-a.public")
        );
    }

    #[test]
    fn test_open_ingress_detection() {
        let group = ec2::SecurityGroup::builder()
            .group_id("sg-1")
            .vpc_id("vpc-1")
            .group_name("dc-a-web")
            .ip_permissions(open_ingress())
            .build();
        assert!(security_group(&group).unwrap().open_to_world);

        let closed = ec2::SecurityGroup::builder()
            .group_id("sg-2")
            .ip_permissions(
                ec2::IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(22)
                    .to_port(22)
                    .ip_ranges(ec2::IpRange::builder().cidr_ip("0.0.0.0/0").build())
                    .build(),
            )
            .build();
        assert!(!security_group(&closed).unwrap().open_to_world);
    }

    #[test]
    fn test_nat_gateway_conversion() {
        let gateway = ec2::NatGateway::builder()
            .nat_gateway_id("nat-1")
            .subnet_id("subnet-1")
            .state(ec2::NatGatewayState::Pending)
            .nat_gateway_addresses(
                ec2::NatGatewayAddress::builder()
                    .allocation_id("eipalloc-1")
                    .build(),
            )
            .build();

        let converted = nat_gateway(&gateway).unwrap();
        assert_eq!(converted.state, NatGatewayState::Pending);
        assert_eq!(converted.allocation_id.as_deref(), Some("eipalloc-1"));
    }

    #[test]
    fn test_missing_id_is_reported() {
        let vpc_without_id = ec2::Vpc::builder().cidr_block("10.0.0.0/16").build();
        assert!(matches!(
            vpc(&vpc_without_id),
            Err(AwsError::MissingField { field: "VpcId", .. })
        ));

        let bad_cidr = ec2::Vpc::builder().vpc_id("vpc-1").cidr_block("10.0.0.1/16").build();
        assert!(matches!(vpc(&bad_cidr), Err(AwsError::Malformed { .. })));
    }

    #[test]
    fn test_field_accepts_bare_and_optional_values() {
        assert_eq!("x".field(), Some("x"));
        assert_eq!(None::<&str>.field(), None);
        assert_eq!(3i32.field(), Some(3));
        assert_eq!(Some(true).field(), Some(true));
    }
}
