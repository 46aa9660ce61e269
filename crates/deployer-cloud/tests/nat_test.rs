mod common;

use common::{TestDeployment, qualified};
use deployer_cloud::resource::{NatGatewayState, ResourceKind};
use deployer_cloud::{CloudError, SandboxProvider};
use std::collections::BTreeSet;

#[tokio::test(start_paused = true)]
async fn test_one_gateway_per_subnet() {
    let test = TestDeployment::new();
    let name = qualified("dc-a.egress");

    let gateways = test.deployment.nat_gateways().provision(&name).await.unwrap();
    let network = test
        .deployment
        .networks()
        .discover(&name)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(gateways.len(), 3);
    let subnets: BTreeSet<&str> = gateways.iter().map(|g| g.subnet_id.as_str()).collect();
    let expected: BTreeSet<&str> = network.subnets.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(subnets, expected);
    assert!(gateways.iter().all(|g| g.state == NatGatewayState::Available));
    assert!(gateways.iter().all(|g| g.allocation_id.is_some()));
    assert_eq!(test.sandbox.address_count(), 3);

    let discovered = test.deployment.nat_gateways().discover(&name).await.unwrap();
    assert_eq!(discovered.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_pending_gateways() {
    let test =
        TestDeployment::with_sandbox(SandboxProvider::new().with_lag(ResourceKind::NatGateway, 4));

    let gateways = test
        .deployment
        .nat_gateways()
        .provision(&qualified("dc-a.egress"))
        .await
        .unwrap();
    assert!(gateways.iter().all(|g| g.state == NatGatewayState::Available));
    assert_eq!(test.sandbox.calls("CreateNatGateway"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_provision_twice_is_rejected() {
    let test = TestDeployment::new();
    let nat = test.deployment.nat_gateways();
    let name = qualified("dc-a.egress");

    nat.provision(&name).await.unwrap();
    let err = nat.provision(&name).await.unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists(_)));
    assert_eq!(test.count(ResourceKind::NatGateway), 3);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_releases_addresses() {
    let test = TestDeployment::new();
    let nat = test.deployment.nat_gateways();
    let name = qualified("dc-a.egress");

    nat.provision(&name).await.unwrap();
    nat.destroy(&name).await.unwrap();
    test.assert_empty();

    nat.destroy(&name).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_gateway_releases_its_address() {
    let test = TestDeployment::new();
    test.sandbox
        .fail_next("CreateNatGateway", "NatGatewayLimitExceeded", 1);

    let err = test
        .deployment
        .nat_gateways()
        .provision(&qualified("dc-a.egress"))
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::Provider(ref e) if e.code == "NatGatewayLimitExceeded"));
    test.assert_empty();
}
