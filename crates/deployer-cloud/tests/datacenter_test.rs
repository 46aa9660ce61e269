mod common;

use common::{ATTEMPTS, TestDeployment};
use deployer_cloud::provider::CloudProvider;
use deployer_cloud::resource::ResourceKind;
use deployer_cloud::{CloudError, Ipv4Cidr, SandboxProvider};

fn cidr(s: &str) -> Ipv4Cidr {
    s.parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_blocks_from_private_pool() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();
    let pool = [Ipv4Cidr::PRIVATE];

    let a = datacenters.provision("dc-a", 16, &pool, &[]).await.unwrap();
    assert_eq!(a.cidr, cidr("10.0.0.0/16"));

    let b = datacenters
        .provision("dc-b", 16, &pool, &[cidr("10.0.0.0/16")])
        .await
        .unwrap();
    assert_eq!(b.cidr, cidr("10.1.0.0/16"));

    datacenters.destroy("dc-a").await.unwrap();
    let c = datacenters.provision("dc-c", 16, &pool, &[]).await.unwrap();
    assert_eq!(c.cidr, cidr("10.0.0.0/16"));
}

#[tokio::test(start_paused = true)]
async fn test_siblings_never_overlap() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();

    for name in ["dc-a", "dc-b", "dc-c", "dc-d"] {
        datacenters.provision_default(name).await.unwrap();
    }

    let all = datacenters.list().await.unwrap();
    assert_eq!(all.len(), 4);
    for (i, x) in all.iter().enumerate() {
        assert!(Ipv4Cidr::PRIVATE.contains(&x.cidr));
        assert_eq!(x.cidr.prefix(), 16);
        for y in &all[i + 1..] {
            assert!(!x.cidr.overlaps(&y.cidr), "{} overlaps {}", x.cidr, y.cidr);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_provision_then_discover_round_trip() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();

    let created = datacenters.provision_default("dc-a").await.unwrap();
    let found = datacenters.discover("dc-a").await.unwrap().unwrap();
    assert_eq!(found, created);
    assert_eq!(datacenters.discover("dc-z").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_provision_twice_is_rejected() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();

    datacenters.provision_default("dc-a").await.unwrap();
    let err = datacenters.provision_default("dc-a").await.unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists(_)));
    assert_eq!(test.count(ResourceKind::Vpc), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();
    let pool = [Ipv4Cidr::PRIVATE];

    datacenters.provision("dc-a", 9, &pool, &[]).await.unwrap();
    datacenters.provision("dc-b", 9, &pool, &[]).await.unwrap();
    let err = datacenters.provision("dc-c", 9, &pool, &[]).await.unwrap_err();

    assert!(matches!(err, CloudError::AddressSpaceExhausted { prefix: 9, .. }));
    assert_eq!(test.count(ResourceKind::Vpc), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_name_is_rejected_before_any_call() {
    let test = TestDeployment::new();
    let err = test
        .deployment
        .datacenters()
        .provision_default("dc.a")
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::InvalidName(_)));
    assert_eq!(test.sandbox.calls("DescribeVpcs"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_absent_is_noop() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();

    datacenters.destroy("never-existed").await.unwrap();
    datacenters.provision_default("dc-a").await.unwrap();
    datacenters.destroy("dc-a").await.unwrap();
    datacenters.destroy("dc-a").await.unwrap();
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_tags_are_bad_state() {
    let test = TestDeployment::new();
    let index = test.deployment.index();
    let tags = index.tags("dc-a");

    for block in ["10.0.0.0/16", "10.1.0.0/16"] {
        let id = test.sandbox.create_vpc(cidr(block)).await.unwrap();
        test.sandbox.tag_resources(&[id], &tags).await.unwrap();
    }

    let err = test.deployment.datacenters().discover("dc-a").await.unwrap_err();
    assert!(matches!(err, CloudError::BadEnvironmentState(_)));
}

#[tokio::test(start_paused = true)]
async fn test_other_deployments_are_invisible() {
    let sandbox = std::sync::Arc::new(SandboxProvider::new());
    let ours = deployer_cloud::Deployment::new(
        sandbox.clone(),
        deployer_cloud::DeploymentSettings::new("ours"),
    );
    let theirs = deployer_cloud::Deployment::new(
        sandbox.clone(),
        deployer_cloud::DeploymentSettings::new("theirs"),
    );

    ours.datacenters().provision_default("dc-a").await.unwrap();
    assert!(theirs.datacenters().discover("dc-a").await.unwrap().is_none());
    assert!(theirs.datacenters().list().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_visible_on_nth_attempt() {
    // Hidden from three reads, so the fourth confirmation sees it
    let test = TestDeployment::with_sandbox(SandboxProvider::new().with_lag(ResourceKind::Vpc, 3));

    let created = test
        .deployment
        .datacenters()
        .provision_default("dc-a")
        .await
        .unwrap();

    assert_eq!(created.name, "dc-a");
    assert_eq!(test.sandbox.calls("CreateVpc"), 1);
    assert_eq!(test.sandbox.calls("CreateTags"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_never_visible_times_out_without_orphans() {
    let test =
        TestDeployment::with_sandbox(SandboxProvider::new().with_lag(ResourceKind::Vpc, u32::MAX));

    let err = test
        .deployment
        .datacenters()
        .provision_default("dc-a")
        .await
        .unwrap_err();

    match err {
        CloudError::OperationTimedOut { attempts, .. } => assert_eq!(attempts, ATTEMPTS),
        other => panic!("expected a timeout, got {other}"),
    }
    assert_eq!(test.sandbox.calls("CreateTags"), ATTEMPTS);
    assert_eq!(test.sandbox.calls("DeleteVpc"), 1);
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_absorbed() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();
    datacenters.provision_default("dc-a").await.unwrap();

    test.sandbox.fail_next("DeleteVpc", "RequestLimitExceeded", 3);
    datacenters.destroy("dc-a").await.unwrap();

    assert_eq!(test.sandbox.calls("DeleteVpc"), 4);
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_fatal_delete_surfaces_and_retry_completes() {
    let test = TestDeployment::new();
    let datacenters = test.deployment.datacenters();
    datacenters.provision_default("dc-a").await.unwrap();

    test.sandbox.fail_next("DeleteVpc", "UnauthorizedOperation", 1);
    let err = datacenters.destroy("dc-a").await.unwrap_err();
    assert!(matches!(err, CloudError::Provider(ref e) if e.code == "UnauthorizedOperation"));
    assert_eq!(test.count(ResourceKind::Vpc), 1);

    datacenters.destroy("dc-a").await.unwrap();
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_throttled_vpc_create_is_reissued() {
    let test = TestDeployment::new();
    test.sandbox.fail_next("CreateVpc", "RequestLimitExceeded", 1);

    let datacenters = test.deployment.datacenters();
    let dc = datacenters.provision_default("dc-a").await.unwrap();

    assert_eq!(dc.cidr, cidr("10.0.0.0/16"));
    assert_eq!(test.sandbox.calls("CreateVpc"), 2);
    assert_eq!(test.count(ResourceKind::Vpc), 1);
}
