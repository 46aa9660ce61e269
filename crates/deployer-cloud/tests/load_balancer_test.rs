mod common;

use common::{TestDeployment, qualified};
use deployer_cloud::{CloudError, GroupRole};
use deployer_cloud::resource::ResourceKind;

#[tokio::test(start_paused = true)]
async fn test_provision_with_dns_record() {
    let test = TestDeployment::new();
    let balancers = test.deployment.load_balancers();
    let name = qualified("dc-a.web");

    let balancer = balancers
        .provision(&name, Some("web.example.com"))
        .await
        .unwrap();

    assert_eq!(balancer.name, "dc-a.web");
    assert_eq!(balancer.balancer_name, "dc-a-web");
    assert_eq!(balancer.fqdn.as_deref(), Some("web.example.com"));
    assert_eq!(balancer.subnet_ids.len(), 3);
    assert!(balancer.security_group_id.is_some());

    let record = test
        .deployment
        .dns()
        .discover("web.example.com")
        .await
        .unwrap()
        .expect("record points at the balancer");
    assert_eq!(record.target, balancer.dns_name);

    // Balancer subnets are routed to the internet
    assert_eq!(test.sandbox.internet_gateways().len(), 1);
    assert_eq!(balancers.discover(&name).await.unwrap(), Some(balancer));
}

#[tokio::test(start_paused = true)]
async fn test_security_group_closed_until_exposed() {
    let test = TestDeployment::new();
    let balancers = test.deployment.load_balancers();
    let name = qualified("dc-a.web");
    balancers.provision(&name, None).await.unwrap();

    let index = test.deployment.index();
    let group = index
        .security_group("dc-a.web", GroupRole::LoadBalancer)
        .await.unwrap().unwrap();
    assert!(!group.open_to_world);

    let opened = balancers.expose(&name).await.unwrap();
    assert_eq!(opened.id, group.id);
    assert!(opened.open_to_world);

    // Idempotent
    balancers.expose(&name).await.unwrap();
    assert_eq!(test.sandbox.calls("AuthorizeSecurityGroupIngress"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expose_absent_balancer() {
    let test = TestDeployment::new();
    let err = test
        .deployment
        .load_balancers()
        .expose(&qualified("dc-a.web"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_destroy_removes_everything_it_built() {
    let test = TestDeployment::new();
    let balancers = test.deployment.load_balancers();
    let name = qualified("dc-a.web");

    balancers
        .provision(&name, Some("web.example.com"))
        .await
        .unwrap();
    balancers.destroy(&name).await.unwrap();
    test.assert_empty();

    balancers.destroy(&name).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_provision_twice_is_rejected() {
    let test = TestDeployment::new();
    let balancers = test.deployment.load_balancers();
    let name = qualified("dc-a.web");

    balancers.provision(&name, None).await.unwrap();
    let err = balancers.provision(&name, None).await.unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists(_)));
    assert_eq!(test.count(ResourceKind::LoadBalancer), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_rolls_back() {
    let test = TestDeployment::new();
    test.sandbox
        .fail_next("CreateLoadBalancer", "InvalidConfigurationRequest", 1);

    let err = test
        .deployment
        .load_balancers()
        .provision(&qualified("dc-a.web"), Some("web.example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::Provider(ref e) if e.code == "InvalidConfigurationRequest"));
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_failed_dns_record_rolls_back_balancer() {
    let test = TestDeployment::new();
    test.sandbox
        .fail_next("ChangeResourceRecordSets", "InvalidInput", 1);

    let err = test
        .deployment
        .load_balancers()
        .provision(&qualified("dc-a.web"), Some("web.example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::Provider(ref e) if e.operation == "ChangeResourceRecordSets"));
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_provision_under_visibility_lag() {
    let sandbox = deployer_cloud::SandboxProvider::new()
        .with_lag(ResourceKind::SecurityGroup, 3)
        .with_lag(ResourceKind::LoadBalancer, 3);
    let test = TestDeployment::with_sandbox(sandbox);
    let balancers = test.deployment.load_balancers();
    let name = qualified("dc-a.web");

    balancers.provision(&name, None).await.unwrap();
    balancers.destroy(&name).await.unwrap();
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_cname_in_use_is_left_untouched() {
    let test = TestDeployment::new();
    let balancers = test.deployment.load_balancers();
    let web = balancers
        .provision(&qualified("dc-a.web"), Some("shop.example.com"))
        .await
        .unwrap();

    let err = balancers
        .provision(&qualified("dc-a.api"), Some("shop.example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists(_)));

    // Nothing was built for the second balancer
    assert_eq!(test.sandbox.calls("CreateLoadBalancer"), 1);
    assert!(
        test.deployment
            .networks()
            .discover(&qualified("dc-a.api"))
            .await
            .unwrap()
            .is_none()
    );

    let record = test
        .deployment
        .dns()
        .discover("shop.example.com")
        .await
        .unwrap()
        .expect("record still points at the first balancer");
    assert_eq!(record.target, web.dns_name);
}

#[tokio::test(start_paused = true)]
async fn test_transient_create_rejection_is_retried() {
    let test = TestDeployment::new();
    test.sandbox.fail_next("CreateLoadBalancer", "Throttling", 1);

    let balancers = test.deployment.load_balancers();
    let name = qualified("dc-a.web");
    balancers.provision(&name, None).await.unwrap();

    assert_eq!(test.sandbox.calls("CreateLoadBalancer"), 2);
    assert_eq!(test.count(ResourceKind::LoadBalancer), 1);

    balancers.destroy(&name).await.unwrap();
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_service_on_same_network_keeps_its_own_group() {
    let test = TestDeployment::new();
    let name = qualified("dc-a.web");
    let balancers = test.deployment.load_balancers();
    let index = test.deployment.index();

    balancers.provision(&name, None).await.unwrap();

    // A failed service on the balancer's network rolls back only its own group
    test.sandbox
        .fail_next("CreateAutoScalingGroup", "ValidationError", 1);
    let image = deployer_cloud::ImageArtifact::new("ami-12345678", "#!/bin/sh\n");
    test.deployment
        .services()
        .provision(&name, &image, None)
        .await
        .unwrap_err();

    let group = index
        .security_group("dc-a.web", GroupRole::LoadBalancer)
        .await
        .unwrap();
    assert!(group.is_some());
    assert!(
        index
            .security_group("dc-a.web", GroupRole::Service)
            .await
            .unwrap()
            .is_none()
    );

    balancers.destroy(&name).await.unwrap();
    test.assert_empty();
}
