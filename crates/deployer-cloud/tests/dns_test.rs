mod common;

use common::TestDeployment;
use deployer_cloud::CloudError;
use deployer_cloud::provider::CloudProvider;
use deployer_cloud::resource::ResourceKind;

#[tokio::test(start_paused = true)]
async fn test_record_creates_parent_zone() {
    let test = TestDeployment::new();
    let dns = test.deployment.dns();

    let record = dns
        .provision("api.example.com", "lb-1.elb.internal")
        .await
        .unwrap();
    assert_eq!(record.fqdn, "api.example.com");
    assert_eq!(record.target, "lb-1.elb.internal");

    let zones = test.sandbox.find_hosted_zones("example.com").await.unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].name, "example.com.");
    assert_eq!(record.hosted_zone_id, zones[0].id);

    let records = test.sandbox.list_record_sets(&zones[0].id).await.unwrap();
    let cname = records.iter().find(|r| r.record_type == "CNAME").unwrap();
    assert_eq!(cname.ttl, Some(60));

    assert_eq!(dns.discover("api.example.com").await.unwrap(), Some(record));
}

#[tokio::test(start_paused = true)]
async fn test_zone_shared_until_last_record_goes() {
    let test = TestDeployment::new();
    let dns = test.deployment.dns();

    dns.provision("api.example.com", "lb-1").await.unwrap();
    dns.provision("www.example.com", "lb-2").await.unwrap();
    assert_eq!(test.sandbox.calls("CreateHostedZone"), 1);

    dns.destroy("api.example.com").await.unwrap();
    assert_eq!(test.count(ResourceKind::HostedZone), 1);
    assert!(dns.discover("api.example.com").await.unwrap().is_none());

    dns.destroy("www.example.com").await.unwrap();
    assert_eq!(test.count(ResourceKind::HostedZone), 0);
}

#[tokio::test(start_paused = true)]
async fn test_provision_twice_is_rejected() {
    let test = TestDeployment::new();
    let dns = test.deployment.dns();

    dns.provision("api.example.com", "lb-1").await.unwrap();
    let err = dns.provision("api.example.com", "lb-2").await.unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists(_)));
}

#[tokio::test(start_paused = true)]
async fn test_destroy_absent_is_noop() {
    let test = TestDeployment::new();
    let dns = test.deployment.dns();

    dns.destroy("api.example.com").await.unwrap();
    dns.provision("api.example.com", "lb-1").await.unwrap();
    dns.destroy("api.example.com").await.unwrap();
    dns.destroy("api.example.com").await.unwrap();
    test.assert_empty();
}

#[tokio::test(start_paused = true)]
async fn test_name_without_zone_is_rejected() {
    let test = TestDeployment::new();
    let err = test
        .deployment
        .dns()
        .provision("localhost", "lb-1")
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::InvalidName(_)));
    assert_eq!(test.sandbox.calls("ListHostedZonesByName"), 0);
}
