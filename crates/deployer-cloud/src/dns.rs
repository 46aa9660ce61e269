//! CNAME records pointing service names at load balancers
//!
//! The hosted zone is the FQDN minus its first label. It is created on
//! demand and removed again once only its NS and SOA records are left.

use crate::deployment::Deployment;
use crate::error::{CloudError, Result};
use crate::resource::{HostedZone, RecordChange, RecordSet, ResourceKind};
use crate::tags::expect_singleton;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// TTL of the records this manager writes
pub const CNAME_TTL: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub fqdn: String,
    pub target: String,
    pub hosted_zone_id: String,
}

/// Strip a trailing dot
fn normalize(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// `api.example.com` lives in the zone `example.com`
pub fn zone_of(fqdn: &str) -> Result<&str> {
    match normalize(fqdn).split_once('.') {
        Some((label, zone)) if !label.is_empty() && !zone.is_empty() => Ok(zone),
        _ => Err(CloudError::InvalidName(format!(
            "'{}' has no parent zone",
            fqdn
        ))),
    }
}

pub struct DnsManager {
    deployment: Deployment,
}

impl DnsManager {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Point `fqdn` at `target`, creating the parent zone if needed.
    #[instrument(skip(self))]
    pub async fn provision(&self, fqdn: &str, target: &str) -> Result<DnsRecord> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();
        let zone_name = zone_of(fqdn)?;

        if let Some(existing) = self.discover(fqdn).await? {
            return Err(CloudError::AlreadyExists(format!(
                "record '{}' -> {}",
                fqdn, existing.target
            )));
        }

        let zone = match self.zone(zone_name).await? {
            Some(zone) => zone,
            None => {
                let created = provider.create_hosted_zone(zone_name).await?;
                info!(zone = zone_name, id = %created.id, "hosted zone created");
                retrier
                    .poll(&format!("hosted zone {}", zone_name), async || {
                        Ok(self.zone(zone_name).await?.filter(|z| z.id == created.id))
                    })
                    .await?
            }
        };

        let record = RecordSet::cname(normalize(fqdn), target, CNAME_TTL);
        retrier
            .poll(&format!("create record {}", fqdn), async || {
                match provider
                    .change_record_set(&zone.id, RecordChange::Create, &record)
                    .await
                {
                    Ok(()) => Ok(Some(())),
                    Err(e) if e.is_already_absent() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;

        let created = retrier
            .poll(&format!("record {} visible", fqdn), async || {
                self.find_record(&zone, fqdn).await
            })
            .await?;
        info!(fqdn, target, zone = %zone.id, "record created");
        Ok(created)
    }

    pub async fn discover(&self, fqdn: &str) -> Result<Option<DnsRecord>> {
        let Some(zone) = self.zone(zone_of(fqdn)?).await? else {
            return Ok(None);
        };
        self.find_record(&zone, fqdn).await
    }

    /// Remove the record, then the zone if nothing but NS/SOA remains.
    #[instrument(skip(self))]
    pub async fn destroy(&self, fqdn: &str) -> Result<()> {
        let provider = self.deployment.provider();
        let retrier = self.deployment.retrier();

        let Some(zone) = self.zone(zone_of(fqdn)?).await? else {
            debug!(fqdn, "no hosted zone");
            return Ok(());
        };

        if let Some(record) = self.find_record_set(&zone, fqdn).await? {
            retrier
                .delete(&format!("record {}", fqdn), async || {
                    provider
                        .change_record_set(&zone.id, RecordChange::Delete, &record)
                        .await
                })
                .await?;
            retrier
                .wait_until_absent(&format!("record {}", fqdn), async || {
                    Ok(self.find_record_set(&zone, fqdn).await?.is_some())
                })
                .await?;
        } else {
            debug!(fqdn, "record already absent");
        }

        let remaining = provider.list_record_sets(&zone.id).await?;
        if remaining.iter().all(RecordSet::is_zone_apex_default) {
            retrier
                .delete(&format!("hosted zone {}", zone.name), async || {
                    provider.delete_hosted_zone(&zone.id).await
                })
                .await?;
            info!(zone = %zone.name, "empty hosted zone deleted");
        } else {
            debug!(zone = %zone.name, records = remaining.len(), "hosted zone still in use");
        }
        Ok(())
    }

    async fn zone(&self, zone_name: &str) -> Result<Option<HostedZone>> {
        let found: Vec<HostedZone> = self
            .deployment
            .provider()
            .find_hosted_zones(zone_name)
            .await?
            .into_iter()
            .filter(|z| normalize(&z.name) == zone_name)
            .collect();
        expect_singleton(ResourceKind::HostedZone, zone_name, found)
    }

    async fn find_record_set(&self, zone: &HostedZone, fqdn: &str) -> Result<Option<RecordSet>> {
        let records = self.deployment.provider().list_record_sets(&zone.id).await?;
        Ok(records
            .into_iter()
            .find(|r| r.record_type == "CNAME" && normalize(&r.name) == normalize(fqdn)))
    }

    async fn find_record(&self, zone: &HostedZone, fqdn: &str) -> Result<Option<DnsRecord>> {
        let record = self.find_record_set(zone, fqdn).await?;
        Ok(record.and_then(|r| {
            r.values.into_iter().next().map(|target| DnsRecord {
                fqdn: normalize(fqdn).to_string(),
                target,
                hosted_zone_id: zone.id.clone(),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_of() {
        assert_eq!(zone_of("api.example.com").unwrap(), "example.com");
        assert_eq!(zone_of("api.example.com.").unwrap(), "example.com");
        assert_eq!(zone_of("a.b.example.com").unwrap(), "b.example.com");
        assert!(zone_of("localhost").is_err());
        assert!(zone_of(".example.com").is_err());
    }
}
