//! Qualified names: `<datacenter>.<network>`

use crate::error::{CloudError, Result};
use std::fmt;
use std::str::FromStr;

/// A network (and everything built on it) is addressed as
/// `<datacenter>.<network>`, e.g. `dc-a.public`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    datacenter: String,
    network: String,
}

impl QualifiedName {
    pub fn new(datacenter: impl Into<String>, network: impl Into<String>) -> Result<Self> {
        let datacenter = datacenter.into();
        let network = network.into();
        validate_label(&datacenter)?;
        validate_label(&network)?;
        Ok(Self {
            datacenter,
            network,
        })
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Name usable where dots are not allowed (load balancer names)
    pub fn resource_name(&self) -> String {
        format!("{}-{}", self.datacenter, self.network)
    }
}

/// Datacenter and network labels: ASCII alphanumerics and `-`, not empty,
/// not starting or ending with `-`.
pub fn validate_label(label: &str) -> Result<()> {
    let valid = !label.is_empty()
        && label.len() <= 63
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !label.starts_with('-')
        && !label.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(CloudError::InvalidName(format!(
            "'{}' must be 1-63 ASCII letters, digits or '-'",
            label
        )))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.datacenter, self.network)
    }
}

impl FromStr for QualifiedName {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((datacenter, network)) if !network.contains('.') => {
                Self::new(datacenter, network)
            }
            _ => Err(CloudError::InvalidName(format!(
                "'{}' is not of the form <datacenter>.<network>",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified_name() {
        let name: QualifiedName = "dc-a.public".parse().unwrap();
        assert_eq!(name.datacenter(), "dc-a");
        assert_eq!(name.network(), "public");
        assert_eq!(name.to_string(), "dc-a.public");
        assert_eq!(name.resource_name(), "dc-a-public");
    }

    #[test]
    fn test_reject_malformed_names() {
        for bad in ["public", "dc.a.b", ".public", "dc.", "dc_a.public", "-dc.public"] {
            assert!(bad.parse::<QualifiedName>().is_err(), "{bad} should be rejected");
        }
    }
}
