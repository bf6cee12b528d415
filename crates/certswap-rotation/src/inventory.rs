//! Certificate inventory and selection of the certificate to retire.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;

use certswap_store::{ConfigNode, ConfigStore};

use crate::error::RotationError;
use crate::layout;

/// What an operator needs to pick a certificate without asking the store
/// again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub name: String,
    pub common_name: Option<String>,
    pub issuer: Option<String>,
    /// Expiry as reported by the appliance, e.g. `Mar  1 12:00:00 2026 GMT`.
    pub expiry: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_private_key: bool,
}

impl CertificateSummary {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn expires_within(&self, now: DateTime<Utc>, days: i64) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now + TimeDelta::days(days))
    }
}

pub struct CertificateInventory<'a> {
    store: &'a dyn ConfigStore,
}

impl<'a> CertificateInventory<'a> {
    pub fn new(store: &'a dyn ConfigStore) -> Self {
        Self { store }
    }

    /// Certificates in the shared certificate section. Read-only.
    pub async fn list(&self) -> Result<Vec<CertificateSummary>, RotationError> {
        let section = self.store.read(&layout::certificate_section()).await?;
        let certificates = section.as_ref().map(summarize).unwrap_or_default();
        tracing::info!(count = certificates.len(), "Certificate inventory retrieved");
        Ok(certificates)
    }
}

/// Summaries of every entry under a `<certificate>` section node.
pub fn summarize(section: &ConfigNode) -> Vec<CertificateSummary> {
    section
        .entries()
        .filter_map(|entry| {
            let name = entry.name()?.to_string();
            let expiry = entry.child_text("not-valid-after").map(str::to_string);
            let expires_at = entry
                .child_text("expiry-epoch")
                .and_then(|e| e.parse::<i64>().ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .or_else(|| expiry.as_deref().and_then(parse_not_valid_after));
            Some(CertificateSummary {
                name,
                common_name: entry.child_text("common-name").map(str::to_string),
                issuer: entry.child_text("issuer").map(str::to_string),
                expiry,
                expires_at,
                has_private_key: entry.child("private-key").is_some(),
            })
        })
        .collect()
}

/// Parse the appliance's `Mon DD HH:MM:SS YYYY GMT` rendering.
fn parse_not_valid_after(text: &str) -> Option<DateTime<Utc>> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = normalized.strip_suffix(" GMT").unwrap_or(&normalized);
    NaiveDateTime::parse_from_str(trimmed, "%b %d %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Result of asking a selector for the certificate to retire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Chosen(String),
    /// The operator declined to choose. Nothing has been mutated.
    Cancelled,
    /// A policy found no certificate matching its rule.
    NoMatch(String),
}

/// Picks the certificate to retire from the inventory. Async so that an
/// interactive selector can wait on the operator without holding a worker.
#[async_trait]
pub trait CertificateSelector: Send + Sync {
    async fn select(&self, inventory: &[CertificateSummary]) -> Selection;
}

/// Declarative choice by certificate name.
pub struct NamedSelector(pub String);

#[async_trait]
impl CertificateSelector for NamedSelector {
    async fn select(&self, _inventory: &[CertificateSummary]) -> Selection {
        Selection::Chosen(self.0.clone())
    }
}

/// Policy choice: the soonest-expiring certificate with a given subject CN.
pub struct CommonNameSelector {
    pub common_name: String,
    /// Never chosen, typically the replacement itself.
    pub exclude: Option<String>,
}

#[async_trait]
impl CertificateSelector for CommonNameSelector {
    async fn select(&self, inventory: &[CertificateSummary]) -> Selection {
        inventory
            .iter()
            .filter(|c| {
                c.common_name
                    .as_deref()
                    .is_some_and(|cn| cn.eq_ignore_ascii_case(&self.common_name))
            })
            .filter(|c| self.exclude.as_deref() != Some(c.name.as_str()))
            .min_by_key(|c| (c.expires_at.is_none(), c.expires_at))
            .map(|c| Selection::Chosen(c.name.clone()))
            .unwrap_or_else(|| {
                Selection::NoMatch(format!(
                    "no certificate with common name `{}`",
                    self.common_name
                ))
            })
    }
}

/// Resolve a selection into the name of the certificate to retire.
pub fn resolve_selection(
    selection: Selection,
    inventory: &[CertificateSummary],
    new_cert_name: &str,
) -> Result<String, RotationError> {
    let name = match selection {
        Selection::Chosen(name) => name,
        Selection::Cancelled => return Err(RotationError::Cancelled),
        Selection::NoMatch(reason) => return Err(RotationError::Selection(reason)),
    };
    if inventory.is_empty() {
        return Err(RotationError::Selection(
            "no certificates on the appliance".to_string(),
        ));
    }
    if name == new_cert_name {
        return Err(RotationError::Selection(format!(
            "`{name}` is the name of the replacement certificate"
        )));
    }
    if !inventory.iter().any(|c| c.name == name) {
        return Err(RotationError::Selection(format!(
            "certificate `{name}` not found on the appliance"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn section() -> ConfigNode {
        ConfigNode::new("certificate")
            .with_child(
                ConfigNode::entry("old-wildcard")
                    .with_child(ConfigNode::leaf("common-name", "*.example.com"))
                    .with_child(ConfigNode::leaf("issuer", "Example CA"))
                    .with_child(ConfigNode::leaf("not-valid-after", "Mar  1 12:00:00 2026 GMT"))
                    .with_child(ConfigNode::leaf("private-key", "*****")),
            )
            .with_child(
                ConfigNode::entry("older-wildcard")
                    .with_child(ConfigNode::leaf("common-name", "*.example.com"))
                    .with_child(ConfigNode::leaf("expiry-epoch", "1735732800")),
            )
            .with_child(
                ConfigNode::entry("root-ca").with_child(ConfigNode::leaf("common-name", "Root")),
            )
    }

    #[test]
    fn summarize_parses_expiry_forms() {
        let certs = summarize(&section());
        assert_eq!(certs.len(), 3);
        assert_eq!(
            certs[0].expires_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
        );
        assert!(certs[0].has_private_key);
        assert_eq!(
            certs[1].expires_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(certs[2].expires_at, None);
    }

    #[test]
    fn expiry_helpers() {
        let certs = summarize(&section());
        let now = Utc.with_ymd_and_hms(2026, 2, 11, 0, 0, 0).unwrap();
        assert!(!certs[0].is_expired(now));
        assert!(certs[0].expires_within(now, 30));
        assert!(certs[1].is_expired(now));
        assert!(!certs[2].expires_within(now, 3650));
    }

    #[tokio::test]
    async fn common_name_selector_picks_soonest_expiry() {
        let certs = summarize(&section());
        let selector = CommonNameSelector {
            common_name: "*.EXAMPLE.com".to_string(),
            exclude: None,
        };
        assert_eq!(
            selector.select(&certs).await,
            Selection::Chosen("older-wildcard".to_string())
        );

        let selector = CommonNameSelector {
            common_name: "vpn.example.org".to_string(),
            exclude: None,
        };
        assert!(matches!(selector.select(&certs).await, Selection::NoMatch(_)));
    }

    #[test]
    fn resolve_rejects_unknown_and_replacement_names() {
        let certs = summarize(&section());
        let ok = resolve_selection(Selection::Chosen("old-wildcard".into()), &certs, "new");
        assert_eq!(ok.unwrap(), "old-wildcard");

        let unknown = resolve_selection(Selection::Chosen("nope".into()), &certs, "new");
        assert!(matches!(unknown, Err(RotationError::Selection(_))));

        let same = resolve_selection(Selection::Chosen("root-ca".into()), &certs, "root-ca");
        assert!(matches!(same, Err(RotationError::Selection(_))));

        let cancelled = resolve_selection(Selection::Cancelled, &certs, "new");
        assert!(matches!(cancelled, Err(RotationError::Cancelled)));

        let empty = resolve_selection(Selection::Chosen("x".into()), &[], "new");
        assert!(matches!(empty, Err(RotationError::Selection(_))));
    }
}
