//! Discovery of the objects that reference a certificate.

use futures_util::future::try_join_all;

use certswap_store::{ConfigNode, ConfigStore};

use crate::error::RotationError;
use crate::layout::{self, MANAGED_COLLECTIONS};
use crate::state::{UsageKind, UsageReference, UsageSet};

pub struct UsageResolver<'a> {
    store: &'a dyn ConfigStore,
    vsys: String,
}

impl<'a> UsageResolver<'a> {
    pub fn new(store: &'a dyn ConfigStore, vsys: impl Into<String>) -> Self {
        Self {
            store,
            vsys: vsys.into(),
        }
    }

    /// One read per object class; the union is the usage set.
    ///
    /// Read-only and repeatable. A collection that is not configured
    /// contributes nothing.
    pub async fn find_usage(&self, cert_name: &str) -> Result<UsageSet, RotationError> {
        let per_kind = try_join_all(
            UsageKind::ALL
                .into_iter()
                .map(|kind| self.find_in_collection(kind, cert_name)),
        )
        .await?;

        let usage: UsageSet = per_kind.into_iter().flatten().collect();
        tracing::info!(
            cert = cert_name,
            ssl_profiles = usage.count(UsageKind::SslProfile),
            portals = usage.count(UsageKind::Portal),
            gateways = usage.count(UsageKind::Gateway),
            "Usage discovery complete"
        );
        Ok(usage)
    }

    async fn find_in_collection(
        &self,
        kind: UsageKind,
        cert_name: &str,
    ) -> Result<Vec<UsageReference>, RotationError> {
        let path = layout::collection_path(kind, &self.vsys);
        let Some(collection) = self.store.read(&path).await? else {
            tracing::debug!(kind = kind.as_str(), "Collection not configured");
            return Ok(Vec::new());
        };
        Ok(collection
            .entries()
            .filter(|entry| layout::references(kind, entry, cert_name))
            .filter_map(|entry| entry.name())
            .map(|name| UsageReference::new(kind, name))
            .collect())
    }
}

/// Locations in a configuration export that name `cert_name` outside the
/// managed collections and outside certificate definitions, such as a
/// management interface or an LDAP server profile. Reported for manual
/// follow-up only.
pub fn scan_unmanaged(export: &ConfigNode, cert_name: &str) -> Vec<String> {
    export
        .text_locations(cert_name)
        .into_iter()
        .filter(|steps| {
            let managed = steps
                .iter()
                .any(|step| MANAGED_COLLECTIONS.contains(&step_tag(step)));
            let inside_definition = steps
                .split_last()
                .is_some_and(|(_, parents)| parents.iter().any(|s| step_tag(s) == "certificate"));
            !managed && !inside_definition
        })
        .map(|steps| steps.join("/"))
        .collect()
}

fn step_tag(step: &str) -> &str {
    step.split('[').next().unwrap_or(step)
}
