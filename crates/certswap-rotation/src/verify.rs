//! Read-back of the running configuration after the commit.

use certswap_store::ConfigStore;

use crate::layout;
use crate::state::{Discrepancy, UsageSet};

pub struct Verifier<'a> {
    store: &'a dyn ConfigStore,
    vsys: String,
}

impl<'a> Verifier<'a> {
    pub fn new(store: &'a dyn ConfigStore, vsys: impl Into<String>) -> Self {
        Self {
            store,
            vsys: vsys.into(),
        }
    }

    /// Confirm every reference in the running configuration now names
    /// `new_cert_name` and no longer names `retiring`. Mismatches are
    /// returned, never retried.
    pub async fn verify(
        &self,
        usage: &UsageSet,
        retiring: &str,
        new_cert_name: &str,
    ) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();

        match self.store.read_running(&layout::certificate_path(new_cert_name)).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(cert = new_cert_name, "New certificate not found on read-back"),
            Err(e) => tracing::warn!(cert = new_cert_name, error = %e, "Certificate read-back failed"),
        }

        for reference in usage.iter() {
            let path = layout::object_path(reference, &self.vsys);
            let detail = match self.store.read_running(&path).await {
                Ok(None) => Some("object not in the running configuration".to_string()),
                Ok(Some(entry)) => {
                    if layout::references(reference.kind, &entry, retiring) {
                        Some(format!("still references `{retiring}`"))
                    } else if !layout::references(reference.kind, &entry, new_cert_name) {
                        Some(format!("does not reference `{new_cert_name}`"))
                    } else {
                        None
                    }
                }
                Err(e) => Some(format!("read-back failed: {e}")),
            };
            if let Some(detail) = detail {
                tracing::warn!(reference = %reference, detail = %detail, "Verification mismatch");
                discrepancies.push(Discrepancy {
                    reference: reference.clone(),
                    detail,
                });
            }
        }
        discrepancies
    }
}
