//! Where each object class lives in a single-device PAN-OS configuration.

use certswap_store::{ConfigNode, ConfigPath};

use crate::state::{UsageKind, UsageReference};

const CERT_TAG: &str = "certificate";

/// Tags of the managed object collections, as they appear in exports.
pub const MANAGED_COLLECTIONS: [&str; 3] = [
    "ssl-tls-service-profile",
    "global-protect-portal",
    "global-protect-gateway",
];

/// `/config/shared/certificate`
pub fn certificate_section() -> ConfigPath {
    ConfigPath::shared().child(CERT_TAG)
}

pub fn certificate_path(name: &str) -> ConfigPath {
    certificate_section().entry(name)
}

/// Collection holding every object of `kind`.
pub fn collection_path(kind: UsageKind, vsys: &str) -> ConfigPath {
    match kind {
        UsageKind::SslProfile => ConfigPath::shared().child(MANAGED_COLLECTIONS[0]),
        UsageKind::Portal => ConfigPath::vsys(vsys)
            .child("global-protect")
            .child(MANAGED_COLLECTIONS[1]),
        UsageKind::Gateway => ConfigPath::vsys(vsys)
            .child("global-protect")
            .child(MANAGED_COLLECTIONS[2]),
    }
}

pub fn object_path(reference: &UsageReference, vsys: &str) -> ConfigPath {
    collection_path(reference.kind, vsys).entry(reference.object_name.as_str())
}

/// Whether the object entry `entry` of class `kind` names `cert_name`.
///
/// TLS profiles carry the certificate as a direct child. Portals and
/// gateways may nest it under client or satellite sections. A gateway that
/// only names a TLS profile does not match.
pub fn references(kind: UsageKind, entry: &ConfigNode, cert_name: &str) -> bool {
    match kind {
        UsageKind::SslProfile => entry.child_text(CERT_TAG) == Some(cert_name),
        UsageKind::Portal | UsageKind::Gateway => entry.contains_text(CERT_TAG, cert_name),
    }
}

/// Repoint `entry` from `from` to `to`. Returns the number of rewritten
/// certificate elements.
pub fn repoint(kind: UsageKind, entry: &mut ConfigNode, from: &str, to: &str) -> usize {
    match kind {
        UsageKind::SslProfile => entry
            .children
            .iter_mut()
            .filter(|c| c.tag == CERT_TAG)
            .map(|c| c.replace_text(CERT_TAG, from, to))
            .sum(),
        UsageKind::Portal | UsageKind::Gateway => entry.replace_text(CERT_TAG, from, to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_naming_a_profile_is_not_a_reference() {
        let gateway = ConfigNode::entry("vpn-gw-1")
            .with_child(ConfigNode::leaf("ssl-tls-service-profile", "edge-profile"));
        assert!(!references(UsageKind::Gateway, &gateway, "old-wildcard"));
        assert!(!references(UsageKind::Gateway, &gateway, "edge-profile"));
    }

    #[test]
    fn profile_matches_direct_certificate_only() {
        let profile = ConfigNode::entry("edge-profile").with_child(
            ConfigNode::new("protocol-settings")
                .with_child(ConfigNode::leaf("certificate", "old-wildcard")),
        );
        assert!(!references(UsageKind::SslProfile, &profile, "old-wildcard"));

        let mut profile = profile.with_child(ConfigNode::leaf("certificate", "old-wildcard"));
        assert!(references(UsageKind::SslProfile, &profile, "old-wildcard"));
        assert_eq!(
            repoint(UsageKind::SslProfile, &mut profile, "old-wildcard", "new"),
            1
        );
        assert_eq!(profile.child_text("certificate"), Some("new"));
    }

    #[test]
    fn portal_paths_live_under_the_vsys() {
        let reference = UsageReference::new(UsageKind::Portal, "gp-portal");
        assert_eq!(
            object_path(&reference, "vsys2").to_xpath(),
            "/config/devices/entry[@name='localhost.localdomain']/vsys/entry[@name='vsys2']/global-protect/global-protect-portal/entry[@name='gp-portal']"
        );
    }
}
