//! Structured configuration paths.
//!
//! Callers compose paths from tags and entry names. How a path is rendered
//! (XPath for PAN-OS, a tree walk for the in-memory store) is private to the
//! store implementations.

use std::fmt;

use serde::Serialize;

use crate::tree::ENTRY_TAG;

/// Device entry used by single-device (non-Panorama) configurations.
pub const LOCAL_DEVICE: &str = "localhost.localdomain";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Segment {
    pub tag: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConfigPath {
    segments: Vec<Segment>,
}

impl ConfigPath {
    /// `/config`
    pub fn root() -> Self {
        Self {
            segments: vec![Segment {
                tag: "config".to_string(),
                name: None,
            }],
        }
    }

    /// `/config/shared`
    pub fn shared() -> Self {
        Self::root().child("shared")
    }

    /// `/config/devices/entry[localhost.localdomain]/vsys/entry[<vsys>]`
    pub fn vsys(vsys: &str) -> Self {
        Self::root()
            .child("devices")
            .entry(LOCAL_DEVICE)
            .child("vsys")
            .entry(vsys)
    }

    pub fn child(mut self, tag: impl Into<String>) -> Self {
        self.segments.push(Segment {
            tag: tag.into(),
            name: None,
        });
        self
    }

    /// Named list member under the current path.
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.segments.push(Segment {
            tag: ENTRY_TAG.to_string(),
            name: Some(name.into()),
        });
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// PAN-OS XPath rendering, e.g. `/config/shared/certificate/entry[@name='x']`.
    pub fn to_xpath(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            out.push_str(&segment.tag);
            if let Some(name) = &segment.name {
                // XPath 1.0 has no escape for quotes inside a literal.
                if name.contains('\'') {
                    out.push_str(&format!("[@name=\"{name}\"]"));
                } else {
                    out.push_str(&format!("[@name='{name}']"));
                }
            }
        }
        out
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xpath())
    }
}
