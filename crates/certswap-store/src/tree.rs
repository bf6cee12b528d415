//! In-memory form of an appliance configuration subtree.
//!
//! PAN-OS configuration is XML where list members are `<entry name="..">`
//! elements. `ConfigNode` keeps exactly what the rotation needs: tag,
//! attributes, leaf text and ordered children.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::StoreError;

/// Tag used for named list members.
pub const ENTRY_TAG: &str = "entry";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigNode {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<ConfigNode>,
}

impl ConfigNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// `<entry name="..">`
    pub fn entry(name: impl Into<String>) -> Self {
        let mut node = Self::new(ENTRY_TAG);
        node.attributes.insert("name".to_string(), name.into());
        node
    }

    /// Leaf element `<tag>text</tag>`.
    pub fn leaf(tag: impl Into<String>, text: impl Into<String>) -> Self {
        let mut node = Self::new(tag);
        node.text = Some(text.into());
        node
    }

    pub fn with_child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.attribute("name")
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn child(&self, tag: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Trimmed text of the first child with `tag`, if non-empty.
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.child(tag)
            .and_then(|c| c.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Named list members directly under this node.
    pub fn entries(&self) -> impl Iterator<Item = &ConfigNode> {
        self.children.iter().filter(|c| c.tag == ENTRY_TAG)
    }

    pub fn find_entry(&self, name: &str) -> Option<&ConfigNode> {
        self.entries().find(|e| e.name() == Some(name))
    }

    /// First descendant (depth-first, self included) with `tag`.
    pub fn find_descendant(&self, tag: &str) -> Option<&ConfigNode> {
        if self.tag == tag {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_descendant(tag))
    }

    /// Whether any node in the subtree (self included) with `tag` has
    /// trimmed text equal to `value`.
    pub fn contains_text(&self, tag: &str, value: &str) -> bool {
        (self.tag == tag && self.text.as_deref().map(str::trim) == Some(value))
            || self.children.iter().any(|c| c.contains_text(tag, value))
    }

    /// Rewrite the text of every `tag` node in the subtree whose trimmed
    /// text equals `from`. Returns how many nodes changed.
    pub fn replace_text(&mut self, tag: &str, from: &str, to: &str) -> usize {
        let mut changed = 0;
        if self.tag == tag && self.text.as_deref().map(str::trim) == Some(from) {
            self.text = Some(to.to_string());
            changed += 1;
        }
        for child in &mut self.children {
            changed += child.replace_text(tag, from, to);
        }
        changed
    }

    /// All non-empty text in this subtree, depth-first.
    pub fn collect_text(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_text_into(&mut out);
        out
    }

    fn collect_text_into(&self, out: &mut Vec<String>) {
        if let Some(text) = self.text.as_deref().map(str::trim) {
            if !text.is_empty() {
                out.push(text.to_string());
            }
        }
        for child in &self.children {
            child.collect_text_into(out);
        }
    }

    /// Locations of every node in the subtree whose trimmed text equals
    /// `value`. Each location is the list of steps from this node down,
    /// rendered as `tag` or `tag[name]`.
    pub fn text_locations(&self, value: &str) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        let mut trail = Vec::new();
        self.text_locations_into(value, &mut trail, &mut out);
        out
    }

    fn text_locations_into(
        &self,
        value: &str,
        trail: &mut Vec<String>,
        out: &mut Vec<Vec<String>>,
    ) {
        trail.push(self.step());
        if self.text.as_deref().map(str::trim) == Some(value) {
            out.push(trail.clone());
        }
        for child in &self.children {
            child.text_locations_into(value, trail, out);
        }
        trail.pop();
    }

    fn step(&self) -> String {
        match self.name() {
            Some(name) => format!("{}[{name}]", self.tag),
            None => self.tag.clone(),
        }
    }

    /// Parse the root element of an XML document.
    pub fn parse(xml: &str) -> Result<ConfigNode, StoreError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<ConfigNode> = Vec::new();
        let mut root: Option<ConfigNode> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| StoreError::Decode(format!("malformed XML: {e}")))?;
            match event {
                Event::Start(start) => stack.push(node_from_start(&start)?),
                Event::Empty(start) => {
                    let node = node_from_start(&start)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| StoreError::Decode("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| StoreError::Decode(format!("bad text: {e}")))?;
                    push_text(&mut stack, &text);
                }
                Event::CData(data) => {
                    let bytes = data.into_inner();
                    push_text(&mut stack, &String::from_utf8_lossy(&bytes));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(StoreError::Decode("unterminated element".to_string()));
        }
        root.ok_or_else(|| StoreError::Decode("empty document".to_string()))
    }

    /// Serialize this subtree as compact XML.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {key}=\"{}\"", quick_xml::escape::escape(value.as_str())));
        }
        if self.text.is_none() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if let Some(text) = &self.text {
            out.push_str(&quick_xml::escape::escape(text.as_str()));
        }
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str(&format!("</{}>", self.tag));
    }
}

fn node_from_start(start: &BytesStart<'_>) -> Result<ConfigNode, StoreError> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut node = ConfigNode::new(tag);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| StoreError::Decode(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| StoreError::Decode(format!("bad attribute value: {e}")))?
            .into_owned();
        node.attributes.insert(key, value);
    }
    Ok(node)
}

fn attach(
    stack: &mut [ConfigNode],
    root: &mut Option<ConfigNode>,
    node: ConfigNode,
) -> Result<(), StoreError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(node);
            Ok(())
        }
        None => Err(StoreError::Decode("multiple root elements".to_string())),
    }
}

fn push_text(stack: &mut [ConfigNode], text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if let Some(node) = stack.last_mut() {
        match &mut node.text {
            Some(existing) => existing.push_str(text),
            None => node.text = Some(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<response status="success">
  <result total-count="1" count="1">
    <certificate>
      <entry name="old-wildcard">
        <common-name>*.example.com</common-name>
        <issuer>Example CA</issuer>
        <not-valid-after>Mar  1 12:00:00 2026 GMT</not-valid-after>
      </entry>
      <entry name="mgmt"><common-name>fw01</common-name></entry>
    </certificate>
  </result>
</response>"#;

    #[test]
    fn parses_entries_and_attributes() {
        let root = ConfigNode::parse(SAMPLE).unwrap();
        assert_eq!(root.tag, "response");
        assert_eq!(root.attribute("status"), Some("success"));

        let certs = root.child("result").unwrap().child("certificate").unwrap();
        let names: Vec<_> = certs.entries().filter_map(|e| e.name()).collect();
        assert_eq!(names, vec!["old-wildcard", "mgmt"]);

        let old = certs.find_entry("old-wildcard").unwrap();
        assert_eq!(old.child_text("common-name"), Some("*.example.com"));
        assert_eq!(old.child_text("issuer"), Some("Example CA"));
    }

    #[test]
    fn parses_cdata_and_escapes() {
        let root =
            ConfigNode::parse("<msg><line><![CDATA[a < b]]></line><line>x &amp; y</line></msg>")
                .unwrap();
        assert_eq!(root.collect_text(), vec!["a < b", "x & y"]);
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(ConfigNode::parse("").is_err());
        assert!(ConfigNode::parse("<a><b></a>").is_err());
        assert!(ConfigNode::parse("<a/><b/>").is_err());
    }

    #[test]
    fn to_xml_escapes_text_and_attributes() {
        let node = ConfigNode::entry("a&b").with_child(ConfigNode::leaf("certificate", "<new>"));
        assert_eq!(
            node.to_xml(),
            r#"<entry name="a&amp;b"><certificate>&lt;new&gt;</certificate></entry>"#
        );
        let reparsed = ConfigNode::parse(&node.to_xml()).unwrap();
        assert_eq!(reparsed, node);
    }

    #[test]
    fn replace_text_rewrites_nested_matches_only() {
        let mut portal = ConfigNode::entry("gp-portal")
            .with_child(ConfigNode::leaf("certificate", "old-wildcard"))
            .with_child(
                ConfigNode::new("client-config")
                    .with_child(ConfigNode::leaf("certificate", "old-wildcard"))
                    .with_child(ConfigNode::leaf("certificate", "root-ca")),
            );
        assert!(portal.contains_text("certificate", "old-wildcard"));
        assert_eq!(portal.replace_text("certificate", "old-wildcard", "new"), 2);
        assert!(!portal.contains_text("certificate", "old-wildcard"));
        assert!(portal.contains_text("certificate", "root-ca"));
    }

    #[test]
    fn text_locations_report_named_steps() {
        let root = ConfigNode::new("config").with_child(
            ConfigNode::new("ssl-tls-service-profile").with_child(
                ConfigNode::entry("edge-profile")
                    .with_child(ConfigNode::leaf("certificate", "old-wildcard")),
            ),
        );
        let locations = root.text_locations("old-wildcard");
        assert_eq!(
            locations,
            vec![vec![
                "config".to_string(),
                "ssl-tls-service-profile".to_string(),
                "entry[edge-profile]".to_string(),
                "certificate".to_string(),
            ]]
        );
    }
}
