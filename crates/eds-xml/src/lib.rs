//! Parse EDS OWServer `details.xml` feeds into a generic node tree using quick-xml.
//!
//! The feed has no published schema and no fixed depth: the root element
//! describes the gateway, nested elements describe connected one-wire
//! devices, and their nested elements describe sensor readings. The same
//! tree builder handles all levels without special-casing any of them.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed xml: {0}")]
    Malformed(String),
    #[error("document contains no root element")]
    Empty,
}

/// One XML element with the attributes the EDS feed is known to carry.
///
/// Unknown attributes are dropped during parsing. `content` holds the
/// element's own character data; for container elements it stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    /// Local element name, e.g. `Temperature` or `owd_DS18B20`.
    pub name: String,
    /// `Description` attribute, empty when absent.
    pub description: String,
    /// `Writable` attribute as reported by the gateway ("True"/"False").
    pub writable: String,
    /// `Units` attribute, the vendor unit string.
    pub units: String,
    /// Trimmed character data of this element.
    pub content: String,
    /// Child elements in document order.
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Whether this node carries no nested elements.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Immediate children of one node, partitioned into scalar parameters and
/// subnodes.
///
/// A child with no children of its own is a scalar parameter (its content
/// keyed by its name; the last occurrence wins on duplicate names). Any
/// other child is a subnode. The split is applied once by whichever
/// reconciler owns the node; it never recurses by itself.
#[derive(Debug, Default)]
pub struct NodeSplit<'a> {
    /// Leaf children as a name to content map.
    pub params: HashMap<String, String>,
    /// Nested children in document order.
    pub subnodes: Vec<&'a XmlNode>,
}

/// Partition the immediate children of `node` into parameters and subnodes.
pub fn split(node: &XmlNode) -> NodeSplit<'_> {
    let mut out = NodeSplit::default();
    for child in &node.children {
        if child.is_leaf() {
            out.params.insert(child.name.clone(), child.content.clone());
        } else {
            out.subnodes.push(child);
        }
    }
    out
}

/// Build the node tree for a whole document.
///
/// Recursive-descent over the quick-xml event stream with an explicit
/// stack, so nesting depth is unbounded. The XML declaration, comments,
/// processing instructions and whitespace-only text are skipped.
pub fn parse(bytes: &[u8]) -> Result<XmlNode, XmlError> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                if root.is_some() && stack.is_empty() {
                    return Err(XmlError::Malformed("multiple root elements".into()));
                }
                stack.push(node_from_start(&start)?);
            }
            Ok(Event::Empty(start)) => {
                if root.is_some() && stack.is_empty() {
                    return Err(XmlError::Malformed("multiple root elements".into()));
                }
                let node = node_from_start(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Ok(Event::Text(text)) => {
                if let Some(top) = stack.last_mut() {
                    let value = text
                        .unescape()
                        .map_err(|err| XmlError::Malformed(err.to_string()))?;
                    top.content.push_str(value.trim());
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| XmlError::Malformed("unexpected closing tag".into()))?;
                attach(&mut stack, &mut root, node);
            }
            Ok(Event::Eof) => {
                if !stack.is_empty() {
                    return Err(XmlError::Malformed("unexpected end of document".into()));
                }
                break;
            }
            Ok(_) => {}
            Err(err) => return Err(XmlError::Malformed(err.to_string())),
        }
        buf.clear();
    }

    root.ok_or(XmlError::Empty)
}

fn attach(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

fn node_from_start(start: &BytesStart<'_>) -> Result<XmlNode, XmlError> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        ..XmlNode::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XmlError::Malformed(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| XmlError::Malformed(err.to_string()))?;
        match attr.key.local_name().as_ref() {
            b"Description" => node.description = value.into_owned(),
            b"Writable" => node.writable = value.into_owned(),
            b"Units" => node.units = value.into_owned(),
            _ => {}
        }
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <Devices_Detail_Response>
            <PollCount>331</PollCount>
            <owd_DS18B20 Description="Programmable resolution thermometer">
                <Name>DS18B20</Name>
                <ROMId>E100080223A10C28</ROMId>
                <Temperature Description="Temperature" Writable="False" Units="Centigrade">21.5625</Temperature>
            </owd_DS18B20>
        </Devices_Detail_Response>"#;

    #[test]
    fn builds_tree_with_attributes() {
        let root = parse(NESTED.as_bytes()).expect("parse");
        assert_eq!(root.name, "Devices_Detail_Response");
        assert_eq!(root.children.len(), 2);

        let device = &root.children[1];
        assert_eq!(device.name, "owd_DS18B20");
        assert_eq!(device.description, "Programmable resolution thermometer");

        let sensor = &device.children[2];
        assert_eq!(sensor.name, "Temperature");
        assert_eq!(sensor.units, "Centigrade");
        assert_eq!(sensor.writable, "False");
        assert_eq!(sensor.content, "21.5625");
    }

    #[test]
    fn deep_nesting_has_no_depth_limit() {
        let doc = "<a><b><c><d><e>leaf</e></d></c></b></a>";
        let mut node = parse(doc.as_bytes()).expect("parse");
        for name in ["a", "b", "c", "d"] {
            assert_eq!(node.name, name);
            assert_eq!(node.children.len(), 1);
            node = node.children.into_iter().next().unwrap();
        }
        assert_eq!(node.name, "e");
        assert_eq!(node.content, "leaf");
    }

    #[test]
    fn split_partitions_leaves_and_containers() {
        let root = parse(NESTED.as_bytes()).expect("parse");
        let top = split(&root);
        assert_eq!(top.params.len(), 1);
        assert_eq!(top.params["PollCount"], "331");
        assert_eq!(top.subnodes.len(), 1);

        let device = split(top.subnodes[0]);
        assert_eq!(device.params.len(), 3);
        assert_eq!(device.params["ROMId"], "E100080223A10C28");
        // The sensor reading is a leaf too, so it lands in params.
        assert_eq!(device.params["Temperature"], "21.5625");
        assert!(device.subnodes.is_empty());
    }

    #[test]
    fn split_keeps_subnode_document_order() {
        let doc = "<r><z><l>1</l></z><a><l>2</l></a><m><l>3</l></m></r>";
        let root = parse(doc.as_bytes()).expect("parse");
        let names: Vec<&str> = split(&root)
            .subnodes
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, ["z", "a", "m"]);
    }

    #[test]
    fn duplicate_parameter_names_last_wins() {
        let doc = "<r><p>first</p><p>second</p></r>";
        let root = parse(doc.as_bytes()).expect("parse");
        let out = split(&root);
        assert_eq!(out.params.len(), 1);
        assert_eq!(out.params["p"], "second");
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(matches!(parse(b"<a><b></a>"), Err(XmlError::Malformed(_))));
        assert!(matches!(parse(b"<a><b>"), Err(XmlError::Malformed(_))));
        assert!(matches!(parse(b"   "), Err(XmlError::Empty)));
    }

    #[test]
    fn unknown_attributes_are_ignored() {
        let doc = r#"<r Vendor="EDS" Units="Lux">5</r>"#;
        let root = parse(doc.as_bytes()).expect("parse");
        assert_eq!(root.units, "Lux");
        assert!(root.description.is_empty());
    }
}
