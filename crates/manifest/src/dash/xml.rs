use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use crate::error::{ManifestError, ManifestResult};

/// A parsed XML element.
///
/// Names keep the prefix they were written with. Lookups go by local name, which is enough
/// to tell the MPD namespaces (`cenc:`, `mspr:`, `dashif:`, `ms:`) apart in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    text: String,
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    /// Attribute by qualified name, falling back to the local name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| self.attributes.iter().find(|(key, _)| local(key) == name))
            .map(|(_, value)| value.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children
            .iter()
            .filter(move |child| child.local_name() == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.local_name() == name)
    }

    /// Depth-first search below this node.
    pub fn find_descendant(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find_map(|child| {
            if child.local_name() == name {
                Some(child)
            } else {
                child.find_descendant(name)
            }
        })
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Trimmed text, `None` when empty.
    pub fn non_empty_text(&self) -> Option<&str> {
        Some(self.text()).filter(|text| !text.is_empty())
    }
}

fn node_from_start(start: &BytesStart) -> ManifestResult<XmlNode> {
    let mut node = XmlNode::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> ManifestResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(ManifestError::InvalidXml(format!(
                "unexpected second root element <{}>",
                node.name
            )))
        }
    }
    Ok(())
}

/// Parses a whole document into an element tree and returns its root.
pub fn parse_document(xml: &str) -> ManifestResult<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => stack.push(node_from_start(e)?),
            Event::Empty(ref e) => {
                let node = node_from_start(e)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    ManifestError::InvalidXml("unbalanced closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(ref e) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(ref e) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ManifestError::InvalidXml(format!(
            "element <{}> is never closed",
            open.name
        )));
    }
    root.ok_or_else(|| ManifestError::InvalidXml("document has no root element".to_string()))
}
