use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, Clone, thiserror::Error)]
pub enum XmlTreeError {
    #[error("malformed xml at byte {pos}: {source}")]
    Malformed { pos: usize, source: String },
    #[error("document type declarations are not accepted")]
    DoctypeRejected,
    #[error("document has no root element")]
    Empty,
}

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str()).filter(|s| !s.is_empty())
    }
}

/// Parse the document into a plain tree of elements. Never expands
/// DOCTYPE-declared entities — a `<!DOCTYPE ...>` anywhere in the
/// document is treated as a hard parse failure rather than resolved,
/// which rules out XXE/billion-laughs style payloads by construction.
pub fn parse_xml_tree(bytes: &[u8]) -> Result<XmlNode, XmlTreeError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    let mut buf = Vec::new();

    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                stack.push(XmlNode {
                    name,
                    ..Default::default()
                });
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                let node = XmlNode {
                    name,
                    ..Default::default()
                };
                push_completed(&mut stack, &mut root, node);
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| XmlTreeError::Malformed {
                    pos,
                    source: "unbalanced end tag".to_string(),
                })?;
                push_completed(&mut stack, &mut root, node);
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = t.unescape().map_err(|e| XmlTreeError::Malformed {
                        pos,
                        source: e.to_string(),
                    })?;
                    top.text.push_str(decoded.trim());
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(t.as_ref()));
                }
            }
            Ok(Event::DocType(_)) => return Err(XmlTreeError::DoctypeRejected),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(XmlTreeError::Malformed {
                    pos,
                    source: e.to_string(),
                })
            }
        }
        buf.clear();
    }

    root.ok_or(XmlTreeError::Empty)
}

fn push_completed(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements() {
        let xml = b"<Root><A>1</A><B><C>2</C></B></Root>";
        let tree = parse_xml_tree(xml).unwrap();
        assert_eq!(tree.name, "Root");
        assert_eq!(tree.text_of("A"), Some("1"));
        assert_eq!(tree.child("B").unwrap().text_of("C"), Some("2"));
    }

    #[test]
    fn rejects_doctype() {
        let xml = b"<!DOCTYPE foo [<!ENTITY x \"y\">]><Root/>";
        assert!(matches!(parse_xml_tree(xml), Err(XmlTreeError::DoctypeRejected)));
    }

    #[test]
    fn rejects_empty_document() {
        assert!(matches!(parse_xml_tree(b""), Err(XmlTreeError::Empty)));
    }

    #[test]
    fn repeated_siblings_are_all_kept() {
        let xml = b"<Root><Item>1</Item><Item>2</Item></Root>";
        let tree = parse_xml_tree(xml).unwrap();
        let items: Vec<_> = tree.children_named("Item").collect();
        assert_eq!(items.len(), 2);
    }
}
