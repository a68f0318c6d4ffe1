//! XML parsing for ruleset documents
//!
//! Reads the `<root>` document into raw string-typed structures; all
//! validation and pre-computation happens in the compile step. The reader is
//! a flat event loop: element text accumulates in a buffer and is committed
//! when the element closes.

use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;

use crate::{HubError, Result};

/// Raw `<root>` document
#[derive(Debug, Clone, Default)]
pub struct RawRuleset {
    /// `ruleset_id` attribute
    pub id: String,
    /// `ruleset_name` attribute
    pub name: String,
    /// `type` attribute, verbatim
    pub mode: Option<String>,
    /// `<rule>` children in document order
    pub rules: Vec<RawRule>,
}

/// Raw `<rule>` element
#[derive(Debug, Clone, Default)]
pub struct RawRule {
    /// `id` attribute
    pub id: String,
    /// `name` attribute
    pub name: String,
    /// `author` attribute
    pub author: String,
    /// `<filter>` child
    pub filter: Option<RawFilter>,
    /// `condition` attribute of `<checklist>`
    pub condition: Option<String>,
    /// `<node>` children in document order
    pub nodes: Vec<RawNode>,
    /// `<threshold>` child
    pub threshold: Option<RawThreshold>,
    /// `<append>` children in document order
    pub appends: Vec<RawAppend>,
    /// `<del>` text, comma-separated paths
    pub del: Option<String>,
}

/// Raw `<filter>` element
#[derive(Debug, Clone, Default)]
pub struct RawFilter {
    /// `field` attribute
    pub field: String,
    /// Element text
    pub value: String,
}

/// Raw `<node>` element
#[derive(Debug, Clone, Default)]
pub struct RawNode {
    /// `id` attribute
    pub id: Option<String>,
    /// `type` attribute
    pub node_type: String,
    /// `field` attribute
    pub field: String,
    /// `logic` attribute
    pub logic: Option<String>,
    /// `delimiter` attribute
    pub delimiter: Option<String>,
    /// Element text, the comparand
    pub value: String,
}

/// Raw `<threshold>` element
#[derive(Debug, Clone, Default)]
pub struct RawThreshold {
    /// `group_by` attribute, comma-separated paths
    pub group_by: String,
    /// `range` attribute, seconds
    pub range: String,
    /// `count_type` attribute
    pub count_type: Option<String>,
    /// `count_field` attribute
    pub count_field: Option<String>,
    /// Element text, the count
    pub value: String,
}

/// Raw `<append>` element
#[derive(Debug, Clone, Default)]
pub struct RawAppend {
    /// `type` attribute
    pub append_type: Option<String>,
    /// `field_name` attribute
    pub field_name: String,
    /// Element text
    pub value: String,
}

fn attr(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for entry in element.attributes() {
        let entry = entry?;
        if entry.key.as_ref() == name.as_bytes() {
            return Ok(Some(entry.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn attr_or_empty(element: &BytesStart<'_>, name: &str) -> Result<String> {
    Ok(attr(element, name)?.unwrap_or_default())
}

/// Parse a ruleset XML document into its raw form
pub fn parse_document(xml: &str) -> Result<RawRuleset> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc: Option<RawRuleset> = None;
    let mut rule: Option<RawRule> = None;
    let mut pending_filter: Option<RawFilter> = None;
    let mut pending_node: Option<RawNode> = None;
    let mut pending_threshold: Option<RawThreshold> = None;
    let mut pending_append: Option<RawAppend> = None;
    let mut in_del = false;
    let mut text_buffer = String::new();

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                let name = e.name();
                match name.as_ref() {
                    b"root" => {
                        doc = Some(RawRuleset {
                            id: attr_or_empty(&e, "ruleset_id")?,
                            name: attr_or_empty(&e, "ruleset_name")?,
                            mode: attr(&e, "type")?,
                            rules: Vec::new(),
                        });
                    }
                    b"rule" => {
                        rule = Some(RawRule {
                            id: attr_or_empty(&e, "id")?,
                            name: attr_or_empty(&e, "name")?,
                            author: attr_or_empty(&e, "author")?,
                            ..RawRule::default()
                        });
                    }
                    b"filter" => {
                        pending_filter = Some(RawFilter {
                            field: attr_or_empty(&e, "field")?,
                            value: String::new(),
                        });
                    }
                    b"checklist" => {
                        if let Some(rule) = rule.as_mut() {
                            rule.condition = attr(&e, "condition")?;
                        }
                    }
                    b"node" => {
                        pending_node = Some(RawNode {
                            id: attr(&e, "id")?,
                            node_type: attr_or_empty(&e, "type")?,
                            field: attr_or_empty(&e, "field")?,
                            logic: attr(&e, "logic")?,
                            delimiter: attr(&e, "delimiter")?,
                            value: String::new(),
                        });
                    }
                    b"threshold" => {
                        pending_threshold = Some(RawThreshold {
                            group_by: attr_or_empty(&e, "group_by")?,
                            range: attr_or_empty(&e, "range")?,
                            count_type: attr(&e, "count_type")?,
                            count_field: attr(&e, "count_field")?,
                            value: String::new(),
                        });
                    }
                    b"append" => {
                        pending_append = Some(RawAppend {
                            append_type: attr(&e, "type")?,
                            field_name: attr_or_empty(&e, "field_name")?,
                            value: String::new(),
                        });
                    }
                    b"del" => {
                        in_del = true;
                    }
                    _ => {}
                }
            }
            // Self-closing elements commit immediately with empty text
            Ok(XmlEvent::Empty(e)) => match e.name().as_ref() {
                b"root" => {
                    doc = Some(RawRuleset {
                        id: attr_or_empty(&e, "ruleset_id")?,
                        name: attr_or_empty(&e, "ruleset_name")?,
                        mode: attr(&e, "type")?,
                        rules: Vec::new(),
                    });
                }
                b"rule" => {
                    if let Some(doc) = doc.as_mut() {
                        doc.rules.push(RawRule {
                            id: attr_or_empty(&e, "id")?,
                            name: attr_or_empty(&e, "name")?,
                            author: attr_or_empty(&e, "author")?,
                            ..RawRule::default()
                        });
                    }
                }
                b"filter" => {
                    if let Some(rule) = rule.as_mut() {
                        rule.filter = Some(RawFilter {
                            field: attr_or_empty(&e, "field")?,
                            value: String::new(),
                        });
                    }
                }
                b"checklist" => {
                    if let Some(rule) = rule.as_mut() {
                        rule.condition = attr(&e, "condition")?;
                    }
                }
                b"node" => {
                    if let Some(rule) = rule.as_mut() {
                        rule.nodes.push(RawNode {
                            id: attr(&e, "id")?,
                            node_type: attr_or_empty(&e, "type")?,
                            field: attr_or_empty(&e, "field")?,
                            logic: attr(&e, "logic")?,
                            delimiter: attr(&e, "delimiter")?,
                            value: String::new(),
                        });
                    }
                }
                b"threshold" => {
                    if let Some(rule) = rule.as_mut() {
                        rule.threshold = Some(RawThreshold {
                            group_by: attr_or_empty(&e, "group_by")?,
                            range: attr_or_empty(&e, "range")?,
                            count_type: attr(&e, "count_type")?,
                            count_field: attr(&e, "count_field")?,
                            value: String::new(),
                        });
                    }
                }
                b"append" => {
                    if let Some(rule) = rule.as_mut() {
                        rule.appends.push(RawAppend {
                            append_type: attr(&e, "type")?,
                            field_name: attr_or_empty(&e, "field_name")?,
                            value: String::new(),
                        });
                    }
                }
                b"del" => {
                    if let Some(rule) = rule.as_mut() {
                        rule.del = Some(String::new());
                    }
                }
                _ => {}
            },
            Ok(XmlEvent::Text(e)) => {
                text_buffer = e
                    .unescape()
                    .map_err(HubError::from)?
                    .to_string();
            }
            Ok(XmlEvent::CData(e)) => {
                text_buffer = String::from_utf8_lossy(&e.into_inner()).to_string();
            }
            Ok(XmlEvent::End(e)) => {
                match e.name().as_ref() {
                    b"filter" => {
                        if let (Some(mut filter), Some(rule)) =
                            (pending_filter.take(), rule.as_mut())
                        {
                            filter.value = std::mem::take(&mut text_buffer);
                            rule.filter = Some(filter);
                        }
                    }
                    b"node" => {
                        if let (Some(mut node), Some(rule)) = (pending_node.take(), rule.as_mut())
                        {
                            node.value = std::mem::take(&mut text_buffer);
                            rule.nodes.push(node);
                        }
                    }
                    b"threshold" => {
                        if let (Some(mut threshold), Some(rule)) =
                            (pending_threshold.take(), rule.as_mut())
                        {
                            threshold.value = std::mem::take(&mut text_buffer);
                            rule.threshold = Some(threshold);
                        }
                    }
                    b"append" => {
                        if let (Some(mut append), Some(rule)) =
                            (pending_append.take(), rule.as_mut())
                        {
                            append.value = std::mem::take(&mut text_buffer);
                            rule.appends.push(append);
                        }
                    }
                    b"del" => {
                        if in_del {
                            if let Some(rule) = rule.as_mut() {
                                rule.del = Some(std::mem::take(&mut text_buffer));
                            }
                            in_del = false;
                        }
                    }
                    b"rule" => {
                        if let (Some(done), Some(doc)) = (rule.take(), doc.as_mut()) {
                            doc.rules.push(done);
                        }
                    }
                    _ => {}
                }
                text_buffer.clear();
            }
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(HubError::Xml(e)),
        }
    }

    doc.ok_or_else(|| HubError::compile("RULESET ROOT ELEMENT MISSING"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<root ruleset_id="rs01" ruleset_name="web_detect" type="DETECTION">
  <rule id="r1" name="admin probe" author="secops">
    <filter field="source">web</filter>
    <checklist condition="a and b">
      <node id="a" type="INCL" field="url">admin</node>
      <node id="b" type="REGEX" field="agent">curl/\d+</node>
    </checklist>
    <threshold group_by="ip" range="60" count_type="CLASSIFY" count_field="uid">5</threshold>
    <append field_name="alert">true</append>
    <append type="PLUGIN" field_name="seen_at">now()</append>
    <del>debug.trace,tmp</del>
  </rule>
</root>"#;

    #[test]
    fn test_parse_full_document() {
        let doc = parse_document(SAMPLE).unwrap();
        assert_eq!(doc.id, "rs01");
        assert_eq!(doc.name, "web_detect");
        assert_eq!(doc.mode.as_deref(), Some("DETECTION"));
        assert_eq!(doc.rules.len(), 1);

        let rule = &doc.rules[0];
        assert_eq!(rule.id, "r1");
        assert_eq!(rule.name, "admin probe");
        assert_eq!(rule.author, "secops");
        assert_eq!(rule.condition.as_deref(), Some("a and b"));

        let filter = rule.filter.as_ref().unwrap();
        assert_eq!(filter.field, "source");
        assert_eq!(filter.value, "web");

        assert_eq!(rule.nodes.len(), 2);
        assert_eq!(rule.nodes[0].id.as_deref(), Some("a"));
        assert_eq!(rule.nodes[0].node_type, "INCL");
        assert_eq!(rule.nodes[0].value, "admin");
        assert_eq!(rule.nodes[1].value, r"curl/\d+");

        let threshold = rule.threshold.as_ref().unwrap();
        assert_eq!(threshold.group_by, "ip");
        assert_eq!(threshold.range, "60");
        assert_eq!(threshold.count_type.as_deref(), Some("CLASSIFY"));
        assert_eq!(threshold.count_field.as_deref(), Some("uid"));
        assert_eq!(threshold.value, "5");

        assert_eq!(rule.appends.len(), 2);
        assert_eq!(rule.appends[0].field_name, "alert");
        assert_eq!(rule.appends[0].append_type, None);
        assert_eq!(rule.appends[1].append_type.as_deref(), Some("PLUGIN"));
        assert_eq!(rule.appends[1].value, "now()");

        assert_eq!(rule.del.as_deref(), Some("debug.trace,tmp"));
    }

    #[test]
    fn test_parse_missing_root() {
        assert!(parse_document("<other/>").is_err());
        assert!(parse_document("").is_err());
    }

    #[test]
    fn test_parse_escaped_entities() {
        let xml = r#"<root ruleset_id="x" ruleset_name="y">
          <rule id="r" name="n" author="a">
            <checklist>
              <node type="INCL" field="q">a&amp;b</node>
            </checklist>
          </rule>
        </root>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.rules[0].nodes[0].value, "a&b");
    }

    #[test]
    fn test_parse_malformed_xml() {
        assert!(parse_document("<root ruleset_id='x'><rule></root>").is_err());
    }
}
