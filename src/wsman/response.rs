//! WS-Management response parsing.
//!
//! Responses are turned into JSON objects keyed by local element names
//! (namespace prefixes dropped). Leaf elements become strings, repeated
//! elements become arrays.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use serde_json::{Map, Value};

use super::WsmanError;

/// Deepest element nesting accepted from a device.
pub const MAX_DEPTH: usize = 256;

/// A parsed, non-fault response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsmanResponse {
    /// `s:Header` contents (`Action`, `MessageID`, `RelatesTo`, ...).
    pub header: Map<String, Value>,
    /// Local name of the first `s:Body` child; empty for an empty body.
    pub method: String,
    /// Contents of that child.
    pub body: Value,
}

impl WsmanResponse {
    pub fn action(&self) -> Option<&str> {
        self.header.get("Action").and_then(Value::as_str)
    }

    pub fn relates_to(&self) -> Option<&str> {
        self.header.get("RelatesTo").and_then(Value::as_str)
    }

    /// `EnumerationContext` of an Enumerate or Pull response.
    pub fn enumeration_context(&self) -> Option<&str> {
        self.body
            .get("EnumerationContext")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
    }

    /// Pull responses mark the final batch with `EndOfSequence`.
    pub fn end_of_sequence(&self) -> bool {
        self.body.get("EndOfSequence").is_some()
    }

    /// Instances carried in `Items`, flattened across classes.
    pub fn items(&self) -> Vec<Value> {
        let Some(Value::Object(items)) = self.body.get("Items") else {
            return Vec::new();
        };
        items
            .values()
            .flat_map(|v| match v {
                Value::Array(list) => list.clone(),
                other => vec![other.clone()],
            })
            .collect()
    }

    /// `ReturnValue` of an Exec response.
    pub fn return_value(&self) -> Option<i64> {
        self.body
            .get("ReturnValue")
            .and_then(Value::as_str)
            .and_then(|v| v.trim().parse().ok())
    }
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn new(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn path(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    fn to_json(&self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text.clone());
        }
        let mut map = Map::new();
        for child in &self.children {
            let value = child.to_json();
            match map.get_mut(&child.name) {
                Some(Value::Array(list)) => list.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

fn parse_tree(xml: &str) -> Result<Node, WsmanError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack = vec![Node::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.len() > MAX_DEPTH {
                    return Err(WsmanError::Parse(format!(
                        "elements nested deeper than {}",
                        MAX_DEPTH
                    )));
                }
                stack.push(Node::new(e.local_name().as_ref()));
            }
            Ok(Event::Empty(e)) => {
                let node = Node::new(e.local_name().as_ref());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(WsmanError::Parse("unbalanced end tag".into()));
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| WsmanError::Parse(e.to_string()))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(WsmanError::Parse(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(WsmanError::Parse("unexpected end of document".into()));
    }
    stack
        .pop()
        .and_then(|document| document.children.into_iter().next())
        .ok_or_else(|| WsmanError::Parse("empty document".into()))
}

fn fault_from(node: &Node) -> WsmanError {
    let text = |path: &[&str]| node.path(path).map(|n| n.text.trim().to_string());
    WsmanError::Fault {
        code: text(&["Code", "Value"]).unwrap_or_default(),
        subcode: text(&["Code", "Subcode", "Value"]).filter(|s| !s.is_empty()),
        reason: text(&["Reason", "Text"]).unwrap_or_default(),
    }
}

/// Parse a response envelope. A SOAP fault is returned as
/// [`WsmanError::Fault`].
pub fn parse_response(xml: &str) -> Result<WsmanResponse, WsmanError> {
    let envelope = parse_tree(xml)?;
    if envelope.name != "Envelope" {
        return Err(WsmanError::Parse(format!(
            "expected Envelope, found {}",
            envelope.name
        )));
    }

    let header = match envelope.child("Header").map(Node::to_json) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let Some(first) = envelope.child("Body").and_then(|b| b.children.first()) else {
        return Ok(WsmanResponse {
            header,
            method: String::new(),
            body: Value::Object(Map::new()),
        });
    };
    if first.name == "Fault" {
        return Err(fault_from(first));
    }

    let body = match first.to_json() {
        Value::String(_) => Value::Object(Map::new()),
        other => other,
    };
    Ok(WsmanResponse {
        header,
        method: first.name.clone(),
        body,
    })
}
