//! SOAP / WS-Management envelope construction.

use serde_json::Value;
use std::fmt::Write as _;

use super::resource::class_name;

// ============================================================================
// Namespaces and actions
// ============================================================================

pub const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
pub const WSEN_NS: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
pub const WSE_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing";
pub const WSMID_NS: &str = "http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd";

const ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

pub const ACTION_GET: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Get";
pub const ACTION_PUT: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Put";
pub const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
pub const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
pub const ACTION_ENUMERATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Enumerate";
pub const ACTION_PULL: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Pull";
pub const ACTION_SUBSCRIBE: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/Subscribe";
pub const ACTION_UNSUBSCRIBE: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/Unsubscribe";

/// Elements per Pull.
pub const PULL_MAX_ELEMENTS: u32 = 999;

/// Characters per Pull.
pub const PULL_MAX_CHARACTERS: u32 = 99999;

/// `w:OperationTimeout` sent with every request.
pub const OPERATION_TIMEOUT: &str = "PT60S";

/// Event delivery mode for [`subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Push,
    PushWithAck,
    Pull,
}

impl DeliveryMode {
    pub fn uri(&self) -> &'static str {
        match self {
            DeliveryMode::Push => "http://schemas.xmlsoap.org/ws/2004/08/eventing/DeliveryModes/Push",
            DeliveryMode::PushWithAck => "http://schemas.dmtf.org/wbem/wsman/1/wsman/PushWithAck",
            DeliveryMode::Pull => "http://schemas.dmtf.org/wbem/wsman/1/wsman/Pull",
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Escape special characters for XML
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn selector_set(selectors: &[(&str, &str)]) -> String {
    if selectors.is_empty() {
        return String::new();
    }
    let mut out = String::from("<w:SelectorSet>");
    for (name, value) in selectors {
        let _ = write!(
            out,
            "<w:Selector Name=\"{}\">{}</w:Selector>",
            xml_escape(name),
            xml_escape(value)
        );
    }
    out.push_str("</w:SelectorSet>");
    out
}

/// Wrap `body` in a full envelope.
pub fn build_envelope(
    action: Option<&str>,
    resource_uri: Option<&str>,
    message_id: u64,
    extra_header: &str,
    body: &str,
) -> String {
    let mut header = String::new();
    if let Some(action) = action {
        let _ = write!(header, "<a:Action>{}</a:Action>", xml_escape(action));
    }
    header.push_str("<a:To>/wsman</a:To>");
    if let Some(uri) = resource_uri {
        let _ = write!(header, "<w:ResourceURI>{}</w:ResourceURI>", xml_escape(uri));
    }
    let _ = write!(
        header,
        "<a:MessageID>{}</a:MessageID><a:ReplyTo><a:Address>{}</a:Address></a:ReplyTo><w:OperationTimeout>{}</w:OperationTimeout>",
        message_id, ANONYMOUS, OPERATION_TIMEOUT
    );
    header.push_str(extra_header);

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}"><s:Header>{header}</s:Header><s:Body>{body}</s:Body></s:Envelope>"#
    )
}

/// Render `value` as child elements in the `r:` namespace.
fn write_properties(out: &mut String, value: &Value) {
    let Value::Object(map) = value else {
        return;
    };
    for (name, value) in map {
        write_property(out, name, value);
    }
}

fn write_property(out: &mut String, name: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                write_property(out, name, item);
            }
        }
        Value::Object(_) => {
            let _ = write!(out, "<r:{}>", name);
            write_properties(out, value);
            let _ = write!(out, "</r:{}>", name);
        }
        Value::String(s) => {
            let _ = write!(out, "<r:{}>{}</r:{}>", name, xml_escape(s), name);
        }
        other => {
            let _ = write!(out, "<r:{}>{}</r:{}>", name, other, name);
        }
    }
}

fn instance_body(element: &str, resource_uri: &str, properties: &Value) -> String {
    let mut body = format!("<r:{} xmlns:r=\"{}\">", element, xml_escape(resource_uri));
    write_properties(&mut body, properties);
    let _ = write!(body, "</r:{}>", element);
    body
}

pub fn get(resource_uri: &str, selectors: &[(&str, &str)], message_id: u64) -> String {
    build_envelope(Some(ACTION_GET), Some(resource_uri), message_id, &selector_set(selectors), "")
}

pub fn put(resource_uri: &str, properties: &Value, selectors: &[(&str, &str)], message_id: u64) -> String {
    let body = instance_body(class_name(resource_uri), resource_uri, properties);
    build_envelope(Some(ACTION_PUT), Some(resource_uri), message_id, &selector_set(selectors), &body)
}

pub fn create(resource_uri: &str, properties: &Value, message_id: u64) -> String {
    let body = instance_body(class_name(resource_uri), resource_uri, properties);
    build_envelope(Some(ACTION_CREATE), Some(resource_uri), message_id, "", &body)
}

pub fn delete(resource_uri: &str, selectors: &[(&str, &str)], message_id: u64) -> String {
    build_envelope(Some(ACTION_DELETE), Some(resource_uri), message_id, &selector_set(selectors), "")
}

pub fn enumerate(resource_uri: &str, message_id: u64) -> String {
    let body = format!("<Enumerate xmlns=\"{}\" />", WSEN_NS);
    build_envelope(Some(ACTION_ENUMERATE), Some(resource_uri), message_id, "", &body)
}

pub fn pull(resource_uri: &str, context: &str, message_id: u64) -> String {
    let body = format!(
        "<Pull xmlns=\"{}\"><EnumerationContext>{}</EnumerationContext><MaxElements>{}</MaxElements><MaxCharacters>{}</MaxCharacters></Pull>",
        WSEN_NS,
        xml_escape(context),
        PULL_MAX_ELEMENTS,
        PULL_MAX_CHARACTERS
    );
    build_envelope(Some(ACTION_PULL), Some(resource_uri), message_id, "", &body)
}

/// Invoke `method` on the resource. Arguments go into `<method>_INPUT`.
pub fn exec_method(
    resource_uri: &str,
    method: &str,
    args: &Value,
    selectors: &[(&str, &str)],
    message_id: u64,
) -> String {
    let action = format!("{}/{}", resource_uri, method);
    let body = instance_body(&format!("{}_INPUT", method), resource_uri, args);
    build_envelope(Some(&action), Some(resource_uri), message_id, &selector_set(selectors), &body)
}

pub fn subscribe(
    resource_uri: &str,
    mode: DeliveryMode,
    notify_to: Option<&str>,
    selectors: &[(&str, &str)],
    message_id: u64,
) -> String {
    let mut body = format!(
        "<e:Subscribe xmlns:e=\"{}\"><e:Delivery Mode=\"{}\">",
        WSE_NS,
        mode.uri()
    );
    if let Some(address) = notify_to {
        let _ = write!(
            body,
            "<e:NotifyTo><a:Address>{}</a:Address></e:NotifyTo>",
            xml_escape(address)
        );
    }
    body.push_str("</e:Delivery></e:Subscribe>");
    build_envelope(Some(ACTION_SUBSCRIBE), Some(resource_uri), message_id, &selector_set(selectors), &body)
}

pub fn unsubscribe(resource_uri: &str, selectors: &[(&str, &str)], message_id: u64) -> String {
    let body = format!("<e:Unsubscribe xmlns:e=\"{}\" />", WSE_NS);
    build_envelope(Some(ACTION_UNSUBSCRIBE), Some(resource_uri), message_id, &selector_set(selectors), &body)
}

/// WS-Management Identify; answered without authentication.
pub fn identify() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:wsmid="{WSMID_NS}"><s:Header/><s:Body><wsmid:Identify/></s:Body></s:Envelope>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsman::resource::resource_uri;
    use serde_json::json;

    #[test]
    fn test_get_envelope() {
        let uri = resource_uri("AMT_GeneralSettings");
        let xml = get(&uri, &[], 7);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<a:Action>http://schemas.xmlsoap.org/ws/2004/09/transfer/Get</a:Action>"));
        assert!(xml.contains(&format!("<w:ResourceURI>{}</w:ResourceURI>", uri)));
        assert!(xml.contains("<a:MessageID>7</a:MessageID>"));
        assert!(xml.contains("<s:Body></s:Body>"));
        assert!(!xml.contains("SelectorSet"));
    }

    #[test]
    fn test_selectors_escaped() {
        let xml = delete("uri", &[("InstanceID", "a<b&c")], 1);
        assert!(xml.contains("<w:Selector Name=\"InstanceID\">a&lt;b&amp;c</w:Selector>"));
    }

    #[test]
    fn test_put_body() {
        let uri = resource_uri("AMT_GeneralSettings");
        let xml = put(
            &uri,
            &json!({"HostName": "node1", "DHCPv6ConfigurationTimeout": 0, "Skip": null}),
            &[],
            3,
        );
        assert!(xml.contains(&format!("<r:AMT_GeneralSettings xmlns:r=\"{}\">", uri)));
        assert!(xml.contains("<r:HostName>node1</r:HostName>"));
        assert!(xml.contains("<r:DHCPv6ConfigurationTimeout>0</r:DHCPv6ConfigurationTimeout>"));
        assert!(!xml.contains("Skip"));
    }

    #[test]
    fn test_exec_method() {
        let uri = resource_uri("CIM_PowerManagementService");
        let xml = exec_method(
            &uri,
            "RequestPowerStateChange",
            &json!({"PowerState": 2, "Tags": ["a", "b"]}),
            &[("Name", "Intel(r) AMT Power Management Service")],
            9,
        );
        assert!(xml.contains(&format!("<a:Action>{}/RequestPowerStateChange</a:Action>", uri)));
        assert!(xml.contains("<r:RequestPowerStateChange_INPUT"));
        assert!(xml.contains("<r:PowerState>2</r:PowerState>"));
        assert!(xml.contains("<r:Tags>a</r:Tags><r:Tags>b</r:Tags>"));
    }

    #[test]
    fn test_pull_and_subscribe() {
        let xml = pull("uri", "ctx-1", 2);
        assert!(xml.contains("<EnumerationContext>ctx-1</EnumerationContext>"));
        assert!(xml.contains("<MaxElements>999</MaxElements>"));

        let xml = subscribe("uri", DeliveryMode::PushWithAck, Some("http://10.0.0.1:16997/"), &[], 4);
        assert!(xml.contains("Mode=\"http://schemas.dmtf.org/wbem/wsman/1/wsman/PushWithAck\""));
        assert!(xml.contains("<a:Address>http://10.0.0.1:16997/</a:Address>"));
    }

    #[test]
    fn test_identify() {
        let xml = identify();
        assert!(xml.contains("<wsmid:Identify/>"));
        assert!(!xml.contains("a:Action"));
    }
}
