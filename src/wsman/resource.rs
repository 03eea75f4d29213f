//! Resource URI resolution.
//!
//! AMT firmware expects the full schema URI of a class in `ResourceURI`.
//! Callers use short class names; the prefix picks the schema.

/// Intel AMT classes (`AMT_*`).
pub const AMT_SCHEMA: &str = "http://intel.com/wbem/wscim/1/amt-schema/1/";

/// DMTF CIM classes (`CIM_*`).
pub const CIM_SCHEMA: &str = "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/";

/// Intel platform service classes (`IPS_*`).
pub const IPS_SCHEMA: &str = "http://intel.com/wbem/wscim/1/ips-schema/1/";

/// Full resource URI for `class`. Values that already look like URIs are
/// returned unchanged; unknown prefixes fall back to the CIM schema.
pub fn resource_uri(class: &str) -> String {
    if class.contains("://") {
        return class.to_string();
    }
    let schema = match class.split('_').next() {
        Some("AMT") => AMT_SCHEMA,
        Some("IPS") => IPS_SCHEMA,
        _ => CIM_SCHEMA,
    };
    format!("{}{}", schema, class)
}

/// Class name (last path segment) of a resource URI.
pub fn class_name(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_uri() {
        assert_eq!(
            resource_uri("AMT_GeneralSettings"),
            "http://intel.com/wbem/wscim/1/amt-schema/1/AMT_GeneralSettings"
        );
        assert_eq!(
            resource_uri("CIM_ComputerSystem"),
            "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ComputerSystem"
        );
        assert_eq!(
            resource_uri("IPS_OptInService"),
            "http://intel.com/wbem/wscim/1/ips-schema/1/IPS_OptInService"
        );
        assert_eq!(
            resource_uri("http://example.com/custom/Foo"),
            "http://example.com/custom/Foo"
        );
    }

    #[test]
    fn test_class_name() {
        assert_eq!(class_name(&resource_uri("AMT_EthernetPortSettings")), "AMT_EthernetPortSettings");
        assert_eq!(class_name("Plain"), "Plain");
    }
}
