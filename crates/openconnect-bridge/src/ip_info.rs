//! Addressing the gateway assigned once the tunnel is established.

use serde::{Deserialize, Serialize};

/// Tunnel configuration reported through
/// [`crate::LifecycleEvents::connected`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask6: Option<String>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub nbns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_pac: Option<String>,
    pub mtu: i32,
    #[serde(default)]
    pub split_dns: Vec<String>,
    #[serde(default)]
    pub split_includes: Vec<String>,
    #[serde(default)]
    pub split_excludes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Raw options the gateway sent on the CSTP channel, in order.
    #[serde(default)]
    pub cstp_options: Vec<(String, String)>,
    #[serde(default)]
    pub dtls_options: Vec<(String, String)>,
}

impl IpInfo {
    /// Value of the first CSTP option called `name`.
    pub fn cstp_option(&self, name: &str) -> Option<&str> {
        self.cstp_options
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
