//! Connection profile model
//!
//! A profile is the generic description of one proxy endpoint. Protocol
//! specific options are optional fields that only some config types read.
//! Latency results live in [`AffiliationInfo`], stored apart from the body.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::profile::DEFAULT_PORT;

/// Protocol variant of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigType {
    /// Raw config text stored under the same GUID replaces the structured fields
    Custom,
    Hysteria2,
}

impl ConfigType {
    /// Stable numeric code
    pub fn code(self) -> i32 {
        match self {
            ConfigType::Custom => 2,
            ConfigType::Hysteria2 => 9,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            2 => Some(ConfigType::Custom),
            9 => Some(ConfigType::Hysteria2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigType::Custom => "CUSTOM",
            ConfigType::Hysteria2 => "HYSTERIA2",
        }
    }
}

/// Validation failures reported before a profile is saved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("remarks must not be empty")]
    MissingRemarks,
    #[error("server address must not be empty")]
    MissingServer,
    #[error("server port must be greater than zero")]
    InvalidPort,
    #[error("auth secret must not be empty")]
    MissingAuth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub config_type: ConfigType,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
    /// Auth secret
    #[serde(default)]
    pub password: String,
    /// Empty string marks a standalone profile
    #[serde(default)]
    pub subscription_id: String,

    // Hysteria2 options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_hopping: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_hopping_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_down: Option<String>,

    // TLS options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(rename = "pinSHA256", default, skip_serializing_if = "Option::is_none")]
    pub pin_sha256: Option<String>,
    #[serde(rename = "fingerPrint", default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// True when an optional text field carries a usable value
fn is_set(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.is_empty())
}

impl Profile {
    /// Create an empty profile of the given type with the default port
    pub fn new(config_type: ConfigType) -> Self {
        Self {
            config_type,
            remarks: String::new(),
            server: String::new(),
            server_port: DEFAULT_PORT,
            password: String::new(),
            subscription_id: String::new(),
            obfs_password: None,
            port_hopping: None,
            port_hopping_interval: None,
            bandwidth_up: None,
            bandwidth_down: None,
            sni: None,
            insecure: None,
            pin_sha256: None,
            fingerprint: None,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.config_type == ConfigType::Custom
    }

    /// Check the mandatory fields a worker needs to build a native config
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.remarks.trim().is_empty() {
            return Err(ProfileError::MissingRemarks);
        }
        // Custom profiles carry everything in their raw config
        if self.is_custom() {
            return Ok(());
        }
        if self.server.trim().is_empty() {
            return Err(ProfileError::MissingServer);
        }
        if self.server_port == 0 && !is_set(&self.port_hopping) {
            return Err(ProfileError::InvalidPort);
        }
        if self.password.trim().is_empty() {
            return Err(ProfileError::MissingAuth);
        }
        Ok(())
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn server_address_and_port(&self) -> String {
        format!("{}:{}", bracket_ipv6(&self.server), self.server_port)
    }

    /// Address for list display with the tail hidden
    ///
    /// `10.0.0.1` becomes `10.0.0.***`, `2001:db8::1` becomes `2001:db8:***`.
    pub fn masked_address(&self) -> String {
        let host = &self.server;
        let masked = if host.contains(':') {
            let head: Vec<&str> = host.split(':').take(2).collect();
            format!("{}:***", head.join(":"))
        } else if host.contains('.') {
            let mut parts: Vec<&str> = host.split('.').collect();
            parts.pop();
            format!("{}.***", parts.join("."))
        } else {
            host.clone()
        };
        format!("{} : {}", masked, self.server_port)
    }
}

/// Wrap a bare IPv6 literal in brackets so a port can follow it
pub fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// Supplementary per-profile metadata kept outside the profile body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffiliationInfo {
    /// Latest measured latency; negative means the probe failed
    #[serde(default)]
    pub test_delay_millis: i64,
}

impl AffiliationInfo {
    pub fn is_failure(&self) -> bool {
        self.test_delay_millis < 0
    }

    /// Latency text for list display, empty when never measured
    pub fn delay_label(&self) -> String {
        if self.test_delay_millis == 0 {
            String::new()
        } else {
            format!("{}ms", self.test_delay_millis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hy2(remarks: &str) -> Profile {
        let mut p = Profile::new(ConfigType::Hysteria2);
        p.remarks = remarks.to_string();
        p.server = "example.com".to_string();
        p.password = "secret".to_string();
        p
    }

    #[test]
    fn test_config_type_codes() {
        assert_eq!(ConfigType::from_code(ConfigType::Custom.code()), Some(ConfigType::Custom));
        assert_eq!(ConfigType::from_code(9), Some(ConfigType::Hysteria2));
        assert_eq!(ConfigType::from_code(1), None);
    }

    #[test]
    fn test_validate_requires_mandatory_fields() {
        assert_eq!(hy2("tokyo").validate(), Ok(()));

        let mut p = hy2("");
        assert_eq!(p.validate(), Err(ProfileError::MissingRemarks));

        p = hy2("tokyo");
        p.server = "  ".to_string();
        assert_eq!(p.validate(), Err(ProfileError::MissingServer));

        p = hy2("tokyo");
        p.password.clear();
        assert_eq!(p.validate(), Err(ProfileError::MissingAuth));
    }

    #[test]
    fn test_validate_port_zero_allowed_with_hopping() {
        let mut p = hy2("tokyo");
        p.server_port = 0;
        assert_eq!(p.validate(), Err(ProfileError::InvalidPort));

        p.port_hopping = Some("1000-2000".to_string());
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn test_custom_only_needs_remarks() {
        let mut p = Profile::new(ConfigType::Custom);
        p.remarks = "imported".to_string();
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn test_masked_address() {
        let mut p = hy2("x");
        p.server = "10.0.0.1".to_string();
        p.server_port = 8443;
        assert_eq!(p.masked_address(), "10.0.0.*** : 8443");

        p.server = "2001:db8::1".to_string();
        assert_eq!(p.masked_address(), "2001:db8:*** : 8443");

        p.server = "localhost".to_string();
        assert_eq!(p.masked_address(), "localhost : 8443");
    }

    #[test]
    fn test_server_address_brackets_ipv6() {
        let mut p = hy2("x");
        p.server = "::1".to_string();
        p.server_port = 443;
        assert_eq!(p.server_address_and_port(), "[::1]:443");

        p.server = "example.com".to_string();
        assert_eq!(p.server_address_and_port(), "example.com:443");
    }

    #[test]
    fn test_json_uses_camel_case_and_omits_unset_options() {
        let mut p = hy2("tokyo");
        p.pin_sha256 = Some("ab:cd".to_string());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["configType"], "HYSTERIA2");
        assert_eq!(json["serverPort"], 443);
        assert_eq!(json["pinSHA256"], "ab:cd");
        assert!(json.get("obfsPassword").is_none());
    }

    #[test]
    fn test_delay_label() {
        assert_eq!(AffiliationInfo::default().delay_label(), "");
        let aff = AffiliationInfo { test_delay_millis: 250 };
        assert_eq!(aff.delay_label(), "250ms");
        assert!(!aff.is_failure());
        assert!(AffiliationInfo { test_delay_millis: -1 }.is_failure());
    }
}
