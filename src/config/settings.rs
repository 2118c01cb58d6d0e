//! Typed runtime settings backed by the store's settings namespace
//!
//! Values are stored as strings (as entered by the user); parsing happens on
//! read and an unparsable value falls back to the default with a warning.

use serde_json::Value;
use std::net::IpAddr;
use tracing::warn;

use crate::constants::settings::*;
use crate::profile::ConfigType;
use crate::store::ProfileStore;

/// Borrowed view answering typed questions about the settings namespace
pub struct RuntimeSettings<'a> {
    store: &'a ProfileStore,
}

impl<'a> RuntimeSettings<'a> {
    pub fn new(store: &'a ProfileStore) -> Self {
        Self { store }
    }

    /// Local SOCKS listener port
    pub fn socks_port(&self) -> u16 {
        self.parsed(PREF_SOCKS_PORT, DEFAULT_SOCKS_PORT)
    }

    /// Local HTTP listener port (shares the SOCKS port)
    pub fn http_port(&self) -> u16 {
        self.socks_port()
    }

    /// DNS servers for the tunnel; entries that aren't IP literals are dropped
    pub fn vpn_dns_servers(&self) -> Vec<String> {
        let raw = self.store.setting_string(PREF_VPN_DNS, DEFAULT_VPN_DNS);
        raw.split(',')
            .map(str::trim)
            .filter(|s| s.parse::<IpAddr>().is_ok())
            .map(str::to_string)
            .collect()
    }

    pub fn delay_test_url(&self, second: bool) -> String {
        if second {
            DELAY_TEST_URL2.to_string()
        } else {
            self.store.setting_string(PREF_DELAY_TEST_URL, DELAY_TEST_URL)
        }
    }

    pub fn vpn_mtu(&self) -> u32 {
        self.parsed(PREF_VPN_MTU, DEFAULT_VPN_MTU)
    }

    /// Whether routing should keep LAN traffic off the tunnel
    ///
    /// "1" forces it on, "2" forces it off. Any other value defers to the
    /// selected custom config: it bypasses LAN only if it routes
    /// `geosite:private` or `geoip:private` to the direct outbound.
    pub fn routing_bypass_lan(&self) -> bool {
        let mode = self
            .store
            .setting(PREF_VPN_BYPASS_LAN)
            .unwrap_or_else(|| BYPASS_LAN_ALWAYS.to_string());
        match mode.as_str() {
            BYPASS_LAN_ALWAYS => return true,
            BYPASS_LAN_NEVER => return false,
            _ => {}
        }

        let Some(guid) = self.store.selected() else {
            return false;
        };
        let Some(profile) = self.store.profile(&guid) else {
            return false;
        };
        if profile.config_type != ConfigType::Custom {
            return false;
        }
        let Some(raw) = self.store.raw(&guid) else {
            return false;
        };
        custom_config_bypasses_lan(&raw)
    }

    fn parsed<T: std::str::FromStr + Copy + std::fmt::Display>(&self, key: &str, default: T) -> T {
        match self.store.setting(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key = %key, value = %raw, default = %default, "Invalid setting value, using default");
                default
            }),
            None => default,
        }
    }
}

/// Scan a custom config's routing rules for a private-range direct rule
fn custom_config_bypasses_lan(raw: &str) -> bool {
    let config: Value = match serde_json::from_str(raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Custom config is not valid JSON");
            return false;
        }
    };

    let Some(rules) = config.pointer("/routing/rules").and_then(Value::as_array) else {
        return false;
    };

    let lists = |rule: &Value, field: &str, marker: &str| {
        rule.get(field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|item| item.as_str() == Some(marker)))
    };

    rules
        .iter()
        .filter(|rule| rule.get("outboundTag").and_then(Value::as_str) == Some(TAG_DIRECT))
        .any(|rule| lists(rule, "domain", GEOSITE_PRIVATE) || lists(rule, "ip", GEOIP_PRIVATE))
}
