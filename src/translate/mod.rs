//! Profile → protocol-native runtime config
//!
//! Translation is a pure function of the profile and the local proxy port.
//! Malformed or empty optional fields are left out of the output; checking
//! mandatory fields is the caller's job ([`Profile::validate`]).

pub mod hysteria2;

use serde::Serialize;

use crate::profile::{ConfigType, Profile};

pub use hysteria2::Hysteria2Config;

/// Runtime config produced for one profile
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NativeConfig {
    Hysteria2(Hysteria2Config),
}

impl NativeConfig {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Translate a structured profile; `None` for types without a structured form
pub fn translate(profile: &Profile, local_proxy_port: u16) -> Option<NativeConfig> {
    match profile.config_type {
        ConfigType::Hysteria2 => Some(NativeConfig::Hysteria2(hysteria2::to_native(
            profile,
            local_proxy_port,
        ))),
        ConfigType::Custom => None,
    }
}
