//! Hysteria2 client config

use serde::{Deserialize, Serialize};

use crate::constants::translate::*;
use crate::profile::{bracket_ipv6, Profile};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hysteria2Config {
    pub server: String,
    pub auth: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs: Option<Obfs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<Bandwidth>,
    pub socks5: Listener,
    pub http: Listener,
    pub tls: Tls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obfs {
    #[serde(rename = "type")]
    pub kind: String,
    pub salamander: Salamander,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salamander {
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    #[serde(rename = "type")]
    pub kind: String,
    pub udp: TransportUdp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportUdp {
    pub hop_interval: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bandwidth {
    pub up: String,
    pub down: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub listen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    pub sni: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(rename = "pinSHA256", skip_serializing_if = "Option::is_none")]
    pub pin_sha256: Option<String>,
}

/// Build the Hysteria2 client config for `profile`
///
/// Both local listeners (SOCKS5 and HTTP) bind loopback on `local_proxy_port`.
pub fn to_native(profile: &Profile, local_proxy_port: u16) -> Hysteria2Config {
    let obfs = profile
        .obfs_password
        .as_ref()
        .filter(|p| !p.is_empty())
        .map(|password| Obfs {
            kind: OBFS_SALAMANDER.to_string(),
            salamander: Salamander {
                password: password.clone(),
            },
        });

    let hopping = profile.port_hopping.as_deref().filter(|r| !r.is_empty());

    let transport = hopping.map(|_| {
        let interval = profile
            .port_hopping_interval
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_HOP_INTERVAL);
        Transport {
            kind: TRANSPORT_UDP.to_string(),
            udp: TransportUdp {
                hop_interval: format!("{interval}{HOP_INTERVAL_UNIT}"),
            },
        }
    });

    let bandwidth = match (&profile.bandwidth_up, &profile.bandwidth_down) {
        (Some(up), Some(down)) if !up.is_empty() && !down.is_empty() => Some(Bandwidth {
            up: up.clone(),
            down: down.clone(),
        }),
        _ => None,
    };

    // With port hopping the runtime picks the port from the range
    let server = match hopping {
        None => profile.server_address_and_port(),
        Some(range) => format!("{}:{}", bracket_ipv6(&profile.server), range),
    };

    let listen = format!("{LOOPBACK}:{local_proxy_port}");

    let sni = profile
        .sni
        .clone()
        .filter(|sni| !sni.is_empty())
        .unwrap_or_else(|| profile.server.clone());

    Hysteria2Config {
        server,
        auth: profile.password.clone(),
        obfs,
        transport,
        bandwidth,
        socks5: Listener {
            listen: listen.clone(),
        },
        http: Listener { listen },
        tls: Tls {
            sni,
            insecure: profile.insecure,
            pin_sha256: profile.pin_sha256.clone().filter(|pin| !pin.is_empty()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ConfigType;

    fn base() -> Profile {
        let mut p = Profile::new(ConfigType::Hysteria2);
        p.remarks = "hy2".to_string();
        p.server = "hy.example.com".to_string();
        p.server_port = 8443;
        p.password = "auth-secret".to_string();
        p
    }

    #[test]
    fn test_minimal_profile() {
        let cfg = to_native(&base(), 10808);
        assert_eq!(cfg.server, "hy.example.com:8443");
        assert_eq!(cfg.auth, "auth-secret");
        assert_eq!(cfg.obfs, None);
        assert_eq!(cfg.transport, None);
        assert_eq!(cfg.bandwidth, None);
        assert_eq!(cfg.socks5.listen, "127.0.0.1:10808");
        assert_eq!(cfg.http.listen, "127.0.0.1:10808");
        assert_eq!(cfg.tls.sni, "hy.example.com");
        assert_eq!(cfg.tls.insecure, None);
        assert_eq!(cfg.tls.pin_sha256, None);
    }

    #[test]
    fn test_port_hopping_default_interval() {
        let mut p = base();
        p.port_hopping = Some("1000-2000".to_string());
        let cfg = to_native(&p, 10808);

        let transport = cfg.transport.unwrap();
        assert_eq!(transport.kind, "udp");
        assert_eq!(transport.udp.hop_interval, "30s");
        assert_eq!(cfg.server, "hy.example.com:1000-2000");
    }

    #[test]
    fn test_port_hopping_explicit_interval_and_ipv6() {
        let mut p = base();
        p.server = "2001:db8::1".to_string();
        p.port_hopping = Some("20000-30000".to_string());
        p.port_hopping_interval = Some("60".to_string());
        let cfg = to_native(&p, 1080);

        assert_eq!(cfg.transport.unwrap().udp.hop_interval, "60s");
        assert_eq!(cfg.server, "[2001:db8::1]:20000-30000");
    }

    #[test]
    fn test_empty_obfs_password_omits_block() {
        let mut p = base();
        p.obfs_password = Some(String::new());
        assert_eq!(to_native(&p, 1080).obfs, None);

        p.obfs_password = Some("pw".to_string());
        let obfs = to_native(&p, 1080).obfs.unwrap();
        assert_eq!(obfs.kind, "salamander");
        assert_eq!(obfs.salamander.password, "pw");
    }

    #[test]
    fn test_bandwidth_needs_both_directions() {
        let mut p = base();
        p.bandwidth_up = Some("10 mbps".to_string());
        p.bandwidth_down = Some(String::new());
        assert_eq!(to_native(&p, 1080).bandwidth, None);

        p.bandwidth_down = Some("50 mbps".to_string());
        assert_eq!(
            to_native(&p, 1080).bandwidth,
            Some(Bandwidth {
                up: "10 mbps".to_string(),
                down: "50 mbps".to_string(),
            })
        );
    }

    #[test]
    fn test_tls_fields() {
        let mut p = base();
        p.sni = Some("cdn.example.org".to_string());
        p.insecure = Some(true);
        p.pin_sha256 = Some("AB:CD".to_string());
        let tls = to_native(&p, 1080).tls;
        assert_eq!(tls.sni, "cdn.example.org");
        assert_eq!(tls.insecure, Some(true));
        assert_eq!(tls.pin_sha256.as_deref(), Some("AB:CD"));

        p.pin_sha256 = Some(String::new());
        assert_eq!(to_native(&p, 1080).tls.pin_sha256, None);
    }

    #[test]
    fn test_json_shape() {
        let mut p = base();
        p.port_hopping = Some("1000-2000".to_string());
        let json = serde_json::to_value(to_native(&p, 10808)).unwrap();
        assert_eq!(json["transport"]["udp"]["hopInterval"], "30s");
        assert!(json.get("obfs").is_none());
        assert!(json.get("bandwidth").is_none());
        assert_eq!(json["socks5"]["listen"], "127.0.0.1:10808");
    }

    #[test]
    fn test_translate_dispatch() {
        assert!(crate::translate::translate(&base(), 1080).is_some());
        let mut custom = base();
        custom.config_type = ConfigType::Custom;
        assert!(crate::translate::translate(&custom, 1080).is_none());
    }
}
