//! Application-wide constants
//!
//! Namespace and key names, bus message codes, and setting defaults. Wire and
//! on-disk values here must stay stable across releases.

/// Filesystem locations and environment overrides
pub mod paths {
    /// Directory name under the platform data/cache/runtime dirs
    pub const APP_DIR: &str = "proxy-profiles";

    /// Socket file name inside the runtime directory
    pub const SOCKET_FILE: &str = "bus.sock";

    /// Subdirectory of the data dir holding the worker's generated config
    pub const RUN_DIR: &str = "run";

    /// Native config written by the worker on start
    pub const NATIVE_CONFIG_FILE: &str = "native.json";

    /// Overrides the data directory
    pub const ENV_DATA_DIR: &str = "PROXY_PROFILES_DATA_DIR";

    /// Overrides the bus socket path
    pub const ENV_SOCKET: &str = "PROXY_PROFILES_SOCKET";
}

/// Store namespaces and well-known keys
pub mod store {
    pub const NS_MAIN: &str = "main";
    pub const NS_PROFILE_FULL: &str = "profile-full";
    pub const NS_SERVER_RAW: &str = "server-raw";
    pub const NS_SERVER_AFFILIATION: &str = "server-affiliation";
    pub const NS_SETTINGS: &str = "settings";

    /// File extension for namespace files
    pub const NAMESPACE_EXT: &str = "json";

    /// Suffix appended to a namespace file that failed to parse
    pub const CORRUPT_SUFFIX: &str = "corrupt";

    /// Extension of the advisory lock file next to each namespace file
    pub const LOCK_EXT: &str = "lock";

    pub const KEY_SELECTED_GUID: &str = "selected-guid";
    pub const KEY_GUID_ORDER: &str = "guid-order";
    pub const KEY_CACHE_SUBSCRIPTION_ID: &str = "cache-subscription-id";
    pub const KEY_CACHE_KEYWORD_FILTER: &str = "cache-keyword-filter";
}

/// Settings namespace keys and their defaults
pub mod settings {
    pub const PREF_SOCKS_PORT: &str = "pref_socks_port";
    pub const PREF_VPN_DNS: &str = "pref_vpn_dns";
    pub const PREF_DELAY_TEST_URL: &str = "pref_delay_test_url";
    pub const PREF_VPN_BYPASS_LAN: &str = "pref_vpn_bypass_lan";
    pub const PREF_VPN_MTU: &str = "pref_vpn_mtu";

    pub const DEFAULT_SOCKS_PORT: u16 = 10808;
    pub const DEFAULT_VPN_DNS: &str = "1.1.1.1";
    pub const DEFAULT_VPN_MTU: u32 = 1500;
    pub const DELAY_TEST_URL: &str = "https://www.gstatic.com/generate_204";
    pub const DELAY_TEST_URL2: &str = "https://www.google.com/generate_204";

    /// `pref_vpn_bypass_lan` values
    pub const BYPASS_LAN_ALWAYS: &str = "1";
    pub const BYPASS_LAN_NEVER: &str = "2";

    /// Routing markers looked up in custom configs
    pub const TAG_DIRECT: &str = "direct";
    pub const GEOSITE_PRIVATE: &str = "geosite:private";
    pub const GEOIP_PRIVATE: &str = "geoip:private";
}

/// Notification bus wire constants
pub mod bus {
    /// Action scope for messages addressed to the worker
    pub const ACTION_WORKER: &str = "proxy-profiles.action.worker";

    /// Action scope for messages addressed to controllers
    pub const ACTION_CONTROLLER: &str = "proxy-profiles.action.controller";

    /// Maximum frame size (10 MB) to prevent DoS via memory exhaustion
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

    /// Frames queued per peer before new messages to it are dropped
    pub const PEER_QUEUE_DEPTH: usize = 64;

    /// A peer that accepts no bytes for this long is disconnected
    pub const PEER_WRITE_TIMEOUT_MS: u64 = 5000;

    pub const MSG_REGISTER_CLIENT: i32 = 1;
    pub const MSG_UNREGISTER_CLIENT: i32 = 2;
    pub const MSG_STATE_START: i32 = 3;
    pub const MSG_STATE_START_SUCCESS: i32 = 31;
    pub const MSG_STATE_START_FAILURE: i32 = 32;
    pub const MSG_STATE_STOP: i32 = 4;
    pub const MSG_STATE_STOP_SUCCESS: i32 = 41;
    pub const MSG_STATE_RESTART: i32 = 5;
    pub const MSG_STATE_RUNNING: i32 = 11;
    pub const MSG_STATE_NOT_RUNNING: i32 = 12;
    pub const MSG_MEASURE_DELAY: i32 = 6;
    pub const MSG_MEASURE_DELAY_SUCCESS: i32 = 61;
    pub const MSG_MEASURE_CONFIG: i32 = 7;
    pub const MSG_MEASURE_CONFIG_SUCCESS: i32 = 71;
    pub const MSG_MEASURE_CONFIG_CANCEL: i32 = 72;
}

/// Protocol translation constants
pub mod translate {
    /// Local listeners always bind here
    pub const LOOPBACK: &str = "127.0.0.1";

    /// Obfuscation algorithm identifier
    pub const OBFS_SALAMANDER: &str = "salamander";

    /// Transport type used for port hopping
    pub const TRANSPORT_UDP: &str = "udp";

    /// Hop interval (seconds) when the profile leaves it unset
    pub const DEFAULT_HOP_INTERVAL: &str = "30";

    /// Unit suffix appended to the hop interval
    pub const HOP_INTERVAL_UNIT: &str = "s";
}

/// Profile defaults
pub mod profile {
    /// Port assigned to freshly created profiles
    pub const DEFAULT_PORT: u16 = 443;
}

/// Latency measurement constants
pub mod measure {
    /// Connect timeout for a single TCP probe
    pub const TCP_PROBE_TIMEOUT_MS: u64 = 3000;

    /// Latency recorded when a probe fails
    pub const FAILED_DELAY_MS: i64 = -1;

    /// Worker threads of a measurement runtime
    pub const RUNTIME_THREADS: usize = 2;
}

/// Worker daemon loop constants
pub mod worker {
    /// How often the daemon checks its shutdown flag
    pub const SHUTDOWN_POLL_MS: u64 = 200;
}
