//! Persistent profile store
//!
//! Durable key-value namespaces holding profile bodies, the GUID order list,
//! affiliation metadata, raw custom configs, and scalar settings. The store is
//! an explicit object: open it at startup, [`ProfileStore::close`] it on
//! shutdown.
//!
//! Reads of a missing key return `None`, never an error. Multi-key operations
//! (`remove_profile`, `remove_all`) are sequential and best-effort: there is
//! no transaction spanning namespaces, so a crash midway can leave a profile
//! body behind after its GUID left the order list (or the reverse). Readers
//! skip such tombstones and deletes are safe to retry.

mod namespace;

use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::store::*;
use crate::profile::{AffiliationInfo, Profile};
use namespace::{Entries, Namespace};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode value for namespace {namespace}: {source}")]
    Encode {
        namespace: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("profile not found: {0}")]
    UnknownProfile(String),
}

/// A stored value that could not be turned back into its type
#[derive(Debug, Error)]
#[error("failed to decode {namespace}/{key}: {source}")]
pub struct DecodeError {
    pub namespace: &'static str,
    pub key: String,
    #[source]
    pub source: serde_json::Error,
}

pub struct ProfileStore {
    dir: PathBuf,
    main: Namespace,
    profiles: Namespace,
    raw: Namespace,
    affiliation: Namespace,
    settings: Namespace,
}

fn is_blank(guid: &str) -> bool {
    guid.trim().is_empty()
}

impl ProfileStore {
    /// Open (creating if needed) the store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        info!(path = %dir.display(), "Opened profile store");

        Ok(Self {
            main: Namespace::open(&dir, NS_MAIN),
            profiles: Namespace::open(&dir, NS_PROFILE_FULL),
            raw: Namespace::open(&dir, NS_SERVER_RAW),
            affiliation: Namespace::open(&dir, NS_SERVER_AFFILIATION),
            settings: Namespace::open(&dir, NS_SETTINGS),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sync every namespace file to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        for ns in self.namespaces() {
            ns.flush()?;
        }
        Ok(())
    }

    /// Flush and release the store
    pub fn close(self) -> Result<(), StoreError> {
        self.flush()?;
        info!(path = %self.dir.display(), "Closed profile store");
        Ok(())
    }

    fn namespaces(&self) -> [&Namespace; 5] {
        [&self.main, &self.profiles, &self.raw, &self.affiliation, &self.settings]
    }

    // ----- selection and ordering -----

    pub fn selected(&self) -> Option<String> {
        self.main
            .get_string(KEY_SELECTED_GUID)
            .filter(|guid| !is_blank(guid))
    }

    /// Select `guid`; it must be present in the order list
    pub fn set_selected(&self, guid: &str) -> Result<(), StoreError> {
        self.main.try_update(|entries| {
            if is_blank(guid) || !order_in(entries).iter().any(|g| g == guid) {
                return Err(StoreError::UnknownProfile(guid.to_string()));
            }
            entries.insert(KEY_SELECTED_GUID.to_string(), Value::String(guid.to_string()));
            Ok(())
        })
    }

    /// Ordered GUID list; an unreadable list reads as empty
    pub fn guids(&self) -> Vec<String> {
        match self.main.get(KEY_GUID_ORDER) {
            Some(Value::String(raw)) => decode_order(&raw),
            Some(other) => {
                warn!(value = %other, "GUID order list is not a string, treating as empty");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Replace the whole order list
    pub fn save_guid_order(&self, guids: &[String]) -> Result<(), StoreError> {
        let encoded = encode_order(guids)?;
        self.main.put(KEY_GUID_ORDER, encoded)
    }

    // ----- profile bodies -----

    /// Decode the stored profile, distinguishing absence from corruption
    pub fn decode_profile(&self, guid: &str) -> Result<Option<Profile>, DecodeError> {
        if is_blank(guid) {
            return Ok(None);
        }
        decode_json(&self.profiles, guid)
    }

    /// Stored profile, `None` when absent or unreadable (logged)
    pub fn profile(&self, guid: &str) -> Option<Profile> {
        self.decode_profile(guid)
            .inspect_err(|e| warn!(error = %e, "Ignoring unreadable profile"))
            .ok()
            .flatten()
    }

    /// Write `profile`, generating a GUID when `guid` is absent or blank
    ///
    /// New GUIDs go to the head of the order list and become the selection
    /// when nothing is selected yet. Returns the effective GUID.
    pub fn put_profile(&self, guid: Option<&str>, profile: &Profile) -> Result<String, StoreError> {
        let key = match guid {
            Some(g) if !is_blank(g) => g.to_string(),
            _ => Uuid::new_v4().simple().to_string(),
        };

        let encoded = serde_json::to_string(profile).map_err(|source| StoreError::Encode {
            namespace: NS_PROFILE_FULL,
            source,
        })?;
        self.profiles.put(&key, Value::String(encoded))?;

        let added = self.main.try_update(|entries| {
            let mut order = order_in(entries);
            if order.contains(&key) {
                return Ok(false);
            }
            order.insert(0, key.clone());
            entries.insert(KEY_GUID_ORDER.to_string(), encode_order(&order)?);
            if selected_in(entries).is_none() {
                entries.insert(KEY_SELECTED_GUID.to_string(), Value::String(key.clone()));
            }
            Ok(true)
        })?;
        if added {
            info!(guid = %key, remarks = %profile.remarks, "Added profile");
        } else {
            debug!(guid = %key, "Updated profile");
        }

        Ok(key)
    }

    /// Delete a profile and everything keyed by its GUID
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned. Repeating the call finishes a partial delete.
    pub fn remove_profile(&self, guid: &str) -> Result<(), StoreError> {
        if is_blank(guid) {
            return Ok(());
        }

        let mut first_err = None;
        let mut note = |step: &str, result: Result<(), StoreError>| {
            if let Err(e) = result {
                error!(guid = %guid, step, error = %e, "Profile delete step failed");
                first_err.get_or_insert(e);
            }
        };

        note("selection", self.clear_selection_of(guid));
        note("order", self.remove_from_order(guid));
        note("profile", self.profiles.remove(guid).map(|_| ()));
        note("affiliation", self.affiliation.remove(guid).map(|_| ()));
        note("raw", self.raw.remove(guid).map(|_| ()));

        match first_err {
            Some(e) => Err(e),
            None => {
                info!(guid = %guid, "Removed profile");
                Ok(())
            }
        }
    }

    fn clear_selection_of(&self, guid: &str) -> Result<(), StoreError> {
        self.main.update(|entries| {
            if selected_in(entries) == Some(guid) {
                entries.remove(KEY_SELECTED_GUID);
            }
        })
    }

    fn remove_from_order(&self, guid: &str) -> Result<(), StoreError> {
        self.main.try_update(|entries| {
            let mut order = order_in(entries);
            let before = order.len();
            order.retain(|g| g != guid);
            if order.len() != before {
                entries.insert(KEY_GUID_ORDER.to_string(), encode_order(&order)?);
            }
            Ok(())
        })
    }

    /// Wipe every profile, its affiliation data, the order list and the selection
    ///
    /// Raw configs and the cached filter keys are left alone. Returns how many
    /// profiles existed beforehand.
    pub fn remove_all(&self) -> Result<usize, StoreError> {
        let count = self.profiles.keys().len();
        self.main.update(|entries| {
            entries.remove(KEY_GUID_ORDER);
            entries.remove(KEY_SELECTED_GUID);
        })?;
        self.profiles.clear()?;
        self.affiliation.clear()?;
        info!(count, "Removed all profiles");
        Ok(count)
    }

    // ----- affiliation -----

    pub fn affiliation(&self, guid: &str) -> Option<AffiliationInfo> {
        if is_blank(guid) {
            return None;
        }
        decode_json(&self.affiliation, guid)
            .inspect_err(|e| warn!(error = %e, "Ignoring unreadable affiliation info"))
            .ok()
            .flatten()
    }

    /// Record a latency result without touching the profile body
    pub fn record_latency(&self, guid: &str, millis: i64) -> Result<(), StoreError> {
        if is_blank(guid) {
            return Ok(());
        }
        self.affiliation.try_update(|entries| {
            let mut aff: AffiliationInfo = match entries.get(guid) {
                Some(Value::String(raw)) if !raw.trim().is_empty() => serde_json::from_str(raw)
                    .unwrap_or_else(|e| {
                        warn!(guid = %guid, error = %e, "Replacing unreadable affiliation info");
                        AffiliationInfo::default()
                    }),
                _ => AffiliationInfo::default(),
            };
            aff.test_delay_millis = millis;
            let encoded = serde_json::to_string(&aff).map_err(|source| StoreError::Encode {
                namespace: NS_SERVER_AFFILIATION,
                source,
            })?;
            entries.insert(guid.to_string(), Value::String(encoded));
            Ok(())
        })?;
        debug!(guid = %guid, millis, "Recorded latency");
        Ok(())
    }

    // ----- raw custom configs -----

    pub fn raw(&self, guid: &str) -> Option<String> {
        if is_blank(guid) {
            return None;
        }
        self.raw.get_string(guid)
    }

    pub fn put_raw(&self, guid: &str, config: &str) -> Result<(), StoreError> {
        if is_blank(guid) {
            return Err(StoreError::UnknownProfile(guid.to_string()));
        }
        self.raw.put(guid, Value::String(config.to_string()))
    }

    // ----- cached filter state -----

    pub fn filter_scope(&self) -> String {
        self.main.get_string(KEY_CACHE_SUBSCRIPTION_ID).unwrap_or_default()
    }

    pub fn set_filter_scope(&self, scope: &str) -> Result<(), StoreError> {
        self.main.put(KEY_CACHE_SUBSCRIPTION_ID, Value::String(scope.to_string()))
    }

    pub fn keyword_filter(&self) -> String {
        self.main.get_string(KEY_CACHE_KEYWORD_FILTER).unwrap_or_default()
    }

    pub fn set_keyword_filter(&self, keyword: &str) -> Result<(), StoreError> {
        self.main.put(KEY_CACHE_KEYWORD_FILTER, Value::String(keyword.to_string()))
    }

    // ----- settings -----

    /// String setting, `None` when unset or not a string
    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.get_string(key)
    }

    pub fn setting_string(&self, key: &str, default: &str) -> String {
        self.setting(key).unwrap_or_else(|| default.to_string())
    }

    pub fn setting_i64(&self, key: &str, default: i64) -> i64 {
        match self.settings.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(other) => {
                warn!(key = %key, value = %other, "Setting is not an integer, using default");
                default
            }
            None => default,
        }
    }

    pub fn setting_bool(&self, key: &str, default: bool) -> bool {
        match self.settings.get(key) {
            Some(Value::Bool(b)) => b,
            Some(other) => {
                warn!(key = %key, value = %other, "Setting is not a boolean, using default");
                default
            }
            None => default,
        }
    }

    pub fn setting_string_set(&self, key: &str, default: BTreeSet<String>) -> BTreeSet<String> {
        match self.settings.get(key) {
            Some(value @ Value::Array(_)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Setting is not a string set, using default");
                default
            }),
            Some(other) => {
                warn!(key = %key, value = %other, "Setting is not a string set, using default");
                default
            }
            None => default,
        }
    }

    pub fn put_setting_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.settings.put(key, Value::String(value.to_string()))
    }

    pub fn put_setting_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.settings.put(key, Value::from(value))
    }

    pub fn put_setting_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.settings.put(key, Value::Bool(value))
    }

    pub fn put_setting_string_set(&self, key: &str, value: &BTreeSet<String>) -> Result<(), StoreError> {
        let values = value.iter().cloned().map(Value::String).collect();
        self.settings.put(key, Value::Array(values))
    }
}

fn selected_in(entries: &Entries) -> Option<&str> {
    entries
        .get(KEY_SELECTED_GUID)
        .and_then(Value::as_str)
        .filter(|guid| !is_blank(guid))
}

fn order_in(entries: &Entries) -> Vec<String> {
    entries
        .get(KEY_GUID_ORDER)
        .and_then(Value::as_str)
        .map(decode_order)
        .unwrap_or_default()
}

fn decode_order(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(guids) => guids,
        Err(source) => {
            let err = DecodeError {
                namespace: NS_MAIN,
                key: KEY_GUID_ORDER.to_string(),
                source,
            };
            error!(error = %err, "GUID order list unreadable, treating as empty");
            Vec::new()
        }
    }
}

fn encode_order(guids: &[String]) -> Result<Value, StoreError> {
    serde_json::to_string(guids)
        .map(Value::String)
        .map_err(|source| StoreError::Encode {
            namespace: NS_MAIN,
            source,
        })
}

/// Decode a JSON-encoded string value; blank or missing is `Ok(None)`
fn decode_json<T: serde::de::DeserializeOwned>(
    ns: &Namespace,
    key: &str,
) -> Result<Option<T>, DecodeError> {
    let Some(raw) = ns.get_string(key) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| DecodeError {
            namespace: ns.name(),
            key: key.to_string(),
            source,
        })
}
