//! Service-side worker driven by bus messages
//!
//! The worker owns no UI state. It reads the selected profile and settings
//! from the store, writes the native runtime config for it, probes latency on
//! request, and reports every outcome back on the controller channel.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{AppPaths, RuntimeSettings};
use crate::constants::measure::FAILED_DELAY_MS;
use crate::ipc::{Action, Bus, Message, Subscription};
use crate::measure::{delay_or_failed, probe_profile, MeasureScope};
use crate::store::ProfileStore;
use crate::translate::translate;

pub struct Worker {
    store: Arc<ProfileStore>,
    bus: Arc<dyn Bus>,
    paths: AppPaths,
    running: AtomicBool,
    measure: MeasureScope,
}

impl Worker {
    pub fn new(store: Arc<ProfileStore>, bus: Arc<dyn Bus>, paths: AppPaths) -> Result<Self> {
        Ok(Self {
            store,
            bus,
            paths,
            running: AtomicBool::new(false),
            measure: MeasureScope::new()?,
        })
    }

    /// Subscribe to the worker channel; drop the handle to detach
    pub fn attach(self: &Arc<Self>) -> Subscription {
        let worker = Arc::clone(self);
        self.bus
            .subscribe(Action::Worker, Box::new(move |msg| worker.handle(msg)))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn handle(&self, message: Message) {
        debug!(kind = message.kind(), "Worker received message");
        match message {
            Message::RegisterClient => {
                info!(running = self.is_running(), "Controller registered");
                self.reply(if self.is_running() {
                    Message::StateRunning
                } else {
                    Message::StateNotRunning
                });
            }
            Message::UnregisterClient => info!("Controller unregistered"),
            Message::Start => self.handle_start(),
            Message::Stop => self.handle_stop(),
            Message::Restart => {
                info!("Restarting");
                self.handle_stop();
                self.handle_start();
            }
            Message::MeasureDelay => self.measure_delay(),
            Message::MeasureConfig(guid) => self.measure_config(guid),
            Message::MeasureConfigCancel => {
                self.measure.cancel_all();
            }
            other => warn!(kind = other.kind(), "Ignoring controller-bound message on worker channel"),
        }
    }

    fn reply(&self, message: Message) {
        self.bus.send(message);
    }

    fn handle_start(&self) {
        match self.start() {
            Ok(path) => {
                self.running.store(true, Ordering::SeqCst);
                info!(config = %path.display(), "Started");
                self.reply(Message::StartSuccess);
            }
            Err(e) => {
                error!(error = ?e, "Failed to start");
                self.reply(Message::StartFailure);
            }
        }
    }

    fn handle_stop(&self) {
        if let Err(e) = self.stop() {
            warn!(error = ?e, "Failed to remove native config");
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Stopped");
        self.reply(Message::StopSuccess);
    }

    /// Native config text for the selected profile
    pub fn native_config(&self) -> Result<String> {
        let guid = self.store.selected().context("No profile selected")?;
        let profile = self
            .store
            .decode_profile(&guid)?
            .with_context(|| format!("Selected profile {guid} has no stored body"))?;

        if profile.is_custom() {
            return self
                .store
                .raw(&guid)
                .filter(|raw| !raw.trim().is_empty())
                .with_context(|| format!("Custom profile {guid} has no raw config"));
        }

        profile
            .validate()
            .with_context(|| format!("Selected profile {guid} is incomplete"))?;
        let port = RuntimeSettings::new(&self.store).socks_port();
        let native = translate(&profile, port)
            .with_context(|| format!("No translator for {}", profile.config_type.name()))?;
        native.to_json_pretty().context("Failed to encode native config")
    }

    fn start(&self) -> Result<PathBuf> {
        let config = self.native_config()?;

        let run_dir = self.paths.run_dir();
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create {}", run_dir.display()))?;
        let path = self.paths.native_config_path();
        std::fs::write(&path, config)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn stop(&self) -> Result<()> {
        let path = self.paths.native_config_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    fn measure_delay(&self) {
        let profile = self.store.selected().and_then(|guid| self.store.profile(&guid));
        let Some(profile) = profile else {
            self.reply(Message::MeasureDelaySuccess("Failed: no profile selected".to_string()));
            return;
        };

        let bus = Arc::clone(&self.bus);
        self.measure.spawn_detached(async move {
            let text = match probe_profile(&profile).await {
                Ok(millis) => format!("Success: TCP connection took {millis}ms"),
                Err(e) => format!("Failed: {e:#}"),
            };
            debug!(result = %text, "Measured active profile");
            bus.send(Message::MeasureDelaySuccess(text));
        });
    }

    fn measure_config(&self, guid: String) {
        let Some(profile) = self.store.profile(&guid) else {
            warn!(guid = %guid, "Measure requested for unknown profile");
            self.reply(Message::MeasureConfigSuccess {
                guid,
                millis: FAILED_DELAY_MS,
            });
            return;
        };

        let bus = Arc::clone(&self.bus);
        self.measure.spawn(async move {
            let result = probe_profile(&profile).await;
            if let Err(e) = &result {
                debug!(guid = %guid, error = %e, "Probe failed");
            }
            let millis = delay_or_failed(&result);
            bus.send(Message::MeasureConfigSuccess { guid, millis });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::settings::PREF_SOCKS_PORT;
    use crate::ipc::{Handler, LocalBus};
    use crate::profile::{ConfigType, Profile};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<ProfileStore>,
        bus: Arc<LocalBus>,
        worker: Arc<Worker>,
        paths: AppPaths,
        replies: mpsc::Receiver<Message>,
        _subs: Vec<Subscription>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths {
            data_dir: dir.path().join("data"),
            socket_path: dir.path().join("bus.sock"),
        };
        let store = Arc::new(ProfileStore::open(&paths.data_dir).unwrap());
        let bus = Arc::new(LocalBus::new());
        let worker = Arc::new(Worker::new(store.clone(), bus.clone(), paths.clone()).unwrap());

        let (tx, replies) = mpsc::channel();
        let handler: Handler = Box::new(move |msg| {
            let _ = tx.send(msg);
        });
        let subs = vec![worker.attach(), bus.subscribe(Action::Controller, handler)];

        Fixture {
            _dir: dir,
            store,
            bus,
            worker,
            paths,
            replies,
            _subs: subs,
        }
    }

    impl Fixture {
        fn next(&self) -> Message {
            self.replies.recv_timeout(Duration::from_secs(10)).unwrap()
        }
    }

    fn hy2(server: &str, port: u16) -> Profile {
        let mut p = Profile::new(ConfigType::Hysteria2);
        p.remarks = "tokyo".to_string();
        p.server = server.to_string();
        p.server_port = port;
        p.password = "secret".to_string();
        p
    }

    #[test]
    fn test_register_reports_state() {
        let f = fixture();
        f.bus.send(Message::RegisterClient);
        assert_eq!(f.next(), Message::StateNotRunning);
    }

    #[test]
    fn test_start_without_selection_fails() {
        let f = fixture();
        f.bus.send(Message::Start);
        assert_eq!(f.next(), Message::StartFailure);
        assert!(!f.worker.is_running());
        assert!(!f.paths.native_config_path().exists());
    }

    #[test]
    fn test_start_writes_translated_config() {
        let f = fixture();
        f.store.put_profile(None, &hy2("example.com", 8443)).unwrap();
        f.store.put_setting_string(PREF_SOCKS_PORT, "2080").unwrap();

        f.bus.send(Message::Start);
        assert_eq!(f.next(), Message::StartSuccess);
        assert!(f.worker.is_running());

        let text = std::fs::read_to_string(f.paths.native_config_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["server"], "example.com:8443");
        assert_eq!(json["socks5"]["listen"], "127.0.0.1:2080");
        assert_eq!(json["http"]["listen"], "127.0.0.1:2080");

        f.bus.send(Message::RegisterClient);
        assert_eq!(f.next(), Message::StateRunning);
    }

    #[test]
    fn test_start_custom_uses_raw_config() {
        let f = fixture();
        let mut custom = Profile::new(ConfigType::Custom);
        custom.remarks = "mine".to_string();
        let guid = f.store.put_profile(None, &custom).unwrap();

        f.bus.send(Message::Start);
        assert_eq!(f.next(), Message::StartFailure);

        f.store.put_raw(&guid, r#"{"log":{}}"#).unwrap();
        f.bus.send(Message::Start);
        assert_eq!(f.next(), Message::StartSuccess);
        assert_eq!(
            std::fs::read_to_string(f.paths.native_config_path()).unwrap(),
            r#"{"log":{}}"#
        );
    }

    #[test]
    fn test_start_rejects_incomplete_profile() {
        let f = fixture();
        let mut p = hy2("example.com", 443);
        p.password.clear();
        f.store.put_profile(None, &p).unwrap();

        f.bus.send(Message::Start);
        assert_eq!(f.next(), Message::StartFailure);
    }

    #[test]
    fn test_stop_removes_config() {
        let f = fixture();
        f.store.put_profile(None, &hy2("example.com", 443)).unwrap();
        f.bus.send(Message::Start);
        assert_eq!(f.next(), Message::StartSuccess);

        f.bus.send(Message::Stop);
        assert_eq!(f.next(), Message::StopSuccess);
        assert!(!f.worker.is_running());
        assert!(!f.paths.native_config_path().exists());
    }

    #[test]
    fn test_restart_stops_then_starts() {
        let f = fixture();
        f.store.put_profile(None, &hy2("example.com", 443)).unwrap();

        f.bus.send(Message::Restart);
        assert_eq!(f.next(), Message::StopSuccess);
        assert_eq!(f.next(), Message::StartSuccess);
        assert!(f.worker.is_running());
    }

    #[test]
    fn test_measure_config_reports_latency() {
        let f = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let guid = f.store.put_profile(None, &hy2("127.0.0.1", port)).unwrap();

        f.bus.send(Message::MeasureConfig(guid.clone()));
        match f.next() {
            Message::MeasureConfigSuccess { guid: g, millis } => {
                assert_eq!(g, guid);
                assert!(millis >= 0);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_measure_unknown_profile_reports_failure() {
        let f = fixture();
        f.bus.send(Message::MeasureConfig("ghost".to_string()));
        assert_eq!(
            f.next(),
            Message::MeasureConfigSuccess {
                guid: "ghost".to_string(),
                millis: -1
            }
        );
    }

    #[test]
    fn test_measure_delay_text() {
        let f = fixture();
        f.bus.send(Message::MeasureDelay);
        assert_eq!(
            f.next(),
            Message::MeasureDelaySuccess("Failed: no profile selected".to_string())
        );

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        f.store.put_profile(None, &hy2("127.0.0.1", port)).unwrap();

        f.bus.send(Message::MeasureDelay);
        match f.next() {
            Message::MeasureDelaySuccess(text) => {
                assert!(text.starts_with("Success: TCP connection took "), "{text}");
                assert!(text.ends_with("ms"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
