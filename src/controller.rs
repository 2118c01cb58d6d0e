//! Consumer-side facade over the store, the view cache and the bus
//!
//! A UI (or any other front end) drives profiles through [`Controller`] and
//! learns about changes through [`ViewUpdate`] callbacks. Bus messages from
//! the worker arrive on a dispatch thread; observers are called from there.

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::ipc::{Action, Bus, Message, Subscription};
use crate::measure::{delay_or_failed, probe_profile, MeasureScope};
use crate::profile::Profile;
use crate::store::ProfileStore;
use crate::view::{ViewCache, ViewEntry};

/// Change notification for whoever renders the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    /// The visible list was rebuilt
    Reloaded,
    /// One visible entry (by index) has new data, such as a latency result
    EntryChanged(usize),
    RunningChanged(bool),
    /// Result text for the active profile's latency test
    DelayText(String),
    StartFailed,
}

type Observer = Box<dyn Fn(&ViewUpdate) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State reachable from the bus dispatch thread and measurement tasks
struct Shared {
    store: Arc<ProfileStore>,
    view: Mutex<ViewCache>,
    running: AtomicBool,
    observers: Mutex<Vec<Observer>>,
}

impl Shared {
    fn notify(&self, update: ViewUpdate) {
        debug!(?update, "View update");
        for observer in lock(&self.observers).iter() {
            observer(&update);
        }
    }

    fn reload(&self) {
        lock(&self.view).rebuild(&self.store);
        self.notify(ViewUpdate::Reloaded);
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        self.notify(ViewUpdate::RunningChanged(running));
    }

    /// Persist a latency result and refresh the matching visible entry
    ///
    /// Safe to repeat: the same result twice leaves the same state.
    fn apply_latency(&self, guid: &str, millis: i64) {
        if let Err(e) = self.store.record_latency(guid, millis) {
            warn!(guid = %guid, error = %e, "Failed to record latency");
            return;
        }
        let index = lock(&self.view).refresh_entry(&self.store, guid);
        if let Some(index) = index {
            self.notify(ViewUpdate::EntryChanged(index));
        }
    }

    fn handle(&self, message: Message) {
        match message {
            Message::StateRunning | Message::StartSuccess => self.set_running(true),
            Message::StateNotRunning | Message::StopSuccess => self.set_running(false),
            Message::StartFailure => {
                self.notify(ViewUpdate::StartFailed);
                self.set_running(false);
            }
            Message::MeasureDelaySuccess(text) => self.notify(ViewUpdate::DelayText(text)),
            Message::MeasureConfigSuccess { guid, millis } => self.apply_latency(&guid, millis),
            other => debug!(kind = other.kind(), "Ignoring worker-bound message"),
        }
    }
}

pub struct Controller {
    shared: Arc<Shared>,
    bus: Arc<dyn Bus>,
    subscription: Mutex<Option<Subscription>>,
    measure: MeasureScope,
}

impl Controller {
    /// Build the controller, restoring the persisted filter
    pub fn new(store: Arc<ProfileStore>, bus: Arc<dyn Bus>) -> Result<Self> {
        let mut view = ViewCache::new(store.filter_scope(), store.keyword_filter());
        view.rebuild(&store);
        info!(scope = %view.scope(), keyword = %view.keyword(), visible = view.len(), "Controller ready");

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                view: Mutex::new(view),
                running: AtomicBool::new(false),
                observers: Mutex::new(Vec::new()),
            }),
            bus,
            subscription: Mutex::new(None),
            measure: MeasureScope::new()?,
        })
    }

    /// Register a callback for view and worker state changes
    pub fn on_message<F>(&self, observer: F)
    where
        F: Fn(&ViewUpdate) + Send + Sync + 'static,
    {
        lock(&self.shared.observers).push(Box::new(observer));
    }

    /// Subscribe to the controller channel and ask the worker for its state
    pub fn start_listening(&self) {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            debug!("Already listening");
            return;
        }
        let shared = Arc::clone(&self.shared);
        *subscription = Some(
            self.bus
                .subscribe(Action::Controller, Box::new(move |msg| shared.handle(msg))),
        );
        drop(subscription);
        self.send(Message::RegisterClient);
    }

    /// Apply a worker message as if it came from the bus
    pub fn handle_message(&self, message: Message) {
        self.shared.handle(message);
    }

    pub fn send(&self, message: Message) {
        self.bus.send(message);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &ProfileStore {
        &self.shared.store
    }

    pub fn list_visible_profiles(&self) -> Vec<ViewEntry> {
        lock(&self.shared.view).entries().to_vec()
    }

    pub fn position_of(&self, guid: &str) -> Option<usize> {
        lock(&self.shared.view).position_of(guid)
    }

    /// Validate and save a profile; returns its GUID
    ///
    /// Editing the selected profile while the worker runs restarts it so the
    /// change takes effect.
    pub fn create_or_update_profile(&self, guid: Option<&str>, profile: &Profile) -> Result<String> {
        profile.validate().context("Profile is incomplete")?;
        let guid = self
            .shared
            .store
            .put_profile(guid, profile)
            .context("Failed to save profile")?;
        self.shared.reload();

        if self.is_running() && self.shared.store.selected().as_deref() == Some(guid.as_str()) {
            info!(guid = %guid, "Selected profile edited, restarting");
            self.send(Message::Restart);
        }
        Ok(guid)
    }

    pub fn delete_profile(&self, guid: &str) -> Result<()> {
        if self.is_running() && self.shared.store.selected().as_deref() == Some(guid) {
            bail!("Cannot delete the active profile while running");
        }

        let result = self.shared.store.remove_profile(guid);
        {
            let mut view = lock(&self.shared.view);
            match (&result, view.position_of(guid)) {
                (Ok(()), Some(index)) => {
                    view.remove_at(index);
                }
                (Ok(()), None) => {}
                (Err(_), _) => view.rebuild(&self.shared.store),
            }
        }
        self.shared.notify(ViewUpdate::Reloaded);
        result.with_context(|| format!("Failed to delete profile {guid}"))
    }

    /// Swap two visible rows, keeping hidden rows in place
    pub fn reorder_visible(&self, from: usize, to: usize) -> Result<()> {
        lock(&self.shared.view)
            .swap(&self.shared.store, from, to)
            .context("Failed to save profile order")?;
        self.shared.notify(ViewUpdate::Reloaded);
        Ok(())
    }

    /// Change and persist the filter; the view is rebuilt only if it changed
    pub fn set_filter(&self, scope: &str, keyword: &str) -> Result<()> {
        let store = &self.shared.store;
        store.set_filter_scope(scope).context("Failed to save filter")?;
        store.set_keyword_filter(keyword).context("Failed to save filter")?;

        let changed = lock(&self.shared.view).set_filter(scope, keyword);
        if changed {
            info!(scope = %scope, keyword = %keyword, "Filter changed");
            self.shared.reload();
        }
        Ok(())
    }

    /// Select a profile, restarting the worker when it is running
    pub fn set_selected(&self, guid: &str) -> Result<()> {
        if self.shared.store.selected().as_deref() == Some(guid) {
            return Ok(());
        }
        self.shared
            .store
            .set_selected(guid)
            .with_context(|| format!("Failed to select {guid}"))?;
        self.shared.notify(ViewUpdate::Reloaded);

        if self.is_running() {
            self.send(Message::Restart);
        }
        Ok(())
    }

    /// Delete every visible profile; returns how many were removed
    ///
    /// Without a filter and with the worker stopped this wipes the store.
    /// Otherwise only visible entries go, and the active profile is kept
    /// while the worker runs.
    pub fn remove_all(&self) -> Result<usize> {
        let unfiltered = lock(&self.shared.view).is_unfiltered();
        let store = &self.shared.store;

        let removed = if unfiltered && !self.is_running() {
            store.remove_all().context("Failed to remove profiles")?
        } else {
            let keep = self.is_running().then(|| store.selected()).flatten();
            let targets: Vec<String> = self
                .list_visible_profiles()
                .into_iter()
                .map(|entry| entry.guid)
                .filter(|guid| keep.as_deref() != Some(guid.as_str()))
                .collect();

            let mut first_err = None;
            for guid in &targets {
                if let Err(e) = store.remove_profile(guid) {
                    warn!(guid = %guid, error = %e, "Failed to remove profile");
                    first_err.get_or_insert(e);
                }
            }
            if let Some(e) = first_err {
                self.shared.reload();
                return Err(e).context("Failed to remove some profiles");
            }
            targets.len()
        };

        info!(removed, "Removed profiles");
        self.shared.reload();
        Ok(removed)
    }

    /// Ask the worker to probe the active profile
    pub fn test_current(&self) {
        self.shared.notify(ViewUpdate::DelayText("Testing...".to_string()));
        self.send(Message::MeasureDelay);
    }

    /// Probe every visible profile concurrently, recording each result
    pub fn measure_visible(&self) -> usize {
        let entries = self.list_visible_profiles();
        for ViewEntry { guid, profile } in entries.iter().cloned() {
            let shared = Arc::clone(&self.shared);
            self.measure.spawn(async move {
                let millis = delay_or_failed(&probe_profile(&profile).await);
                shared.apply_latency(&guid, millis);
            });
        }
        info!(count = entries.len(), "Measuring visible profiles");
        entries.len()
    }

    /// Abort this controller's probes and the worker's outstanding ones
    pub fn cancel_measurements(&self) {
        self.measure.cancel_all();
        self.send(Message::MeasureConfigCancel);
    }

    /// Stop listening and cancel own probes; the worker keeps running
    pub fn close(&self) {
        let subscription = lock(&self.subscription).take();
        self.measure.cancel_all();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            self.send(Message::UnregisterClient);
        }
        info!("Controller closed");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if lock(&self.subscription).is_some() {
            self.close();
        }
    }
}
