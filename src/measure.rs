//! TCP latency probes
//!
//! Probes run on a small tokio runtime owned by a [`MeasureScope`]. Whoever
//! starts probes owns the scope and cancels it on teardown.

use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::constants::measure::*;
use crate::profile::Profile;

/// Time a TCP connect to `host:port`, in milliseconds
pub async fn tcping(host: &str, port: u16, timeout: Duration) -> Result<i64> {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(anyhow!("no server address"));
    }
    if port == 0 {
        return Err(anyhow!("no server port"));
    }

    let started = Instant::now();
    tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| anyhow!("timed out after {}ms", timeout.as_millis()))?
        .with_context(|| format!("connect to {host}:{port} failed"))?;

    let millis = started.elapsed().as_millis();
    Ok(i64::try_from(millis).unwrap_or(i64::MAX))
}

/// Probe a profile's server with the default timeout
pub async fn probe_profile(profile: &Profile) -> Result<i64> {
    tcping(
        &profile.server,
        profile.server_port,
        Duration::from_millis(TCP_PROBE_TIMEOUT_MS),
    )
    .await
}

/// Latency to record for a probe outcome; failures become the negative sentinel
pub fn delay_or_failed(result: &Result<i64>) -> i64 {
    match result {
        Ok(millis) => *millis,
        Err(_) => FAILED_DELAY_MS,
    }
}

/// Owner of in-flight probe tasks
pub struct MeasureScope {
    runtime: Runtime,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MeasureScope {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_THREADS)
            .thread_name("measure")
            .enable_all()
            .build()
            .context("Failed to build measurement runtime")?;
        Ok(Self {
            runtime,
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a tracked task
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.spawn(task);
        let mut tasks = self.tasks();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Start a task that [`cancel_all`](Self::cancel_all) leaves alone
    pub fn spawn_detached<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.runtime.spawn(task));
    }

    /// Number of tasks not yet finished
    pub fn in_flight(&self) -> usize {
        self.tasks().iter().filter(|t| !t.is_finished()).count()
    }

    /// Abort every unfinished task; returns how many were aborted
    pub fn cancel_all(&self) -> usize {
        let cancelled = self
            .tasks()
            .drain(..)
            .filter(|t| !t.is_finished())
            .inspect(|t| t.abort())
            .count();
        if cancelled > 0 {
            info!(cancelled, "Cancelled in-flight measurements");
        } else {
            debug!("No measurements to cancel");
        }
        cancelled
    }

    /// Run a probe to completion on the scope's runtime from a blocking context
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Drop for MeasureScope {
    fn drop(&mut self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;

    #[test]
    fn test_tcping_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let scope = MeasureScope::new().unwrap();

        let millis = scope
            .block_on(tcping("127.0.0.1", port, Duration::from_secs(3)))
            .unwrap();
        assert!(millis >= 0);
    }

    #[test]
    fn test_tcping_closed_port_fails() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let scope = MeasureScope::new().unwrap();

        let result = scope.block_on(tcping("127.0.0.1", port, Duration::from_secs(3)));
        assert!(result.is_err());
        assert_eq!(delay_or_failed(&result), -1);
    }

    #[test]
    fn test_tcping_rejects_missing_address() {
        let scope = MeasureScope::new().unwrap();
        assert!(scope.block_on(tcping("  ", 443, Duration::from_secs(1))).is_err());
        assert!(scope.block_on(tcping("127.0.0.1", 0, Duration::from_secs(1))).is_err());
    }

    #[test]
    fn test_cancel_all_aborts_pending_tasks() {
        let scope = MeasureScope::new().unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        for _ in 0..3 {
            let tx = tx.clone();
            scope.spawn(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                let _ = tx.send(());
            });
        }
        drop(tx);

        assert_eq!(scope.in_flight(), 3);
        assert_eq!(scope.cancel_all(), 3);
        assert_eq!(scope.in_flight(), 0);
        // Every sender was dropped with its aborted task
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }
}
