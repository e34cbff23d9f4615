use super::HostWorld;
use crate::core::{CensusError, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{Level, event};

/// Returns `false` when the caller had already given up and the job was skipped.
type HostJob = Box<dyn FnOnce(&dyn HostWorld) -> bool + Send>;

const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates the worker-side handle and the host-side pump of one host boundary.
pub fn host_channel() -> (HostHandle, HostPump) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        HostHandle {
            tx,
            timeout: DEFAULT_HOST_TIMEOUT,
        },
        HostPump { rx },
    )
}

/// Worker side of the host boundary. Cheap to clone.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostJob>,
    timeout: Duration,
}

impl HostHandle {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `job` on the host context and waits for its result.
    ///
    /// A job still queued when the timeout fires is discarded unrun.
    pub async fn call<T, F>(&self, operation: &'static str, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HostWorld) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: HostJob = Box::new(move |world| {
            if reply_tx.is_closed() {
                return false;
            }
            let _ = reply_tx.send(job(world));
            true
        });

        self.tx.send(boxed).map_err(|_| {
            CensusError::HostUnavailable(format!("{operation}: host pump has shut down"))
        })?;

        match timeout(self.timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CensusError::HostUnavailable(format!(
                "{operation}: host dropped the request"
            ))),
            Err(_) => Err(CensusError::HostTimeout {
                operation: operation.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Host side of the boundary. Owned by the host and drained from its step.
pub struct HostPump {
    rx: mpsc::UnboundedReceiver<HostJob>,
}

impl HostPump {
    /// Takes up to `max_jobs` queued jobs and runs those whose caller is still
    /// waiting, returning how many ran. A panicking job is contained; its
    /// caller sees the request dropped.
    pub fn run_pending(&mut self, world: &dyn HostWorld, max_jobs: usize) -> usize {
        let mut ran = 0;
        for _ in 0..max_jobs {
            let Ok(job) = self.rx.try_recv() else {
                break;
            };
            match catch_unwind(AssertUnwindSafe(|| job(world))) {
                Ok(true) => ran += 1,
                Ok(false) => event!(Level::DEBUG, "skipped host job abandoned by its caller"),
                Err(_) => {
                    ran += 1;
                    event!(Level::ERROR, "host job panicked; request dropped");
                }
            }
        }
        ran
    }
}
