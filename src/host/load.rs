use std::sync::Arc;
use tracing::{Level, event};

/// Healthy hosts report 20.0.
pub const FULL_HEALTH: f64 = 20.0;

/// Host performance headroom on a 0-20 scale, read on the host context.
pub trait LoadProbe: Send + Sync {
    fn read_load(&self) -> f64;
}

/// Fallback for hosts without a load metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeHealthy;

impl LoadProbe for AssumeHealthy {
    fn read_load(&self) -> f64 {
        FULL_HEALTH
    }
}

/// Picks the host's probe when it offers one, otherwise [`AssumeHealthy`].
pub fn detect_load_probe(offered: Option<Arc<dyn LoadProbe>>) -> Arc<dyn LoadProbe> {
    match offered {
        Some(probe) => {
            event!(Level::DEBUG, "host load metric detected");
            probe
        }
        None => {
            event!(Level::INFO, "host offers no load metric; assuming healthy");
            Arc::new(AssumeHealthy)
        }
    }
}

impl<F> LoadProbe for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn read_load(&self) -> f64 {
        self()
    }
}
