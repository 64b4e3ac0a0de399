//! Per-source request throttling.
//!
//! A [`RateGovernor`] spaces request grants for one source by a minimum
//! interval and can additionally cap the number of requests in flight. Callers
//! from any number of tasks queue on the governor's internal lock and are
//! granted in arrival order.

use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct RateGovernor {
    name: String,
    min_interval: Duration,
    last_grant: Mutex<Option<Instant>>,
    in_flight: Option<Arc<Semaphore>>,
}

/// Right to issue one request. Dropping it frees the in-flight slot, if any.
#[derive(Debug)]
pub struct RateGrant {
    _permit: Option<OwnedSemaphorePermit>,
}

impl RateGovernor {
    pub fn new(name: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            name: name.into(),
            min_interval,
            last_grant: Mutex::new(None),
            in_flight: None,
        }
    }

    /// Also cap concurrent in-flight requests. Zero is treated as one.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.in_flight = Some(Arc::new(Semaphore::new(max_in_flight.max(1))));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may be issued.
    ///
    /// The interval lock is held only while waiting out the interval and
    /// recording the grant, so the request itself runs unlocked.
    pub async fn acquire(&self) -> RateGrant {
        let permit = match &self.in_flight {
            Some(slots) => slots.clone().acquire_owned().await.ok(),
            None => None,
        };

        let mut last_grant = self.last_grant.lock().await;
        if let Some(previous) = *last_grant {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                debug!(
                    "{}: throttling for {:?}",
                    self.name,
                    ready_at.saturating_duration_since(Instant::now())
                );
                sleep_until(ready_at).await;
            }
        }
        *last_grant = Some(Instant::now());

        RateGrant { _permit: permit }
    }
}
