//! Wall clock ticker shown in the dashboard header

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oee_poll::{PollError, PollTask};
use tokio::sync::watch;

/// Publishes the current UTC time on every poll
#[derive(Debug)]
pub struct ClockTicker {
    now: watch::Sender<DateTime<Utc>>,
}

impl ClockTicker {
    /// Ticker starting at the current time
    #[must_use]
    pub fn new() -> Self {
        let (now, _rx) = watch::channel(Utc::now());
        Self { now }
    }

    /// Last published time
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    /// Receive every tick
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DateTime<Utc>> {
        self.now.subscribe()
    }
}

impl Default for ClockTicker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PollTask for ClockTicker {
    async fn poll(&self) -> Result<(), PollError> {
        self.now.send_replace(Utc::now());
        Ok(())
    }
}
