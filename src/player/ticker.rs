//! Per-channel progress tick scheduling

use std::time::Duration;

use tokio::task::JoinHandle;

use super::{Channel, EngineEvent, EngineEvents};

/// Default progress tick period
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Spawns periodic tick tasks that post [`EngineEvent::Tick`] into the session
#[derive(Debug)]
pub struct Ticker {
    events: Option<EngineEvents>,
    period: Duration,
    next_seq: u64,
}

impl Ticker {
    /// Ticker posting to `events` every `period`
    #[must_use]
    pub const fn new(events: EngineEvents, period: Duration) -> Self {
        Self {
            events: Some(events),
            period,
            next_seq: 0,
        }
    }

    /// Ticker that hands out handles but never spawns; ticks are driven by hand
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            events: None,
            period: TICK_PERIOD,
            next_seq: 0,
        }
    }

    /// Start ticking `channel`
    ///
    /// Outside a tokio runtime no task is spawned and the handle is inert.
    pub fn start(&mut self, channel: Channel) -> TickHandle {
        self.next_seq += 1;
        let seq = self.next_seq;

        let task = match (&self.events, tokio::runtime::Handle::try_current()) {
            (Some(events), Ok(runtime)) => {
                let events = events.clone();
                let period = self.period;
                Some(runtime.spawn(async move {
                    let mut interval =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    loop {
                        interval.tick().await;
                        if events.send(EngineEvent::Tick { channel, seq }).is_err() {
                            break;
                        }
                    }
                }))
            }
            _ => None,
        };

        tracing::trace!(%channel, seq, spawned = task.is_some(), "tick started");
        TickHandle { seq, task }
    }
}

/// Owned handle to a running tick task; dropping it cancels the task
#[derive(Debug)]
pub struct TickHandle {
    seq: u64,
    task: Option<JoinHandle<()>>,
}

impl TickHandle {
    /// Sequence number stamped on ticks from this handle
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
