//! # Keepalive
//!
//! Each session pings its peer every `ping_interval`. A pong refreshes the
//! watchdog; if the watchdog goes stale for longer than the pong deadline the
//! session is failed with `SessionError::LinkFailure`.
//!
//! Only pongs count as liveness. Ordinary traffic does not refresh the watchdog.

use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use remrpc::Message;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::config::MIN_PING_INTERVAL;
use crate::dispatcher::Dispatcher;
use crate::session::SessionError;

/// Tracks when the last pong arrived.
pub(crate) struct Watchdog {
    started: Instant,
    // Milliseconds since `started`.
    last_pong: AtomicU64,
    pongs: watch::Sender<u64>,
}

impl Watchdog {
    pub fn new() -> Self {
        let (pongs, _) = watch::channel(0);
        Self { started: Instant::now(), last_pong: AtomicU64::new(0), pongs }
    }

    pub fn pong(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_pong.fetch_max(now, Ordering::AcqRel);
        self.pongs.send_modify(|n| *n += 1);
    }

    /// Time since the last pong, or since the session started.
    pub fn silence(&self) -> Duration {
        let last = Duration::from_millis(self.last_pong.load(Ordering::Acquire));
        self.started.elapsed().saturating_sub(last)
    }

    /// Observes pong arrivals. Used by explicit pings.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.pongs.subscribe()
    }
}

/// Spawns the ping loop for one session.
///
/// The task holds only a weak reference, so it never keeps a dropped
/// dispatcher alive. It stops on shutdown or once the dispatcher is gone.
pub(crate) fn spawn(
    dispatcher: Weak<Dispatcher>,
    interval: Duration,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = interval.max(MIN_PING_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|closed| *closed) => break,
                _ = ticker.tick() => {}
            }

            let Some(dispatcher) = dispatcher.upgrade() else { break };
            let silence = dispatcher.watchdog().silence();
            if silence > deadline {
                tracing::warn!(
                    session = %dispatcher.session(),
                    silence_ms = silence.as_millis() as u64,
                    "no pong within deadline"
                );
                dispatcher.terminate(SessionError::LinkFailure).await;
                break;
            }

            if let Err(e) = dispatcher.send(&Message::Ping).await {
                tracing::debug!(session = %dispatcher.session(), error = %e, "ping not sent");
            }
        }
    });
}
