//! Supervisor (spec §4.9 "Supervisor (C9)").
//!
//! Composes a node's independent background tasks with first-completed
//! semantics: the first task to finish (cleanly or with an error) ends the
//! whole round; the rest are cancelled, logged, and the full set is rebuilt
//! and restarted after `TIME_OUT` — unless the supervisor's own
//! [`CancellationToken`] has fired, which ends everything for good.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::TIME_OUT_SECS;
use crate::error::AuderaResult;

/// The three readiness events cancellation propagates through (spec §4.9:
/// "`mdns_ready`, `sync_ready`, `buffer_ready` (all cleared on shutdown)").
#[derive(Clone)]
pub struct ReadinessEvents {
    pub mdns_ready: tokio::sync::watch::Sender<bool>,
    pub sync_ready: tokio::sync::watch::Sender<bool>,
    pub buffer_ready: tokio::sync::watch::Sender<bool>,
}

impl Default for ReadinessEvents {
    fn default() -> Self {
        Self {
            mdns_ready: tokio::sync::watch::channel(false).0,
            sync_ready: tokio::sync::watch::channel(false).0,
            buffer_ready: tokio::sync::watch::channel(false).0,
        }
    }
}

impl ReadinessEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every readiness flag (spec §4.9: orderly shutdown clears all
    /// three events).
    pub fn clear_all(&self) {
        let _ = self.mdns_ready.send(false);
        let _ = self.sync_ready.send(false);
        let _ = self.buffer_ready.send(false);
    }
}

/// Runs `build_tasks` — a closure producing a fresh set of spawned tasks —
/// restarting the whole set after `TIME_OUT` whenever any one task in the
/// current round completes or fails (spec §4.9).
///
/// `build_tasks` is called again on every restart so each round gets fresh
/// `JoinHandle`s (a `JoinHandle` cannot be reused once awaited or aborted).
pub async fn run_supervised<B>(mut build_tasks: B, events: ReadinessEvents, cancel: CancellationToken)
where
    B: FnMut() -> Vec<JoinHandle<AuderaResult<()>>>,
{
    loop {
        if cancel.is_cancelled() {
            events.clear_all();
            return;
        }

        let tasks = build_tasks();
        if tasks.is_empty() {
            events.clear_all();
            return;
        }

        let (result, index, remaining) = futures::future::select_all(tasks).await;
        for handle in remaining {
            handle.abort();
        }

        match result {
            Ok(Ok(())) => log::info!("[Supervisor] Task {index} completed cleanly."),
            Ok(Err(e)) => log::error!("[Supervisor] Task {index} failed: {e}"),
            Err(e) if e.is_cancelled() => log::info!("[Supervisor] Task {index} was cancelled."),
            Err(e) => log::error!("[Supervisor] Task {index} panicked: {e}"),
        }

        if cancel.is_cancelled() {
            events.clear_all();
            return;
        }

        log::info!("[Supervisor] Restarting the task set in {TIME_OUT_SECS}s.");
        tokio::select! {
            _ = cancel.cancelled() => { events.clear_all(); return; }
            () = tokio::time::sleep(Duration::from_secs(TIME_OUT_SECS)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn restarts_after_time_out_when_a_task_completes() {
        let events = ReadinessEvents::new();
        let cancel = CancellationToken::new();
        let builds = Arc::new(AtomicUsize::new(0));

        let builds_clone = Arc::clone(&builds);
        let cancel_clone = cancel.clone();
        let supervisor = tokio::spawn(async move {
            run_supervised(
                move || {
                    let n = builds_clone.fetch_add(1, Ordering::SeqCst);
                    vec![tokio::spawn(async move {
                        if n == 0 {
                            Ok(())
                        } else {
                            // Second round: block until cancelled so the test
                            // can assert a restart happened, then end cleanly.
                            Ok(())
                        }
                    })]
                },
                events,
                cancel_clone,
            )
            .await;
        });

        // First round's task completes immediately; supervisor sleeps
        // TIME_OUT before rebuilding.
        tokio::time::advance(Duration::from_secs(TIME_OUT_SECS + 1)).await;
        tokio::time::advance(Duration::from_millis(10)).await;

        cancel.cancel();
        let _ = supervisor.await;

        assert!(builds.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn clear_all_resets_every_event_to_false() {
        let events = ReadinessEvents::new();
        events.mdns_ready.send(true).unwrap();
        events.sync_ready.send(true).unwrap();
        events.buffer_ready.send(true).unwrap();

        events.clear_all();

        assert!(!*events.mdns_ready.borrow());
        assert!(!*events.sync_ready.borrow());
        assert!(!*events.buffer_ready.borrow());
    }

    #[tokio::test]
    async fn empty_task_set_ends_supervisor() {
        let events = ReadinessEvents::new();
        let cancel = CancellationToken::new();
        run_supervised(Vec::new, events, cancel).await;
    }
}
