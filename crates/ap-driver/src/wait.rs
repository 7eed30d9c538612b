//! Timeout-bounded, cancellable polling.

use ap_types::ProgressEvent;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Shared flag that stops a wait at its next poll. Cancelling a wait does
/// not cancel anything on the platform.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How long and how often to poll, plus where progress goes.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub cancel: Option<CancelToken>,
    pub progress: Option<Sender<ProgressEvent>>,
}

impl WaitOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_secs(10),
            cancel: None,
            progress: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, tx: Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            if tx.send(event).is_err() {
                debug!("progress receiver dropped");
            }
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Why a wait stopped before its condition held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitInterrupt {
    TimedOut,
    Cancelled,
}

/// Deadline tracker for one polling loop. A timeout past the clock's range
/// leaves the wait unbounded.
pub(crate) struct Waiter<'a> {
    opts: &'a WaitOptions,
    deadline: Option<Instant>,
}

impl<'a> Waiter<'a> {
    pub(crate) fn start(opts: &'a WaitOptions) -> Self {
        Self {
            opts,
            deadline: Instant::now().checked_add(opts.timeout),
        }
    }

    pub(crate) fn options(&self) -> &WaitOptions {
        self.opts
    }

    pub(crate) fn ensure_active(&self) -> Result<(), WaitInterrupt> {
        if self.opts.is_cancelled() {
            return Err(WaitInterrupt::Cancelled);
        }
        Ok(())
    }

    /// Sleep until the next poll, never past the deadline.
    pub(crate) async fn pause(&self) -> Result<(), WaitInterrupt> {
        let interval = match self.deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(WaitInterrupt::TimedOut);
                }
                self.opts.poll_interval.min(deadline - now)
            }
            None => self.opts.poll_interval,
        };
        sleep(interval).await;
        self.ensure_active()
    }
}
