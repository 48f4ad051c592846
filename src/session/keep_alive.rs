use crate::frame::FrameEngine;
use crate::session::send::SendOperation;
use crate::session::{lock, Shared};
use async_io::Timer;
use futures::executor::block_on;
use futures::{AsyncRead, AsyncWrite};
use std::io;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Activity {
    last_send: Instant,
    last_receive: Instant,
    next_due: Instant,
}

/// Decides when an idle session needs a ping.
pub(crate) struct KeepAliveTracker {
    interval: Duration,
    activity: Mutex<Activity>,
}

impl KeepAliveTracker {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            activity: Mutex::new(Activity {
                last_send: now,
                last_receive: now,
                next_due: now + interval,
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    pub fn on_send(&self) {
        lock(&self.activity).last_send = Instant::now();
    }

    pub fn on_receive(&self) {
        lock(&self.activity).last_receive = Instant::now();
    }

    /// True once neither direction saw traffic for a full interval. Otherwise moves the due
    /// time to one interval after the latest activity.
    pub fn should_send_ping(&self) -> bool {
        if !self.enabled() {
            return false;
        }
        let now = Instant::now();
        let mut activity = lock(&self.activity);
        let last = activity.last_send.max(activity.last_receive);
        let idle = now.saturating_duration_since(last);
        if idle >= self.interval {
            true
        } else {
            activity.next_due = last + self.interval;
            false
        }
    }

    /// Pushes the due time a full interval out from now.
    pub fn reschedule(&self) {
        lock(&self.activity).next_due = Instant::now() + self.interval;
    }

    pub fn next_due(&self) -> Instant {
        lock(&self.activity).next_due
    }
}

pub(crate) fn spawn<T, E>(shared: &Arc<Shared<T, E>>, stop: CancellationToken) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    let weak = Arc::downgrade(shared);
    thread::Builder::new()
        .name("ws-keep-alive".into())
        .spawn(move || block_on(drive(weak, stop)))?;
    Ok(())
}

async fn drive<T, E>(weak: Weak<Shared<T, E>>, stop: CancellationToken)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    loop {
        let due = match weak.upgrade() {
            Some(shared) => shared.keep_alive.next_due(),
            None => return,
        };
        let stopped = async {
            stop.cancelled().await;
            true
        };
        let elapsed = async {
            Timer::at(due).await;
            false
        };
        if futures_lite::future::or(stopped, elapsed).await {
            return;
        }
        let shared = match weak.upgrade() {
            Some(shared) => shared,
            None => return,
        };
        if shared.keep_alive.should_send_ping() {
            shared.send_keep_alive().await;
        }
    }
}

impl<T, E> Shared<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    /// Sends one ping on behalf of the keep-alive timer. If an application send holds the send
    /// slot the ping waits for it once, and is dropped when the slot is taken again.
    pub(crate) async fn send_keep_alive(&self) {
        if !lock(&self.session).state.can_send() {
            self.keep_alive.reschedule();
            return;
        }
        let internal = CancellationToken::new();
        let mut admission = self.send_guard.admit_background(&internal);
        if admission.token().is_none() {
            drop(admission);
            self.send_guard.wait_idle().await;
            admission = self.send_guard.admit_background(&internal);
        }
        let token = match admission.token() {
            Some(token) => token.clone(),
            None => {
                drop(admission);
                log::debug!("send slot busy, keep-alive ping dropped");
                self.keep_alive.reschedule();
                return;
            }
        };
        let result = self.execute_background(SendOperation::ping(), &token).await;
        drop(admission);
        self.keep_alive.reschedule();
        match result {
            Ok(()) => log::trace!("keep-alive ping sent"),
            Err(err) => log::debug!("keep-alive ping not sent: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_never_pings() {
        let tracker = KeepAliveTracker::new(Duration::ZERO);
        assert!(!tracker.enabled());
        assert!(!tracker.should_send_ping());
    }

    #[test]
    fn activity_defers_ping() {
        let tracker = KeepAliveTracker::new(Duration::from_millis(40));
        assert!(!tracker.should_send_ping());
        thread::sleep(Duration::from_millis(50));
        assert!(tracker.should_send_ping());
        tracker.on_receive();
        assert!(!tracker.should_send_ping());
        assert!(tracker.next_due() > Instant::now());
    }

    #[test]
    fn reschedule_moves_due_time_forward() {
        let tracker = KeepAliveTracker::new(Duration::from_millis(40));
        let before = tracker.next_due();
        thread::sleep(Duration::from_millis(5));
        tracker.reschedule();
        assert!(tracker.next_due() > before);
    }
}
