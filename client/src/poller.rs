//! Background polling loops: exposure notification and safe-to-move wait
//!
//! Both loops share the session's single connection with foreground
//! calls; the session mutex keeps every round trip whole. Cancellation
//! is cooperative: the loops check a watch flag between requests, so a
//! sleeping loop wakes promptly on cancel and never tears a round trip
//! in half.

use crate::session::Session;
use log::{debug, error, info};
use shared::{Location, POLL_INTERVAL};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// One-time "exposure detected" event for a logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureAlert {
    pub username: String,
}

/// Handle to a running notification poller.
///
/// Started on successful login; runs until [`NotificationPoller::cancel`]
/// is called (logout or infection self-report) or the connection breaks.
/// Dropping the handle also stops the loop at its next cancellation
/// check.
pub struct NotificationPoller {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NotificationPoller {
    /// Spawns the poller for `username`. Polls immediately, then every
    /// five seconds; each true response emits one [`ExposureAlert`] on
    /// the returned channel.
    pub fn spawn(
        session: Session,
        username: String,
    ) -> (NotificationPoller, mpsc::UnboundedReceiver<ExposureAlert>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        debug!("Notification poller for {:?} cancelled", username);
                        break;
                    }
                    _ = ticker.tick() => {
                        // The round trip below runs outside the select, so
                        // cancellation never interrupts it mid-exchange.
                        match session.check_notification(&username).await {
                            Ok(true) => {
                                info!("Exposure detected for {:?}", username);
                                let alert = ExposureAlert {
                                    username: username.clone(),
                                };
                                if event_tx.send(alert).is_err() {
                                    break;
                                }
                            }
                            Ok(false) => {}
                            Err(e) => {
                                error!(
                                    "Notification poller for {:?} lost its connection: {}",
                                    username, e
                                );
                                break;
                            }
                        }
                    }
                }
            }
        });

        (
            NotificationPoller {
                cancel: cancel_tx,
                task,
            },
            event_rx,
        )
    }

    /// Cancels the poller and waits for its loop to exit. The loop
    /// observes the signal within one poll interval and sends no further
    /// requests.
    pub async fn cancel(self) {
        let _ = self.cancel.send(true);
        let _ = self.task.await;
    }
}

/// Handle to one in-flight safe-to-move wait.
///
/// Fire-and-forget per invocation: concurrent waits for different cells
/// or users are fully independent tasks.
pub struct SafeToMoveWait {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SafeToMoveWait {
    /// Spawns a loop that asks `verify-location` for `location` every
    /// five seconds until the cell is empty, then signals completion once
    /// on the returned channel. The channel closes without a value if the
    /// wait is cancelled or the connection breaks.
    pub fn spawn(session: Session, location: Location) -> (SafeToMoveWait, oneshot::Receiver<()>) {
        let (done_tx, done_rx) = oneshot::channel();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut done_tx = Some(done_tx);

            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        debug!("Safe-to-move wait for {} cancelled", location);
                        break;
                    }
                    _ = ticker.tick() => {
                        match session.verify_location(location).await {
                            Ok(0) => {
                                info!("Location {} is clear", location);
                                if let Some(done) = done_tx.take() {
                                    let _ = done.send(());
                                }
                                break;
                            }
                            Ok(count) => {
                                debug!("Location {} still has {} occupants", location, count);
                            }
                            Err(e) => {
                                error!("Safe-to-move wait for {} lost its connection: {}", location, e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        (
            SafeToMoveWait {
                cancel: cancel_tx,
                task,
            },
            done_rx,
        )
    }

    /// Cancels the wait and joins its task.
    pub async fn cancel(self) {
        let _ = self.cancel.send(true);
        let _ = self.task.await;
    }
}
