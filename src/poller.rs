use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::{ChatMessage, ChatSession, Error};

const CHANNEL_CAPACITY: usize = 64;

/// Controls a running [`spawn_poller`] task.
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<ChatSession>,
}

impl PollerHandle {
    /// Stop the task after its current iteration and take the session back.
    ///
    /// Cancellation only suppresses the next poll; an in-flight ledger
    /// submission is never retracted.
    pub async fn stop(self) -> Result<ChatSession, Error> {
        let _ = self.stop.send(true);
        self.task
            .await
            .map_err(|err| Error::Protocol(format!("polling task failed: {err}")))
    }
}

/// Run a chat session's poll loop as a background task.
///
/// One task per contact: sessions poll independent addresses, so any number
/// of pollers may run concurrently. New messages are delivered through the
/// returned channel; poll errors are logged and the next tick retries.
/// Dropping the receiver ends the task.
pub fn spawn_poller(mut session: ChatSession) -> (mpsc::Receiver<ChatMessage>, PollerHandle) {
    let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let poll_interval = session.config.poll_interval;

    let task = tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let messages = match session.poll_messages().await {
                        Ok(messages) => messages,
                        Err(err) => {
                            warn!(%err, "chat poll failed");
                            continue;
                        }
                    };
                    for message in messages {
                        if message_tx.send(message).await.is_err() {
                            debug!("message receiver dropped, poller stopping");
                            return session;
                        }
                    }
                }
            }
        }
        session
    });

    (
        message_rx,
        PollerHandle {
            stop: stop_tx,
            task,
        },
    )
}
