//! The connection driver: one task per link that owns the transport and is
//! the only place inbound events are fanned out from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::backoff::Backoff;
use crate::config::{ClientConfig, ReconnectConfig};
use crate::error::TransportError;
use crate::listeners::Observers;
use crate::messages::ClientMessage;
use crate::transport::{Connection, Connector, Inbound};

/// Handle to a running driver. Dropping it aborts the driver.
pub(crate) struct Link {
    commands: mpsc::UnboundedSender<ClientMessage>,
    connected: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Link {
    pub(crate) fn spawn(
        connector: Arc<dyn Connector>,
        config: &ClientConfig,
        observers: Arc<Observers>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            connector,
            observers,
            connected: Arc::clone(&connected),
            commands: commands_rx,
            shutdown: shutdown_rx,
            backoff: Backoff::from_config(&config.reconnection),
            reconnect: config.reconnection.clone(),
            liveness: config.liveness_interval(),
        };

        Link {
            commands,
            connected,
            shutdown: Some(shutdown),
            task: Some(tokio::spawn(driver.run())),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queues a message for the driver. Messages queued while the transport
    /// is down go out after the next successful reconnect.
    pub(crate) fn send(&self, message: ClientMessage) -> bool {
        self.commands.send(message).is_ok()
    }

    /// Stops the driver and waits for it, aborting after `timeout`. No
    /// observer is notified by this link once this returns.
    pub(crate) async fn shutdown(mut self, timeout: Duration) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Connection driver ended abnormally: {e}"),
                Err(_) => {
                    warn!("Connection driver did not stop within {timeout:?}, aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

enum Ended {
    Shutdown,
    ServerDisconnect,
    Lost(TransportError),
}

struct Driver {
    connector: Arc<dyn Connector>,
    observers: Arc<Observers>,
    connected: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<ClientMessage>,
    shutdown: oneshot::Receiver<()>,
    backoff: Backoff,
    reconnect: ReconnectConfig,
    liveness: Option<Duration>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let attempt = tokio::select! {
                biased;
                _ = &mut self.shutdown => return,
                result = self.connector.connect() => result,
            };

            match attempt {
                Ok(connection) => {
                    if self.backoff.attempts() > 0 {
                        info!("Reconnected after {} attempts", self.backoff.attempts());
                    }
                    self.backoff.reset();
                    self.connected.store(true, Ordering::SeqCst);
                    info!("Connection established");
                    self.observers.notify_connection(true);

                    let ended = self.serve(connection).await;
                    self.connected.store(false, Ordering::SeqCst);
                    match ended {
                        Ended::Shutdown => return,
                        Ended::ServerDisconnect => {
                            debug!("Disconnect: io server disconnect");
                            self.idle().await;
                            return;
                        }
                        Ended::Lost(e) => debug!("Disconnect: {e}"),
                    }
                }
                Err(e) => debug!("Connect error: {e}"),
            }

            if !self.reconnect.enabled || self.backoff.attempts() >= self.reconnect.attempts {
                warn!(
                    "Giving up on the relay after {} reconnection attempts",
                    self.backoff.attempts()
                );
                self.idle().await;
                return;
            }

            let delay = self.backoff.next_delay();
            debug!(
                "Reconnecting in {delay:?} (attempt {}/{})",
                self.backoff.attempts(),
                self.reconnect.attempts
            );
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn serve(&mut self, mut connection: Box<dyn Connection>) -> Ended {
        let mut liveness = self.liveness.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => {
                    connection.close().await;
                    return Ended::Shutdown;
                }
                // A dead transport is noticed before queued commands are
                // written to it; they stay queued for the next connection.
                inbound = connection.recv() => match inbound {
                    Ok(Inbound::Message(message)) => self.observers.dispatch(&message),
                    Ok(Inbound::ServerDisconnect) => return Ended::ServerDisconnect,
                    Err(e) => return Ended::Lost(e),
                },
                command = self.commands.recv() => {
                    let Some(message) = command else {
                        connection.close().await;
                        return Ended::Shutdown;
                    };
                    debug!("Emitting {}", message.event_name());
                    // A failed emit loses this message; it is not replayed.
                    if let Err(e) = connection.emit(message).await {
                        return Ended::Lost(e);
                    }
                }
                () = tick(&mut liveness) => {
                    if self.connected.load(Ordering::SeqCst) {
                        self.observers.notify_connection(true);
                    }
                }
            }
        }
    }

    /// Parks a driver that will not reconnect until the link is shut down.
    async fn idle(&mut self) {
        let _ = (&mut self.shutdown).await;
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
