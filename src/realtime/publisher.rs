//! Location publisher
//!
//! Streams position samples over an open location socket at a fixed
//! cadence. Delivery is at most once: a sample taken while the socket is
//! not open is counted as dropped and never retried, the next tick sends
//! the next fix. The publisher never closes the socket; lifecycle stays
//! with whoever owns the connection handle.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::position::PositionSource;
use crate::protocol::LocationUpdate;
use crate::realtime::connection::ConnectionSender;

/// Counters for one publishing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Samples handed to the transport
    pub sent: u64,
    /// Samples discarded because the socket was not open
    pub dropped: u64,
}

/// Handle to a running publisher task.
pub struct PublisherHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    stats_rx: mpsc::Receiver<PublisherStats>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Stop publishing and return the run's counters.
    ///
    /// Safe to call once; the connection is left untouched.
    pub async fn stop(mut self) -> PublisherStats {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let stats = self.stats_rx.recv().await.unwrap_or_default();
        let _ = self.task.await;
        stats
    }

    /// Whether the publishing task has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns and owns location publishing tasks.
#[derive(Debug, Clone)]
pub struct LocationPublisher {
    interval: Duration,
}

impl LocationPublisher {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Start streaming positions from `source` through `sender`.
    ///
    /// One sample is taken per interval tick. The task runs until
    /// stopped or until the position source is exhausted.
    pub fn start(
        &self,
        mut source: Box<dyn PositionSource>,
        sender: ConnectionSender,
    ) -> PublisherHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let (stats_tx, stats_rx) = mpsc::channel(1);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut stats = PublisherStats::default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let position = match source.next_position().await {
                            Some(position) => position,
                            None => {
                                debug!("Position source exhausted");
                                break;
                            }
                        };

                        if !sender.is_open() {
                            stats.dropped += 1;
                            debug!(position = %position, "Socket not open, sample dropped");
                            continue;
                        }

                        let frame = match LocationUpdate::from(position).to_json() {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode position");
                                stats.dropped += 1;
                                continue;
                            }
                        };

                        match sender.send(frame) {
                            Ok(()) => stats.sent += 1,
                            Err(e) => {
                                // No retry; the sample is gone.
                                stats.dropped += 1;
                                debug!(error = %e, "Send failed, sample dropped");
                            }
                        }
                    }
                }
            }

            debug!(sent = stats.sent, dropped = stats.dropped, "Publisher stopped");
            let _ = stats_tx.send(stats).await;
        });

        PublisherHandle {
            stop_tx: Some(stop_tx),
            stats_rx,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures_util::StreamExt;
    use parking_lot::RwLock;
    use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

    use crate::position::SimulatedRoute;
    use crate::protocol::Coordinate;
    use crate::realtime::connection::{ConnectionEvent, Connector, Endpoint};

    async fn spawn_recording_server(recorded: Arc<RwLock<Vec<String>>>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        let (_write, mut read) = ws.split();
                        while let Some(Ok(msg)) = read.next().await {
                            if let WsMessage::Text(text) = msg {
                                recorded.write().push(text);
                            }
                        }
                    }
                });
            }
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_publishes_position_frames_in_order() {
        let recorded = Arc::new(RwLock::new(Vec::new()));
        let base = spawn_recording_server(recorded.clone()).await;

        let connector = Connector::default();
        let endpoint = Endpoint::location(&base, 1, Some(42)).unwrap();
        let (handle, mut events) = connector.open(endpoint);
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event expected")
                .expect("channel open")
            {
                ConnectionEvent::Opened => break,
                ConnectionEvent::Error(e) => panic!("connect failed: {}", e),
                _ => {}
            }
        }

        let source = SimulatedRoute::new(Coordinate::new(19.076, 72.8777).unwrap()).with_limit(3);
        let publisher = LocationPublisher::new(Duration::from_millis(10));
        let pub_handle = publisher.start(Box::new(source), handle.sender());

        // Source is exhausted after three fixes; the task exits on its own.
        for _ in 0..100 {
            if pub_handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = pub_handle.stop().await;
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.dropped, 0);

        for _ in 0..50 {
            if recorded.read().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let frames = recorded.read().clone();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], r#"{"lat":19.076,"lng":72.8777}"#);
        // Each sample advances the route.
        assert!(frames[1].contains("19.0761"));
        assert!(frames[2].contains("19.0762"));
        handle.close();
    }

    #[tokio::test]
    async fn test_samples_dropped_when_socket_never_opens() {
        let connector = Connector::default();
        // Nothing listens here; the handle stays in Connecting then errors.
        let endpoint = Endpoint::location("ws://127.0.0.1:9", 1, None).unwrap();
        let (handle, _events) = connector.open(endpoint);

        let source = SimulatedRoute::new(Coordinate::new(19.076, 72.8777).unwrap());
        let publisher = LocationPublisher::new(Duration::from_millis(10));
        let pub_handle = publisher.start(Box::new(source), handle.sender());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = pub_handle.stop().await;

        assert_eq!(stats.sent, 0);
        assert!(stats.dropped >= 1);
        handle.close();
    }

    #[tokio::test]
    async fn test_stop_returns_stats_immediately() {
        let connector = Connector::default();
        let endpoint = Endpoint::location("ws://127.0.0.1:9", 1, None).unwrap();
        let (handle, _events) = connector.open(endpoint);

        let source = SimulatedRoute::new(Coordinate::new(0.0, 0.0).unwrap());
        let publisher = LocationPublisher::new(Duration::from_secs(60));
        let pub_handle = publisher.start(Box::new(source), handle.sender());

        let stats = pub_handle.stop().await;
        // First tick fires immediately; at most one sample was taken.
        assert!(stats.sent + stats.dropped <= 1);
        handle.close();
    }
}
