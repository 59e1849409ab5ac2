//! Track subscriber
//!
//! Rider-side view of a ride in progress. Each tracked booking gets a
//! session: an append-only log of position samples plus a state machine
//! that settles exactly once into Completed, Cancelled or Errored. Once
//! terminal, a session never mutates again; late frames are ignored.
//!
//! The subscriber holds at most one live session. Tracking a new booking
//! cancels the previous one first.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{Coordinate, TrackEvent};
use crate::realtime::connection::{
    ConnectionEvent, ConnectionHandle, Connector, Endpoint, InboundFrame,
};

/// Terminal event name on the tracking stream.
const END_EVENT: &str = "end";

/// Lifecycle state of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream open, samples arriving
    Active,
    /// The ride ended; the server sent the terminal event
    Completed,
    /// Superseded or stopped locally
    Cancelled,
    /// The stream failed or closed before the terminal event
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        *self != SessionState::Active
    }
}

/// One recorded position, with its per-session sequence number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    /// 0-based position in session order
    pub seq: u64,
    pub position: Coordinate,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    samples: Vec<LocationSample>,
}

/// A tracking session for one booking.
///
/// Cheap to clone; all clones observe the same log and state.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    booking_id: i64,
    inner: Arc<RwLock<SessionInner>>,
}

impl TrackingSession {
    fn new(booking_id: i64) -> Self {
        Self {
            booking_id,
            inner: Arc::new(RwLock::new(SessionInner {
                state: SessionState::Active,
                samples: Vec::new(),
            })),
        }
    }

    pub fn booking_id(&self) -> i64 {
        self.booking_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    /// Snapshot of the sample log, in arrival order.
    pub fn samples(&self) -> Vec<LocationSample> {
        self.inner.read().samples.clone()
    }

    pub fn sample_count(&self) -> usize {
        self.inner.read().samples.len()
    }

    /// Last known position, if any sample arrived.
    pub fn last_position(&self) -> Option<Coordinate> {
        self.inner.read().samples.last().map(|s| s.position)
    }

    /// Append a sample. Refused once the session is terminal.
    fn append(&self, position: Coordinate) -> Option<LocationSample> {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return None;
        }
        let sample = LocationSample {
            seq: inner.samples.len() as u64,
            position,
        };
        inner.samples.push(sample);
        Some(sample)
    }

    /// Settle into a terminal state. Only the first call takes effect;
    /// returns whether this call performed the transition.
    fn finish(&self, state: SessionState) -> bool {
        debug_assert!(state.is_terminal());
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = state;
        true
    }

    fn is_same(&self, other: &TrackingSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Updates delivered to the subscriber's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackUpdate {
    /// A new sample was appended
    Position(LocationSample),
    /// The session settled; this is the final update
    Ended(SessionState),
}

struct CurrentTrack {
    session: TrackingSession,
    connection: ConnectionHandle,
}

/// Opens tracking streams, one live session at a time.
pub struct TrackSubscriber {
    connector: Connector,
    base_url: String,
    // Shared with the stream task so it can release the connection
    // when the session settles.
    current: Arc<Mutex<Option<CurrentTrack>>>,
}

/// Close and clear the live stream if it still belongs to `session`.
fn release_stream(current: &Mutex<Option<CurrentTrack>>, session: &TrackingSession) {
    let mut guard = current.lock();
    if guard
        .as_ref()
        .map(|track| track.session.is_same(session))
        .unwrap_or(false)
    {
        if let Some(track) = guard.take() {
            track.connection.close();
        }
    }
}

impl TrackSubscriber {
    pub fn new(connector: Connector, base_url: impl Into<String>) -> Self {
        Self {
            connector,
            base_url: base_url.into(),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Start tracking `booking_id`.
    ///
    /// Any previous session still active is cancelled and its stream
    /// closed before the new one opens.
    pub fn track(
        &self,
        booking_id: i64,
    ) -> Result<(TrackingSession, mpsc::Receiver<TrackUpdate>)> {
        let endpoint = Endpoint::tracking(&self.base_url, booking_id)?;

        self.cancel_current();

        let session = TrackingSession::new(booking_id);
        let (connection, mut conn_events) = self.connector.open(endpoint);
        let (update_tx, update_rx) = mpsc::channel(64);

        *self.current.lock() = Some(CurrentTrack {
            session: session.clone(),
            connection,
        });

        let task_session = session.clone();
        let task_current = self.current.clone();
        tokio::spawn(async move {
            let mut last_error: Option<String> = None;

            while let Some(event) = conn_events.recv().await {
                match event {
                    ConnectionEvent::Opened => {
                        info!(booking_id, "Tracking stream open");
                    }
                    ConnectionEvent::Message(InboundFrame::Data(data)) => {
                        let position = match TrackEvent::position_from_json(&data) {
                            Ok(position) => position,
                            Err(e) => {
                                // Discard, keep the stream.
                                warn!(booking_id, error = %e, "Discarding malformed sample");
                                continue;
                            }
                        };
                        if let Some(sample) = task_session.append(position) {
                            let _ = update_tx.send(TrackUpdate::Position(sample)).await;
                        } else {
                            debug!(booking_id, "Sample after terminal state ignored");
                        }
                    }
                    ConnectionEvent::Message(InboundFrame::Named { event, data }) => {
                        if event == END_EVENT {
                            info!(booking_id, message = %data, "Ride ended");
                            if task_session.finish(SessionState::Completed) {
                                // The terminal event ends the stream; the
                                // server owes us nothing further.
                                release_stream(&task_current, &task_session);
                                let _ = update_tx
                                    .send(TrackUpdate::Ended(SessionState::Completed))
                                    .await;
                            }
                        } else {
                            debug!(booking_id, event = %event, "Ignoring unknown stream event");
                        }
                    }
                    ConnectionEvent::Error(message) => {
                        last_error = Some(message);
                    }
                    ConnectionEvent::Closed => {
                        // Close before the terminal event is a failure.
                        if task_session.finish(SessionState::Errored) {
                            if let Some(message) = last_error {
                                warn!(booking_id, error = %message, "Tracking stream failed");
                            } else {
                                warn!(booking_id, "Tracking stream closed unexpectedly");
                            }
                            let _ = update_tx
                                .send(TrackUpdate::Ended(SessionState::Errored))
                                .await;
                        }
                        // The connection is gone either way; drop the handle.
                        release_stream(&task_current, &task_session);
                        break;
                    }
                }
            }
        });

        Ok((session, update_rx))
    }

    /// Cancel the live session, if there is one. Idempotent.
    pub fn cancel_current(&self) {
        let previous = self.current.lock().take();
        if let Some(track) = previous {
            if track.session.finish(SessionState::Cancelled) {
                info!(
                    booking_id = track.session.booking_id(),
                    "Cancelling tracking session"
                );
            }
            track.connection.close();
        }
    }
}

impl Drop for TrackSubscriber {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_appends_in_order() {
        let session = TrackingSession::new(1);
        session.append(Coordinate { lat: 1.0, lng: 2.0 }).unwrap();
        session.append(Coordinate { lat: 3.0, lng: 4.0 }).unwrap();

        let samples = session.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].seq, 0);
        assert_eq!(samples[1].seq, 1);
        assert_eq!(session.last_position(), Some(Coordinate { lat: 3.0, lng: 4.0 }));
    }

    #[test]
    fn test_terminal_session_refuses_samples() {
        let session = TrackingSession::new(1);
        session.append(Coordinate { lat: 1.0, lng: 2.0 }).unwrap();
        assert!(session.finish(SessionState::Completed));

        assert!(session.append(Coordinate { lat: 9.0, lng: 9.0 }).is_none());
        assert_eq!(session.sample_count(), 1);
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn test_finish_settles_once() {
        let session = TrackingSession::new(1);
        assert!(session.finish(SessionState::Cancelled));
        assert!(!session.finish(SessionState::Completed));
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    /// A listener that accepts connections and never answers, so the
    /// stream stays pending for the duration of the test.
    fn silent_server() -> (std::net::TcpListener, String) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    /// A push-stream server that writes the given body to every client,
    /// then either holds the connection open or drops it.
    async fn spawn_stream_server(body: &'static str, hold_open: bool) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = [0u8; 1024];
                    let _ = stream.read(&mut request).await;

                    let head = "HTTP/1.1 200 OK\r\n\
                        Content-Type: text/event-stream\r\n\
                        Cache-Control: no-cache\r\n\r\n";
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(body.as_bytes()).await;
                    let _ = stream.flush().await;
                    if hold_open {
                        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    }
                });
            }
        });

        format!("http://{}", addr)
    }

    /// A push-stream server that writes the given body, then flags when
    /// the client hangs up.
    async fn spawn_hangup_server(
        body: &'static str,
    ) -> (String, Arc<std::sync::atomic::AtomicBool>) {
        use std::sync::atomic::{AtomicBool, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = disconnected.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let flag = flag.clone();
                tokio::spawn(async move {
                    let mut request = [0u8; 1024];
                    let _ = stream.read(&mut request).await;

                    let head = "HTTP/1.1 200 OK\r\n\
                        Content-Type: text/event-stream\r\n\
                        Cache-Control: no-cache\r\n\r\n";
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(body.as_bytes()).await;
                    let _ = stream.flush().await;

                    // Read returns 0 or errors once the client disconnects.
                    let mut buf = [0u8; 64];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                    flag.store(true, Ordering::SeqCst);
                });
            }
        });

        (format!("http://{}", addr), disconnected)
    }

    async fn next_update(
        updates: &mut tokio::sync::mpsc::Receiver<TrackUpdate>,
    ) -> Option<TrackUpdate> {
        tokio::time::timeout(std::time::Duration::from_secs(5), updates.recv())
            .await
            .expect("update expected")
    }

    #[tokio::test]
    async fn test_full_ride_scenario() {
        let base = spawn_stream_server(
            "data: {\"lat\":19.0761,\"lng\":72.8778}\n\n\
             data: {\"lat\":19.0765,\"lng\":72.8785}\n\n\
             event: end\ndata: Booking completed\n\n",
            true,
        )
        .await;

        let subscriber = TrackSubscriber::new(Connector::default(), base);
        let (session, mut updates) = subscriber.track(123).unwrap();

        match next_update(&mut updates).await {
            Some(TrackUpdate::Position(sample)) => {
                assert_eq!(sample.seq, 0);
                assert_eq!(sample.position, Coordinate { lat: 19.0761, lng: 72.8778 });
            }
            other => panic!("expected first sample, got {:?}", other),
        }
        match next_update(&mut updates).await {
            Some(TrackUpdate::Position(sample)) => assert_eq!(sample.seq, 1),
            other => panic!("expected second sample, got {:?}", other),
        }
        match next_update(&mut updates).await {
            Some(TrackUpdate::Ended(state)) => assert_eq!(state, SessionState::Completed),
            other => panic!("expected session end, got {:?}", other),
        }

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.sample_count(), 2);
        assert_eq!(
            session.last_position(),
            Some(Coordinate { lat: 19.0765, lng: 72.8785 })
        );
    }

    #[tokio::test]
    async fn test_completed_session_releases_stream() {
        use std::sync::atomic::Ordering;

        let (base, disconnected) = spawn_hangup_server(
            "data: {\"lat\":19.0761,\"lng\":72.8778}\n\n\
             event: end\ndata: Booking completed\n\n",
        )
        .await;

        let subscriber = TrackSubscriber::new(Connector::default(), base);
        let (session, mut updates) = subscriber.track(123).unwrap();

        assert!(matches!(
            next_update(&mut updates).await,
            Some(TrackUpdate::Position(_))
        ));
        assert!(matches!(
            next_update(&mut updates).await,
            Some(TrackUpdate::Ended(SessionState::Completed))
        ));

        // The subscriber stays alive; the stream is torn down anyway.
        for _ in 0..50 {
            if disconnected.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(disconnected.load(Ordering::SeqCst));

        // Cancelling afterwards finds nothing to cancel.
        subscriber.cancel_current();
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_samples_after_terminal_event_ignored() {
        let base = spawn_stream_server(
            "data: {\"lat\":19.0761,\"lng\":72.8778}\n\n\
             event: end\ndata: Booking completed\n\n\
             data: {\"lat\":90.0,\"lng\":0.0}\n\n",
            true,
        )
        .await;

        let subscriber = TrackSubscriber::new(Connector::default(), base);
        let (session, mut updates) = subscriber.track(5).unwrap();

        assert!(matches!(
            next_update(&mut updates).await,
            Some(TrackUpdate::Position(_))
        ));
        assert!(matches!(
            next_update(&mut updates).await,
            Some(TrackUpdate::Ended(SessionState::Completed))
        ));

        // The trailing sample is dropped, not appended or surfaced.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(session.sample_count(), 1);
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_malformed_sample_skipped() {
        let base = spawn_stream_server(
            "data: garbage\n\n\
             data: {\"lat\":19.0761,\"lng\":72.8778}\n\n\
             event: end\ndata: done\n\n",
            true,
        )
        .await;

        let subscriber = TrackSubscriber::new(Connector::default(), base);
        let (session, mut updates) = subscriber.track(9).unwrap();

        match next_update(&mut updates).await {
            Some(TrackUpdate::Position(sample)) => {
                assert_eq!(sample.seq, 0);
                assert_eq!(sample.position.lat, 19.0761);
            }
            other => panic!("expected sample, got {:?}", other),
        }
        assert!(matches!(
            next_update(&mut updates).await,
            Some(TrackUpdate::Ended(SessionState::Completed))
        ));
        assert_eq!(session.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_drop_before_end_errors_session() {
        let base = spawn_stream_server(
            "data: {\"lat\":19.0761,\"lng\":72.8778}\n\n",
            false,
        )
        .await;

        let subscriber = TrackSubscriber::new(Connector::default(), base);
        let (session, mut updates) = subscriber.track(7).unwrap();

        assert!(matches!(
            next_update(&mut updates).await,
            Some(TrackUpdate::Position(_))
        ));
        assert!(matches!(
            next_update(&mut updates).await,
            Some(TrackUpdate::Ended(SessionState::Errored))
        ));
        assert_eq!(session.state(), SessionState::Errored);
        assert_eq!(session.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_retrack_cancels_previous_session() {
        let (_listener, base) = silent_server();
        let subscriber = TrackSubscriber::new(Connector::default(), base);

        let (first, _rx1) = subscriber.track(1).unwrap();
        assert_eq!(first.state(), SessionState::Active);

        let (second, _rx2) = subscriber.track(2).unwrap();
        assert_eq!(first.state(), SessionState::Cancelled);
        assert_eq!(second.booking_id(), 2);
    }

    #[tokio::test]
    async fn test_cancel_current_is_idempotent() {
        let (_listener, base) = silent_server();
        let subscriber = TrackSubscriber::new(Connector::default(), base);
        let (session, _rx) = subscriber.track(5).unwrap();

        subscriber.cancel_current();
        subscriber.cancel_current();
        assert_eq!(session.state(), SessionState::Cancelled);
    }
}
