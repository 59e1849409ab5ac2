//! Assignment listener
//!
//! Holds the driver's assignment socket open and surfaces dispatch
//! offers as typed events. A frame that fails to parse is logged and
//! discarded; the connection stays open and later valid frames are
//! still delivered. The listener does not reconnect, callers wrap it
//! in their own retry policy.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::BookingAssignment;
use crate::realtime::connection::{
    ConnectionEvent, ConnectionHandle, Connector, Endpoint, InboundFrame,
};

/// Events surfaced by the listener, in socket delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentEvent {
    /// The socket is established and offers can arrive
    Opened,
    /// A parsed dispatch offer
    Assigned(BookingAssignment),
    /// Transport failure; `Closed` follows
    ConnectionError(String),
    /// The socket is gone; no further events
    Closed,
}

/// Handle to a running listener.
pub struct ListenerHandle {
    connection: ConnectionHandle,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Close the socket and stop the listener. Idempotent through the
    /// underlying connection handle.
    pub fn stop(&self) {
        self.connection.close();
    }

    /// Whether the listener task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Opens assignment sockets and translates frames into events.
#[derive(Debug, Clone, Default)]
pub struct AssignmentListener {
    connector: Connector,
}

impl AssignmentListener {
    pub fn new(connector: Connector) -> Self {
        Self { connector }
    }

    /// Start listening for assignments pushed to `driver_id`.
    pub fn listen(
        &self,
        base_url: &str,
        driver_id: i64,
    ) -> Result<(ListenerHandle, mpsc::Receiver<AssignmentEvent>)> {
        let endpoint = Endpoint::assignment(base_url, driver_id)?;
        let (connection, mut conn_events) = self.connector.open(endpoint);
        let (event_tx, event_rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            while let Some(event) = conn_events.recv().await {
                match event {
                    ConnectionEvent::Opened => {
                        info!(driver_id, "Listening for assignments");
                        let _ = event_tx.send(AssignmentEvent::Opened).await;
                    }
                    ConnectionEvent::Message(InboundFrame::Data(text)) => {
                        match BookingAssignment::from_json(&text) {
                            Ok(assignment) => {
                                info!(
                                    booking_id = assignment.booking_id,
                                    user_id = assignment.user_id,
                                    fare = assignment.fare_amount,
                                    "Assignment received"
                                );
                                let _ = event_tx
                                    .send(AssignmentEvent::Assigned(assignment))
                                    .await;
                            }
                            Err(e) => {
                                // Discard and keep listening.
                                warn!(error = %e, frame = %text, "Discarding malformed assignment");
                            }
                        }
                    }
                    ConnectionEvent::Message(InboundFrame::Named { event, .. }) => {
                        debug!(event = %event, "Ignoring named event on assignment socket");
                    }
                    ConnectionEvent::Error(message) => {
                        let _ = event_tx
                            .send(AssignmentEvent::ConnectionError(message))
                            .await;
                    }
                    ConnectionEvent::Closed => {
                        let _ = event_tx.send(AssignmentEvent::Closed).await;
                        break;
                    }
                }
            }
        });

        Ok((ListenerHandle { connection, task }, event_rx))
    }
}
