//! Real-time client components
//!
//! Everything that talks to the platform's live endpoints: the connection
//! manager owning one socket or push stream per handle, the location
//! publisher, the assignment listener, and the track subscriber.

pub mod assignments;
pub mod connection;
pub mod publisher;
pub mod sse;
pub mod tracking;

pub use assignments::{AssignmentEvent, AssignmentListener, ListenerHandle};
pub use connection::{
    ConnectionEvent, ConnectionHandle, ConnectionSender, ConnectionState, Connector,
    ConnectorConfig, Endpoint, EndpointKind, InboundFrame,
};
pub use publisher::{LocationPublisher, PublisherHandle, PublisherStats};
pub use tracking::{LocationSample, SessionState, TrackSubscriber, TrackUpdate, TrackingSession};
