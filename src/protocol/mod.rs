//! Wire types for the transport real-time endpoints
//!
//! The location socket, the assignment socket, and the tracking push
//! stream all speak bare JSON objects (no envelope); the shapes here
//! match the backend services byte for byte.

mod messages;

pub use messages::{
    Booking, BookingAssignment, BookingStatus, Coordinate, DriverDecision, LocationUpdate,
    TrackEvent,
};
