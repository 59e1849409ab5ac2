//! Message definitions for the real-time endpoints and the booking API
//!
//! All payloads are JSON with snake_case keys. Parse failures are mapped
//! to `MalformedAssignment` / `MalformedSample` at the boundary; the
//! offending frame is discarded and the connection stays open.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Coordinate
// ─────────────────────────────────────────────────────────────────

/// A point on Earth. Immutable value, created per sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, −90..=90
    pub lat: f64,
    /// Longitude in degrees, −180..=180
    pub lng: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting out-of-range values.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::Protocol(format!("latitude out of range: {}", lat)));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(Error::Protocol(format!("longitude out of range: {}", lng)));
        }
        Ok(Self { lat, lng })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lng)
    }
}

// ─────────────────────────────────────────────────────────────────
// Location socket frames (client → server)
// ─────────────────────────────────────────────────────────────────

/// One position update frame sent over the location socket: `{"lat":…,"lng":…}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
}

impl LocationUpdate {
    /// Serialize to the wire format.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Protocol(e.to_string()))
    }
}

impl From<Coordinate> for LocationUpdate {
    fn from(c: Coordinate) -> Self {
        Self { lat: c.lat, lng: c.lng }
    }
}

// ─────────────────────────────────────────────────────────────────
// Booking assignment (dispatcher → driver)
// ─────────────────────────────────────────────────────────────────

/// Lifecycle status of a booking, as reported by the transport service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Requested,
    Accepted,
    Rejected,
    Started,
    Completed,
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Requested => "REQUESTED",
            BookingStatus::Accepted => "ACCEPTED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Started => "STARTED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// A dispatch offer pushed to a specific driver over the assignment socket.
///
/// Delivered once per assignment; the driver must accept or reject through
/// the booking API. A driver may be re-offered over the same connection
/// after completing or rejecting a prior ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingAssignment {
    /// Booking identifier, positive
    pub booking_id: i64,
    /// Rider who requested the transport
    pub user_id: i64,
    /// Pickup point
    pub pickup_location: Coordinate,
    /// Dropoff point
    pub dropoff_location: Coordinate,
    /// Quoted fare, non-negative
    pub fare_amount: f64,
    /// Booking status at dispatch time
    #[serde(default)]
    pub status: Option<String>,
}

impl BookingAssignment {
    /// Parse an inbound assignment frame.
    ///
    /// Rejects structurally valid JSON that violates the data model
    /// (non-positive booking id, negative fare, out-of-range
    /// coordinates) as malformed too.
    pub fn from_json(text: &str) -> Result<Self> {
        let assignment: BookingAssignment =
            serde_json::from_str(text).map_err(|e| Error::malformed_assignment(e.to_string()))?;

        if assignment.booking_id <= 0 {
            return Err(Error::malformed_assignment(format!(
                "booking_id must be positive, got {}",
                assignment.booking_id
            )));
        }
        if assignment.fare_amount < 0.0 {
            return Err(Error::malformed_assignment(format!(
                "fare_amount must be non-negative, got {}",
                assignment.fare_amount
            )));
        }
        // Derived Deserialize on Coordinate does not range-check.
        Coordinate::new(assignment.pickup_location.lat, assignment.pickup_location.lng)
            .map_err(|e| Error::malformed_assignment(format!("pickup_location: {}", e)))?;
        Coordinate::new(assignment.dropoff_location.lat, assignment.dropoff_location.lng)
            .map_err(|e| Error::malformed_assignment(format!("dropoff_location: {}", e)))?;

        Ok(assignment)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tracking push stream events (server → rider)
// ─────────────────────────────────────────────────────────────────

/// One event on the tracking push stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackEvent {
    /// A position sample: data event carrying `{"lat":…,"lng":…}`
    Position(Coordinate),
    /// The distinguished terminal event; no further samples follow
    End,
}

impl TrackEvent {
    /// Parse the data payload of a position event.
    pub fn position_from_json(text: &str) -> Result<Coordinate> {
        let update: LocationUpdate =
            serde_json::from_str(text).map_err(|e| Error::malformed_sample(e.to_string()))?;
        Coordinate::new(update.lat, update.lng)
            .map_err(|e| Error::malformed_sample(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────
// Booking API types
// ─────────────────────────────────────────────────────────────────

/// A booking record as returned by the bookings listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub driver_id: Option<i64>,
    pub pickup_location: Coordinate,
    pub dropoff_location: Coordinate,
    pub fare_amount: f64,
    pub status: String,
}

/// The driver's decision on an assignment, as the booking API spells it.
///
/// The service matches these strings verbatim (`ACCEPTED`, `REJECT`,
/// `STARTED`, `COMPLETED`), inconsistent tense included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverDecision {
    Accept,
    Reject,
    Start,
    Complete,
}

impl DriverDecision {
    /// Wire value for the `response` field of the respond-booking call.
    pub fn wire_value(&self) -> &'static str {
        match self {
            DriverDecision::Accept => "ACCEPTED",
            DriverDecision::Reject => "REJECT",
            DriverDecision::Start => "STARTED",
            DriverDecision::Complete => "COMPLETED",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
