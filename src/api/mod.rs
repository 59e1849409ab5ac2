//! Booking and fare HTTP client
//!
//! Thin typed wrapper over the platform's request/response endpoints:
//! fare quoting on the payment service, booking lifecycle on the
//! transport service. Non-2xx responses surface as `ApiStatus` errors
//! with the body attached.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{Booking, Coordinate, DriverDecision};

/// A fare quote from the payment service.
#[derive(Debug, Clone, Deserialize)]
pub struct FareQuote {
    pub fare_amount: f64,
    pub distance_km: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_id: Option<i64>,
}

/// Acknowledgement of a new booking request.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingReceipt {
    pub booking_id: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct FareRequest {
    user_id: i64,
    pickup_location: Coordinate,
    dropoff_location: Coordinate,
}

#[derive(Debug, Serialize)]
struct BookingRequest {
    user_id: i64,
    pickup_location: Coordinate,
    dropoff_location: Coordinate,
    fare_amount: f64,
}

/// Client for the fare and booking APIs.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    fare_base: String,
    booking_base: String,
}

impl ApiClient {
    pub fn new(fare_base: impl Into<String>, booking_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            fare_base: fare_base.into(),
            booking_base: booking_base.into(),
        })
    }

    /// Quote the fare for a trip.
    pub async fn get_fare(
        &self,
        user_id: i64,
        pickup: Coordinate,
        dropoff: Coordinate,
    ) -> Result<FareQuote> {
        let url = format!("{}/api/user/get-fare", self.fare_base);
        debug!(%url, "Requesting fare quote");

        let response = self
            .http
            .post(&url)
            .json(&FareRequest {
                user_id,
                pickup_location: pickup,
                dropoff_location: dropoff,
            })
            .send()
            .await?;
        let quote: FareQuote = Self::parse(response, "get-fare").await?;

        info!(
            fare = quote.fare_amount,
            distance_km = quote.distance_km,
            "Fare quoted"
        );
        Ok(quote)
    }

    /// Request a transport booking for a rider.
    pub async fn book_transport(
        &self,
        user_id: i64,
        pickup: Coordinate,
        dropoff: Coordinate,
        fare_amount: f64,
    ) -> Result<BookingReceipt> {
        let url = format!("{}/api/user/book-transport", self.booking_base);
        debug!(%url, user_id, "Booking transport");

        let response = self
            .http
            .post(&url)
            .json(&BookingRequest {
                user_id,
                pickup_location: pickup,
                dropoff_location: dropoff,
                fare_amount,
            })
            .send()
            .await?;
        let receipt: BookingReceipt = Self::parse(response, "book-transport").await?;

        info!(
            booking_id = receipt.booking_id,
            status = %receipt.status,
            "Booking created"
        );
        Ok(receipt)
    }

    /// List a rider's bookings.
    pub async fn user_bookings(&self, user_id: i64) -> Result<Vec<Booking>> {
        let url = format!("{}/api/user/bookings", self.booking_base);
        let response = self
            .http
            .get(&url)
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        Self::parse(response, "bookings").await
    }

    /// Submit the driver's decision on a booking.
    pub async fn respond_booking(
        &self,
        driver_id: i64,
        booking_id: i64,
        decision: DriverDecision,
    ) -> Result<()> {
        let url = format!("{}/api/driver/respond-booking", self.booking_base);
        info!(driver_id, booking_id, response = decision.wire_value(), "Responding to booking");

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "driver_id": driver_id,
                "booking_id": booking_id,
                "response": decision.wire_value(),
            }))
            .send()
            .await?;
        Self::check(response, "respond-booking").await
    }

    /// Mark a ride complete and release the driver.
    pub async fn complete_ride(&self, driver_id: i64, booking_id: i64) -> Result<()> {
        let url = format!("{}/api/driver/complete-ride", self.booking_base);
        info!(driver_id, booking_id, "Completing ride");

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "driver_id": driver_id,
                "booking_id": booking_id,
            }))
            .send()
            .await?;
        Self::check(response, "complete-ride").await
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ApiStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(Error::from)
    }

    async fn check(response: reqwest::Response, endpoint: &str) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ApiStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
