//! Position sources
//!
//! Where the driver's GPS fixes come from. The agent has no real GPS
//! hardware, so the default source walks a simulated route; the trait
//! seam keeps a real receiver pluggable.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::protocol::Coordinate;

/// A stream of position fixes.
///
/// `next_position` may wait for a fix to become available. `None` means
/// the source is exhausted and will never produce another fix.
#[async_trait]
pub trait PositionSource: Send {
    async fn next_position(&mut self) -> Option<Coordinate>;
}

/// A straight-line simulated route, advancing a fixed step per fix.
///
/// Mirrors the dispatcher's own simulation: start at the pickup and
/// drift north-east by 0.0001 degrees per sample.
#[derive(Debug, Clone)]
pub struct SimulatedRoute {
    current: Coordinate,
    step: f64,
    remaining: Option<u64>,
}

impl SimulatedRoute {
    pub const DEFAULT_STEP: f64 = 0.0001;

    pub fn new(start: Coordinate) -> Self {
        Self {
            current: start,
            step: Self::DEFAULT_STEP,
            remaining: None,
        }
    }

    /// Limit the route to a fixed number of fixes.
    pub fn with_limit(mut self, fixes: u64) -> Self {
        self.remaining = Some(fixes);
        self
    }
}

#[async_trait]
impl PositionSource for SimulatedRoute {
    async fn next_position(&mut self) -> Option<Coordinate> {
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let fix = self.current;
        self.current = Coordinate {
            lat: self.current.lat + self.step,
            lng: self.current.lng + self.step,
        };
        Some(fix)
    }
}

/// A source that reports the same position forever.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition(pub Coordinate);

#[async_trait]
impl PositionSource for FixedPosition {
    async fn next_position(&mut self) -> Option<Coordinate> {
        Some(self.0)
    }
}

/// Wait for the first fix from a source, bounded by `timeout`.
pub async fn first_fix(
    source: &mut dyn PositionSource,
    timeout: Duration,
) -> Result<Coordinate> {
    match tokio::time::timeout(timeout, source.next_position()).await {
        Ok(Some(fix)) => Ok(fix),
        Ok(None) => Err(Error::position_unavailable("position source exhausted")),
        Err(_) => Err(Error::position_unavailable(format!(
            "no fix within {}s",
            timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_route_advances() {
        let mut route = SimulatedRoute::new(Coordinate::new(19.076, 72.8777).unwrap());

        let first = route.next_position().await.unwrap();
        let second = route.next_position().await.unwrap();

        assert_eq!(first, Coordinate { lat: 19.076, lng: 72.8777 });
        assert!((second.lat - 19.0761).abs() < 1e-9);
        assert!((second.lng - 72.8778).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_simulated_route_limit() {
        let mut route =
            SimulatedRoute::new(Coordinate::new(0.0, 0.0).unwrap()).with_limit(2);

        assert!(route.next_position().await.is_some());
        assert!(route.next_position().await.is_some());
        assert!(route.next_position().await.is_none());
        assert!(route.next_position().await.is_none());
    }

    #[tokio::test]
    async fn test_first_fix_from_fixed_source() {
        let mut source = FixedPosition(Coordinate::new(1.0, 2.0).unwrap());
        let fix = first_fix(&mut source, Duration::from_secs(1)).await.unwrap();
        assert_eq!(fix, Coordinate { lat: 1.0, lng: 2.0 });
    }

    #[tokio::test]
    async fn test_first_fix_exhausted_source() {
        let mut source =
            SimulatedRoute::new(Coordinate::new(0.0, 0.0).unwrap()).with_limit(0);
        let err = first_fix(&mut source, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::PositionUnavailable { .. }));
    }

    struct NeverFix;

    #[async_trait]
    impl PositionSource for NeverFix {
        async fn next_position(&mut self) -> Option<Coordinate> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_first_fix_times_out() {
        let mut source = NeverFix;
        let err = first_fix(&mut source, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PositionUnavailable { .. }));
    }
}
