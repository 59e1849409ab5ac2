//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the transport agent.

use clap::{Parser, Subcommand};

use crate::protocol::Coordinate;

/// Transport Agent - ride-hailing driver and rider client
///
/// Drives the platform's real-time endpoints from the terminal: receive
/// dispatch assignments and stream GPS positions as a driver, or quote
/// fares, book rides and follow them live as a rider.
#[derive(Parser, Debug)]
#[command(name = "transport-agent")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the agent
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the driver loop (waits for assignments and streams positions)
    Drive {
        /// Path to configuration file
        #[arg(short, long, env = "TRANSPORT_CONFIG")]
        config: Option<String>,

        /// Accept every assignment without prompting
        #[arg(long)]
        auto_accept: bool,
    },

    /// Quote the fare for a trip
    Fare {
        /// Pickup point as "lat,lng"
        #[arg(value_parser = parse_coordinate)]
        pickup: Coordinate,

        /// Dropoff point as "lat,lng"
        #[arg(value_parser = parse_coordinate)]
        dropoff: Coordinate,

        /// Path to configuration file
        #[arg(short, long, env = "TRANSPORT_CONFIG")]
        config: Option<String>,
    },

    /// Book a transport (quotes the fare first)
    Book {
        /// Pickup point as "lat,lng"
        #[arg(value_parser = parse_coordinate)]
        pickup: Coordinate,

        /// Dropoff point as "lat,lng"
        #[arg(value_parser = parse_coordinate)]
        dropoff: Coordinate,

        /// Path to configuration file
        #[arg(short, long, env = "TRANSPORT_CONFIG")]
        config: Option<String>,
    },

    /// List this rider's bookings
    Bookings {
        /// Path to configuration file
        #[arg(short, long, env = "TRANSPORT_CONFIG")]
        config: Option<String>,
    },

    /// Follow a ride live until it ends
    Track {
        /// Booking to track
        booking_id: i64,

        /// Path to configuration file
        #[arg(short, long, env = "TRANSPORT_CONFIG")]
        config: Option<String>,
    },

    /// Mark a ride complete as the driver
    Complete {
        /// Booking to complete
        booking_id: i64,

        /// Path to configuration file
        #[arg(short, long, env = "TRANSPORT_CONFIG")]
        config: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

/// Parse a "lat,lng" argument into a coordinate
fn parse_coordinate(s: &str) -> Result<Coordinate, String> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,lng\", got '{}'", s))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude '{}'", lat))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude '{}'", lng))?;
    Coordinate::new(lat, lng).map_err(|e| e.to_string())
}
