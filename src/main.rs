//! Transport Agent - ride-hailing driver and rider client
//!
//! This is the main entry point for the transport-agent binary.
//! As a driver it holds the assignment socket open, accepts dispatch
//! offers and streams GPS positions over the location socket. As a
//! rider it quotes fares, books rides and follows them live over the
//! tracking stream.

mod api;
mod cli;
mod config;
mod error;
mod identity;
mod logging;
mod position;
mod protocol;
mod realtime;
mod version;

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use clap::Parser;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::cli::{Cli, Commands};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::identity::{IdentityStore, Role};
use crate::logging::LogGuards;
use crate::position::SimulatedRoute;
use crate::protocol::{BookingAssignment, Coordinate, DriverDecision};
use crate::realtime::{
    AssignmentEvent, AssignmentListener, ConnectionEvent, Connector, ConnectorConfig, Endpoint,
    LocationPublisher, SessionState, TrackSubscriber, TrackUpdate,
};

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    // For commands that don't need full logging, use simple setup
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            // Config commands use minimal logging
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Drive { config, .. }
        | Commands::Fare { config, .. }
        | Commands::Book { config, .. }
        | Commands::Bookings { config }
        | Commands::Track { config, .. }
        | Commands::Complete { config, .. } => config.clone(),
        _ => None,
    };

    // Load config (or use defaults)
    let config = match AgentConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Use formatted error for terminal
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Initialize logging with config settings
    // The guards must be kept alive for the lifetime of the program
    let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;

    // Log version info at startup
    let build = version::build_info();
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        host = %host,
        "Starting transport agent"
    );

    // Build and run the tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().min(4))
        .thread_name("transport-agent")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    let result = match cli.command {
        Commands::Drive { auto_accept, .. } => runtime.block_on(run_drive(config, auto_accept)),
        Commands::Fare { pickup, dropoff, .. } => {
            runtime.block_on(run_fare(config, pickup, dropoff))
        }
        Commands::Book { pickup, dropoff, .. } => {
            runtime.block_on(run_book(config, pickup, dropoff))
        }
        Commands::Bookings { .. } => runtime.block_on(run_bookings(config)),
        Commands::Track { booking_id, .. } => runtime.block_on(run_track(config, booking_id)),
        Commands::Complete { booking_id, .. } => {
            runtime.block_on(run_complete(config, booking_id))
        }
        Commands::Version | Commands::Config { .. } => unreachable!(),
    };

    if let Err(e) = result {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }

    Ok(())
}

/// Initialize logging from configuration
fn init_logging_from_config(config: &AgentConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    logging::init_logging(&config.logging, verbose, quiet)
}

fn connector_from_config(config: &AgentConfig) -> Connector {
    Connector::new(ConnectorConfig {
        connect_timeout: Duration::from_millis(config.endpoints.connect_timeout_ms),
        ..Default::default()
    })
}

fn api_from_config(config: &AgentConfig) -> Result<ApiClient> {
    ApiClient::new(
        config.endpoints.fare_api_url.clone(),
        config.endpoints.booking_api_url.clone(),
    )
}

/// The driver loop: hold the assignment socket open, handle offers,
/// reconnect with exponential backoff when the socket drops.
async fn run_drive(config: AgentConfig, auto_accept_flag: bool) -> Result<()> {
    let store = IdentityStore::new(&config.data_dir());
    let driver_id = store.load_or_create(Role::Driver)?;
    let auto_accept = auto_accept_flag || config.driver.auto_accept;

    info!(driver_id, auto_accept, "Driver loop starting");

    let connector = connector_from_config(&config);
    let api = api_from_config(&config)?;
    let listener = AssignmentListener::new(connector.clone());

    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(config.driver.reconnect_initial_delay_ms),
        max_interval: Duration::from_millis(config.driver.reconnect_max_delay_ms),
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut attempts: u32 = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (handle, mut events) =
            listener.listen(&config.endpoints.assignment_ws_url, driver_id)?;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    handle.stop();
                    return Ok(());
                }

                event = events.recv() => {
                    match event {
                        Some(AssignmentEvent::Opened) => {
                            // A live socket; reset the reconnect budget.
                            backoff.reset();
                            attempts = 0;
                        }
                        Some(AssignmentEvent::Assigned(assignment)) => {
                            if let Err(e) = handle_assignment(
                                &config, &connector, &api, driver_id, auto_accept, &assignment,
                            )
                            .await
                            {
                                error!(
                                    booking_id = assignment.booking_id,
                                    error = %e,
                                    "Ride handling failed"
                                );
                            }
                        }
                        Some(AssignmentEvent::ConnectionError(message)) => {
                            warn!(error = %message, "Assignment socket error");
                        }
                        Some(AssignmentEvent::Closed) | None => {
                            break;
                        }
                    }
                }
            }
        }

        handle.stop();
        attempts += 1;
        if config.driver.max_reconnect_attempts > 0
            && attempts >= config.driver.max_reconnect_attempts
        {
            return Err(Error::ConnectionLost {
                message: format!(
                    "assignment socket lost after {} reconnect attempts",
                    attempts
                ),
            });
        }

        let delay = backoff
            .next_backoff()
            .unwrap_or(Duration::from_millis(config.driver.reconnect_max_delay_ms));
        warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Reconnecting assignment socket");

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Respond to one dispatch offer, and drive the ride if accepted.
async fn handle_assignment(
    config: &AgentConfig,
    connector: &Connector,
    api: &ApiClient,
    driver_id: i64,
    auto_accept: bool,
    assignment: &BookingAssignment,
) -> Result<()> {
    println!(
        "Assignment: booking {} pickup {} dropoff {} fare {:.2}",
        assignment.booking_id,
        assignment.pickup_location,
        assignment.dropoff_location,
        assignment.fare_amount
    );

    let accepted = auto_accept || confirm_assignment().await;
    if !accepted {
        info!(booking_id = assignment.booking_id, "Rejecting assignment");
        return api
            .respond_booking(driver_id, assignment.booking_id, DriverDecision::Reject)
            .await;
    }

    api.respond_booking(driver_id, assignment.booking_id, DriverDecision::Accept)
        .await?;
    api.respond_booking(driver_id, assignment.booking_id, DriverDecision::Start)
        .await?;

    // Route starts at the pickup; require a first fix before opening the socket.
    let mut route = SimulatedRoute::new(assignment.pickup_location);
    let first = position::first_fix(
        &mut route,
        Duration::from_millis(config.driver.first_fix_timeout_ms),
    )
    .await?;
    debug!(position = %first, "First fix acquired");

    let endpoint = Endpoint::location(
        &config.endpoints.location_ws_url,
        driver_id,
        Some(assignment.booking_id),
    )?;
    let (handle, mut events) = connector.open(endpoint);

    // Wait for the socket to open before publishing.
    let opened = tokio::time::timeout(
        Duration::from_millis(config.endpoints.connect_timeout_ms * 2),
        async {
            while let Some(event) = events.recv().await {
                match event {
                    ConnectionEvent::Opened => return true,
                    ConnectionEvent::Error(message) => {
                        warn!(error = %message, "Location socket failed to open");
                        return false;
                    }
                    ConnectionEvent::Closed => return false,
                    _ => {}
                }
            }
            false
        },
    )
    .await
    .unwrap_or(false);

    if !opened {
        handle.close();
        return Err(Error::connection_failed(
            &config.endpoints.location_ws_url,
            "location socket did not open",
        ));
    }

    let publisher = LocationPublisher::new(Duration::from_millis(config.driver.publish_interval_ms));
    let pub_handle = publisher.start(Box::new(route), handle.sender());

    info!(
        booking_id = assignment.booking_id,
        duration_secs = config.driver.ride_duration_secs,
        "Ride started, streaming positions"
    );
    tokio::time::sleep(Duration::from_secs(config.driver.ride_duration_secs)).await;

    let stats = pub_handle.stop().await;
    handle.close();
    info!(
        booking_id = assignment.booking_id,
        sent = stats.sent,
        dropped = stats.dropped,
        "Ride finished"
    );

    api.complete_ride(driver_id, assignment.booking_id).await?;
    println!(
        "Ride {} completed ({} positions sent, {} dropped)",
        assignment.booking_id, stats.sent, stats.dropped
    );
    Ok(())
}

/// Ask on the terminal whether to take the offer.
async fn confirm_assignment() -> bool {
    tokio::task::spawn_blocking(|| {
        use std::io::{BufRead, Write};
        print!("Accept? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    })
    .await
    .unwrap_or(false)
}

/// Quote a fare for the rider.
async fn run_fare(config: AgentConfig, pickup: Coordinate, dropoff: Coordinate) -> Result<()> {
    let store = IdentityStore::new(&config.data_dir());
    let user_id = store.load_or_create(Role::User)?;

    let api = api_from_config(&config)?;
    let quote = api.get_fare(user_id, pickup, dropoff).await?;

    println!(
        "Fare: {:.2} ({:.2} km) from {} to {}",
        quote.fare_amount, quote.distance_km, pickup, dropoff
    );
    Ok(())
}

/// Quote and book a ride for the rider.
async fn run_book(config: AgentConfig, pickup: Coordinate, dropoff: Coordinate) -> Result<()> {
    let store = IdentityStore::new(&config.data_dir());
    let user_id = store.load_or_create(Role::User)?;

    let api = api_from_config(&config)?;
    let quote = api.get_fare(user_id, pickup, dropoff).await?;
    let receipt = api
        .book_transport(user_id, pickup, dropoff, quote.fare_amount)
        .await?;

    println!(
        "Booked ride {} for {:.2} ({})",
        receipt.booking_id, quote.fare_amount, receipt.status
    );
    println!("Track it with: transport-agent track {}", receipt.booking_id);
    Ok(())
}

/// List the rider's bookings.
async fn run_bookings(config: AgentConfig) -> Result<()> {
    let store = IdentityStore::new(&config.data_dir());
    let user_id = store.load_or_create(Role::User)?;

    let api = api_from_config(&config)?;
    let bookings = api.user_bookings(user_id).await?;

    if bookings.is_empty() {
        println!("No bookings for user {}.", user_id);
        return Ok(());
    }

    println!("{:<12} {:<24} {:<24} {:>10}  {}", "BOOKING", "PICKUP", "DROPOFF", "FARE", "STATUS");
    for booking in bookings {
        println!(
            "{:<12} {:<24} {:<24} {:>10.2}  {}",
            booking.booking_id,
            booking.pickup_location.to_string(),
            booking.dropoff_location.to_string(),
            booking.fare_amount,
            booking.status
        );
    }
    Ok(())
}

/// Follow a ride live until the stream ends.
async fn run_track(config: AgentConfig, booking_id: i64) -> Result<()> {
    let connector = connector_from_config(&config);
    let subscriber = TrackSubscriber::new(connector, config.endpoints.tracking_url.clone());
    let (session, mut updates) = subscriber.track(booking_id)?;

    println!("Tracking booking {}...", booking_id);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let final_state = loop {
        tokio::select! {
            _ = &mut shutdown => {
                subscriber.cancel_current();
                break SessionState::Cancelled;
            }
            update = updates.recv() => {
                match update {
                    Some(TrackUpdate::Position(sample)) => {
                        println!("  [{}] driver at {}", sample.seq, sample.position);
                    }
                    Some(TrackUpdate::Ended(state)) => break state,
                    None => break session.state(),
                }
            }
        }
    };

    println!(
        "Session over: {:?}, {} positions, last known {}",
        final_state,
        session.sample_count(),
        session
            .last_position()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );

    if final_state == SessionState::Errored {
        return Err(Error::ConnectionLost {
            message: format!("tracking stream for booking {} failed", booking_id),
        });
    }
    Ok(())
}

/// Mark a ride complete as the driver.
async fn run_complete(config: AgentConfig, booking_id: i64) -> Result<()> {
    let store = IdentityStore::new(&config.data_dir());
    let driver_id = store.load_or_create(Role::Driver)?;

    let api = api_from_config(&config)?;
    api.complete_ride(driver_id, booking_id).await?;

    println!("Ride {} marked complete.", booking_id);
    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = AgentConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            config::init_config(path.as_deref(), force)?;
        }
        ConfigSubcommand::Validate { config } => {
            let path = config.as_deref();
            match AgentConfig::load(path) {
                Ok(_) => {
                    println!("Configuration is valid.");
                }
                Err(e) => {
                    eprint!("{}", e.format_for_terminal());
                    std::process::exit(e.exit_code());
                }
            }
        }
    }

    Ok(())
}
