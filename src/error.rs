//! Error types for the transport agent
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 302,

    // Protocol errors (4xx)
    MalformedAssignment = 400,
    MalformedSample = 401,
    ProtocolUnexpected = 402,

    // Position source errors (5xx)
    PositionUnavailable = 500,

    // API errors (6xx)
    ApiRequest = 600,
    ApiStatus = 601,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Connection errors
            400..=499 => 40, // Protocol errors
            500..=599 => 50, // Position errors
            600..=699 => 60, // API errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Connection failed
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Connection timeout
    #[error("Connection to {url} timed out after {timeout_secs}s")]
    ConnectionTimeout { url: String, timeout_secs: u64 },

    /// Connection lost mid-session
    #[error("Lost connection: {message}")]
    ConnectionLost { message: String },

    /// Generic connection error
    #[error("Connection error: {0}")]
    Connection(String),

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// An inbound frame failed to parse as a booking assignment
    #[error("Malformed booking assignment: {message}")]
    MalformedAssignment { message: String },

    /// An inbound event failed to parse as a location sample
    #[error("Malformed location sample: {message}")]
    MalformedSample { message: String },

    /// Generic protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ─────────────────────────────────────────────────────────────
    // Position Source Errors
    // ─────────────────────────────────────────────────────────────

    /// The position source failed or timed out before producing a fix
    #[error("Position unavailable: {message}")]
    PositionUnavailable { message: String },

    // ─────────────────────────────────────────────────────────────
    // API Errors
    // ─────────────────────────────────────────────────────────────

    /// HTTP request to the booking/fare API failed
    #[error("API request failed: {0}")]
    ApiRequest(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API returned {status} for {endpoint}: {body}")]
    ApiStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::WebSocket(_) => ErrorCode::ConnectionFailed,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::Connection(_) => ErrorCode::ConnectionFailed,

            Error::MalformedAssignment { .. } => ErrorCode::MalformedAssignment,
            Error::MalformedSample { .. } => ErrorCode::MalformedSample,
            Error::Protocol(_) => ErrorCode::ProtocolUnexpected,

            Error::PositionUnavailable { .. } => ErrorCode::PositionUnavailable,

            Error::ApiRequest(_) => ErrorCode::ApiRequest,
            Error::ApiStatus { .. } => ErrorCode::ApiStatus,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ConnectionLost { .. }
                | Error::Connection(_)
                | Error::WebSocket(_)
                | Error::ApiRequest(_)
                | Error::Io(_)
        )
    }

    /// Check if the error is fatal (agent should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Internal(_))
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some(
                "Run 'transport-agent config validate' to see details, or 'transport-agent config init' to start fresh."
            ),
            Error::ConnectionFailed { .. } => Some(
                "Check your network connection and verify the endpoint URLs in the configuration."
            ),
            Error::ConnectionTimeout { .. } => Some(
                "The service may be down or unreachable. Check your firewall settings."
            ),
            Error::ConnectionLost { .. } => Some(
                "The connection was interrupted. The drive loop will retry with backoff."
            ),
            Error::PositionUnavailable { .. } => Some(
                "No position fix was obtained in time. Check the position source or raise first_fix_timeout_ms."
            ),
            Error::ApiStatus { .. } => Some(
                "The booking API rejected the request. Verify the booking id and your session identity."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", code.as_str(), self);

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a connection failed error
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a connection timeout error
    pub fn connection_timeout(url: impl Into<String>, timeout_secs: u64) -> Self {
        Error::ConnectionTimeout {
            url: url.into(),
            timeout_secs,
        }
    }

    /// Create a malformed assignment error
    pub fn malformed_assignment(message: impl Into<String>) -> Self {
        Error::MalformedAssignment {
            message: message.into(),
        }
    }

    /// Create a malformed sample error
    pub fn malformed_sample(message: impl Into<String>) -> Self {
        Error::MalformedSample {
            message: message.into(),
        }
    }

    /// Create a position unavailable error
    pub fn position_unavailable(message: impl Into<String>) -> Self {
        Error::PositionUnavailable {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
