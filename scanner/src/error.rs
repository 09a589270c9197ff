//! Error types for the scanner.

use endpoint_scanner_ping::{KeyError, PingError};
use std::error::Error;
use std::fmt;

/// Errors that stop a scan from starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerError {
    /// Both IPv4 and IPv6 are disabled, nothing can be scanned.
    NoAddressFamily,
    /// The configured CIDR list is empty.
    EmptyCidrList,
    /// None of the configured prefixes belongs to an enabled address family.
    NoUsablePrefix,
    /// The result store must be able to hold at least one endpoint.
    ZeroQueueSize,
    /// At least one worker is needed to make progress.
    ZeroConcurrency,
    /// A scan started by this scanner is still running.
    AlreadyRunning,
    /// Scanning was started outside of a tokio runtime.
    NoRuntime,
}

impl fmt::Display for ScannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScannerError::NoAddressFamily => {
                write!(f, "Both IPv4 and IPv6 are disabled, nothing to scan")
            }
            ScannerError::EmptyCidrList => write!(f, "No CIDR prefixes configured"),
            ScannerError::NoUsablePrefix => {
                write!(f, "No configured prefix belongs to an enabled address family")
            }
            ScannerError::ZeroQueueSize => write!(f, "Queue size must be at least 1"),
            ScannerError::ZeroConcurrency => write!(f, "Concurrency must be at least 1"),
            ScannerError::AlreadyRunning => write!(f, "Scanner is already running"),
            ScannerError::NoRuntime => write!(f, "Scanner must be started within a tokio runtime"),
        }
    }
}

impl Error for ScannerError {}

/// Errors that can occur during scanner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerBuilderError {
    /// A key is not a base64 encoded 32 byte value.
    InvalidKey(KeyError),
    /// A CIDR prefix could not be parsed.
    InvalidCidr(String),
}

impl fmt::Display for ScannerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScannerBuilderError::InvalidKey(err) => write!(f, "Invalid key: {err}"),
            ScannerBuilderError::InvalidCidr(cidr) => write!(f, "Invalid CIDR prefix: {cidr}"),
        }
    }
}

impl Error for ScannerBuilderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ScannerBuilderError::InvalidKey(err) => Some(err),
            ScannerBuilderError::InvalidCidr(_) => None,
        }
    }
}

impl From<KeyError> for ScannerBuilderError {
    fn from(err: KeyError) -> Self {
        ScannerBuilderError::InvalidKey(err)
    }
}

/// Why a single probe produced no round-trip time.
///
/// Probe errors never leave the engine, they only decide what gets logged.
#[derive(Debug)]
pub enum ProbeError {
    /// The probe deadline elapsed.
    TimedOut,
    /// The scan was cancelled while the probe was in flight.
    Cancelled,
    /// The endpoint rejected the probe or answered with garbage.
    Unreachable(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::TimedOut => write!(f, "Probe timed out"),
            ProbeError::Cancelled => write!(f, "Probe cancelled"),
            ProbeError::Unreachable(err) => write!(f, "Endpoint unreachable: {err}"),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Unreachable(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<PingError> for ProbeError {
    fn from(err: PingError) -> Self {
        match err {
            PingError::TimedOut => ProbeError::TimedOut,
            other => ProbeError::Unreachable(Box::new(other)),
        }
    }
}
