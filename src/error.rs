//! Error types for the EtherNet/IP client.
//!
//! Errors fall into two families with different consequences for the
//! session:
//!
//! - **Fatal** — transport and framing failures ([`EtherNetIpError::Io`],
//!   [`EtherNetIpError::Timeout`], [`EtherNetIpError::Closed`],
//!   [`EtherNetIpError::Frame`]). The session moves to `Closed` and the
//!   caller must reconnect.
//! - **Recoverable** — CIP status, decode, coercion and tag-path failures.
//!   The call fails but the session stays open; only the request counters
//!   have advanced.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, EtherNetIpError>;

/// Errors produced by the EtherNet/IP client.
#[derive(Error, Debug)]
pub enum EtherNetIpError {
    /// Socket-level failure: connect, write or read error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply within the per-request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The transport is no longer connected (idle close or prior fatal error).
    #[error("connection closed")]
    Closed,

    /// Reply shorter than the minimum expected header, or a malformed
    /// length field.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Non-zero CIP general status in a reply.
    #[error("CIP error 0x{status:02X}: {message}")]
    Cip {
        /// CIP general status byte.
        status: u8,
        /// Human-readable reason from the general-status table.
        message: &'static str,
    },

    /// Reply payload inconsistent with its declared CIP type.
    #[error("decode error: {0}")]
    Decode(String),

    /// Supplied value is not losslessly representable in the target type.
    #[error("cannot coerce value: {0}")]
    Coercion(String),

    /// Malformed tag expression.
    #[error("invalid tag '{tag}': {reason}")]
    Tag {
        /// The offending tag expression.
        tag: String,
        /// Why it was rejected.
        reason: String,
    },

    /// String value exceeds the Logix STRING capacity.
    #[error("string too long: {actual_length} bytes (maximum {max_length})")]
    StringTooLong {
        /// Maximum accepted length.
        max_length: usize,
        /// Length of the supplied value.
        actual_length: usize,
    },

    /// Operation attempted while the session is not open.
    #[error("session error: {0}")]
    Session(String),
}

impl EtherNetIpError {
    /// Whether this error ends the session. Fatal errors close the
    /// transport; the caller must reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EtherNetIpError::Io(_)
                | EtherNetIpError::Timeout(_)
                | EtherNetIpError::Closed
                | EtherNetIpError::Frame(_)
        )
    }
}

/// Returns the human-readable reason for a CIP general status code.
///
/// Status `0x06` ("Partial transfer") never surfaces through
/// [`EtherNetIpError::Cip`] during normal operation: it signals that more
/// data follows and drives tag-list continuation instead of failing the
/// call.
pub fn cip_status_text(status: u8) -> &'static str {
    match status {
        0x00 => "Success",
        0x01 => "Connection failure",
        0x02 => "Resource unavailable",
        0x03 => "Invalid parameter value",
        0x04 => "Path segment error",
        0x05 => "Path destination unknown",
        0x06 => "Partial transfer",
        0x07 => "Connection lost",
        0x08 => "Service not supported",
        0x09 => "Invalid attribute value",
        0x0A => "Attribute list error",
        0x0B => "Already in requested mode/state",
        0x0C => "Object state conflict",
        0x0D => "Object already exists",
        0x0E => "Attribute not settable",
        0x0F => "Privilege violation",
        0x10 => "Device state conflict",
        0x11 => "Reply data too large",
        0x12 => "Fragmentation of a primitive value",
        0x13 => "Not enough data",
        0x14 => "Attribute not supported",
        0x15 => "Too much data",
        0x16 => "Object does not exist",
        0x17 => "Service fragmentation sequence not in progress",
        0x18 => "No stored attribute data",
        0x19 => "Store operation failure",
        0x1A => "Routing failure, request packet too large",
        0x1B => "Routing failure, response packet too large",
        0x1C => "Missing attribute list entry data",
        0x1D => "Invalid attribute value list",
        0x1E => "Embedded service error",
        0x1F => "Vendor specific error",
        0x20 => "Invalid parameter",
        0x21 => "Write-once value or medium already written",
        0x22 => "Invalid reply received",
        0x23 => "Buffer overflow",
        0x24 => "Invalid message format",
        0x25 => "Key failure in path",
        0x26 => "Path size invalid",
        0x27 => "Unexpected attribute in list",
        0x28 => "Invalid member ID",
        0x29 => "Member not settable",
        0x2A => "Group 2 only server general failure",
        0x2B => "Unknown Modbus error",
        0x2C => "Attribute not gettable",
        _ => "Unknown CIP error",
    }
}

/// Convenience constructor for a CIP status error.
pub(crate) fn cip_error(status: u8) -> EtherNetIpError {
    EtherNetIpError::Cip {
        status,
        message: cip_status_text(status),
    }
}
