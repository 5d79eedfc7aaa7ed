//! NextGCore SCTP Transport Library
//!
//! This crate provides a Linux kernel SCTP client for N2 (NGAP over SCTP).
//!
//! # Requirements
//! - SCTP kernel module: `sudo modprobe sctp`
//! - Docker: use `38412:38412/sctp` port mapping
//!
//! Messages are sent with `sendmsg` carrying an `SCTP_SNDRCV` control message
//! so that the NGAP payload protocol identifier (60) reaches the wire.

use std::io;

use thiserror::Error;

pub mod kernel;

pub use kernel::{KernelSctpSocket, SctpRecv, SctpStream};

/// NGAP SCTP port
pub const NGAP_SCTP_PORT: u16 = 38412;

/// NGAP Payload Protocol Identifier (TS 38.412)
pub const NGAP_PPID: u32 = 60;

/// Default number of SCTP streams for NGAP
pub const DEFAULT_NUM_STREAMS: u16 = 2;

/// Default maximum message size (64KB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65536;

// ============================================================================
// Error types
// ============================================================================

/// SCTP-specific errors
#[derive(Error, Debug)]
pub enum SctpError {
    #[error("Socket creation failed: {0}")]
    SocketCreation(io::Error),

    #[error("Bind failed: {0}")]
    BindFailed(io::Error),

    #[error("Connect failed: {0}")]
    ConnectFailed(io::Error),

    #[error("Send failed: {0}")]
    SendFailed(io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(io::Error),

    #[error("Socket option failed: {0}")]
    SockoptFailed(io::Error),

    #[error("No valid address in list")]
    NoValidAddress,

    #[error("Association closed")]
    AssociationClosed,
}

pub type Result<T> = std::result::Result<T, SctpError>;
