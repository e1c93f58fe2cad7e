
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::pedantic)]

//! Streaming load-generation harness: a producer which repeatedly streams a fixed-size payload
//!   to a server, and a server which reassembles each streamed body before acknowledging it.

pub mod config;
pub mod error;
pub mod server;
pub mod transfer;
pub mod transfer_loop;
pub mod transport;
pub mod upload;
pub mod upload_store;

pub use crate::config::{ClientConfig, ServerConfig};
pub use crate::error::{ServerError, TransferError, UploadError};
pub use crate::transfer::TransferSession;
pub use crate::transfer_loop::{LoopReport, TransferLoop};
pub use crate::transport::{HttpTransport, Transport};
pub use crate::upload::{UploadSession, UploadState, UploadSummary};
pub use crate::upload_store::{ConnectionKey, ConnectionRegistry};
