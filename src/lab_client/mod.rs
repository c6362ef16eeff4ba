//! Client for the lab controller REST API.
//!
//! A [`LabClient`] is the unit the connection pool hands out: one per
//! `(server URL, TLS verification)` pair, shared by every request that
//! targets the same controller.

mod client;
mod error;

pub use client::{Credentials, LabClient, DEFAULT_API_TIMEOUT};
pub use error::LabClientError;
