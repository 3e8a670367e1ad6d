//! # Nutrition Edge Core
//!
//! Core types shared by every crate of the nutrition edge pipeline.
//!
//! - [`EdgeError`] / [`ErrorKind`] - The closed set of failures a stage can produce
//! - [`RequestId`] - Opaque per-request correlation identifier
//! - [`CallerIdentity`] / [`Claims`] - Who is calling, as established by the auth stage
//! - [`SecurityEvent`] / [`Severity`] - Records emitted by the validator and auth stages

#![doc(html_root_url = "https://docs.rs/nutrition-edge-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod identity;
mod security;

pub use context::RequestId;
pub use error::{EdgeError, EdgeResult, ErrorBody, ErrorKind};
pub use identity::{CallerIdentity, Claims, RefreshClaims};
pub use security::{SecurityEvent, Severity};
