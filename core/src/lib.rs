//! Synchronous client for a push-notification provider's HTTP API.
//!
//! # Overview
//! `PushClient` exposes one method per remote operation: device-token and
//! APID registration, tag management, push/batch/broadcast delivery and
//! feedback polling. Each call performs a single blocking HTTP request.
//!
//! # Design
//! - Request construction (`build_*`) is pure and separate from execution, so
//!   URLs, headers and bodies are testable without a network.
//! - Responses go through `classify`: JSON decoding, then status mapping to
//!   `ApiError`. Non-2xx responses always surface as errors; accessor
//!   operations alone turn 404 into `None`.
//! - The network sits behind the `Transport` trait. `UreqTransport` builds its
//!   agent once, on first use.
//!
//! ```no_run
//! use push_core::PushClient;
//! use serde_json::json;
//!
//! let client = PushClient::new("app-key", "app-master-secret")?;
//! client.register_device_token("FE66489F304DC75B8D6E8200DFF8A456", Some(&json!({"alias": "user-1"})))?;
//! client.push(&json!({
//!     "device_tokens": ["FE66489F304DC75B8D6E8200DFF8A456"],
//!     "aps": {"alert": "Hello"},
//! }))?;
//! # Ok::<(), push_core::ApiError>(())
//! ```

pub mod classify;
pub mod client;
pub mod error;
pub mod http;
pub mod transport;
pub mod types;

pub use client::PushClient;
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use transport::{Transport, TransportConfig, UreqTransport, DEFAULT_BASE_URL};
pub use types::{ApiResponse, Body, Credentials};
