//! Registry module for Docker registry interactions
//!
//! This module provides authentication, transport and client logic for
//! reading from a Docker Registry HTTP API v2 endpoint.

pub mod auth;
pub mod client;
pub mod models;
pub mod token_manager;
pub mod transport;

pub use auth::{AuthChallenge, AuthScheme, BearerToken};
pub use client::RegistryClient;
pub use models::{RepositoryInfo, TagInfo};
pub use token_manager::{AuthManager, AuthMode};
pub use transport::{HttpBackend, HttpRequest, HttpResponse, ReqwestBackend, RetryingTransport, TransportFault};
