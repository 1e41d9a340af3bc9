//! HR backend integration: HTTP client and bearer token lifecycle.

pub mod client;
pub mod token;

pub use client::{interpret_push_response, ApiClient, PersonnelRecord, PushOutcome, TokenResponse};
pub use token::{TokenManager, TokenStatus};
