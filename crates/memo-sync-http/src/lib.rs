//! memo-sync-http: reqwest-based sync transport for memo-sync.
//!
//! Talks to a server exposing `GET/POST/PUT /notes` plus the `/auth`
//! register, login, logout and me endpoints. Authentication is a bearer
//! token passed through as-is.

pub mod auth;
pub mod transport;

pub use auth::{login, logout, me, register, AuthSession, UserInfo};
pub use transport::{normalize_endpoint, HttpTransport};
