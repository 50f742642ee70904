//! Statement-processing backend: interface, HTTP client and session.

/// Operations the workflow consumes.
pub mod api;
/// Login session and bearer token provider.
pub mod auth;
/// reqwest client.
pub mod client;
/// Scripted backend for tests.
#[cfg(test)]
pub mod testing;
/// Token persistence.
pub mod token_store;
