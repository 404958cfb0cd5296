//! Client-generated identifiers.
//!
//! Records created offline are keyed by a temporary identifier until the
//! remote store assigns a permanent one. Temporary identifiers carry a
//! reserved prefix so they can never be mistaken for server identifiers,
//! and they embed a random UUID so they are never reused.

use uuid::Uuid;

/// Prefix reserved for client-generated identifiers.
pub const CLIENT_ID_PREFIX: &str = "local_";

/// Generates a fresh client identifier.
#[must_use]
pub fn new_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}{}", Uuid::new_v4().simple())
}

/// Returns true if `id` was generated on the client.
#[must_use]
pub fn is_client_id(id: &str) -> bool {
    id.starts_with(CLIENT_ID_PREFIX)
}
