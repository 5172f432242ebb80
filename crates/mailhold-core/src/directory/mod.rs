//! Identity verification.
//!
//! Session machines only ever see an [`Identity`]; password hashes stay
//! inside this module.

mod model;
mod password;
mod verifier;

pub use model::{AuthFailure, AuthOutcome, Identity, NewUser};
pub use verifier::{Directory, LOCKOUT_MINUTES, MAX_FAILED_LOGINS};
