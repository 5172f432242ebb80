//! # mailhold-core
//!
//! Storage, identity and delivery for the `mailhold` mail server.
//!
//! ## Features
//!
//! - **Mail store** - `SQLite` tables for users, mailboxes, messages and
//!   attachments, with per-mailbox UID counters and quota accounting
//! - **Identity verification** - argon2 password hashes, account status and
//!   lockout after repeated failures
//! - **Delivery pipeline** - per-recipient inbox resolution, quota checks and
//!   atomic UID allocation
//! - **Connection runtime** - accept loop with a connection limit and
//!   graceful shutdown
//! - **Configuration** - TOML with defaults for every field
//!
//! ## Modules
//!
//! - [`store`] - [`MailStore`] and its row types
//! - [`directory`] - [`Directory`], the identity verifier
//! - [`delivery`] - [`DeliveryPipeline`]
//! - [`net`] - [`serve`](net::serve) and [`Shutdown`]
//! - [`config`] - [`Config`]
//!
//! ## Example
//!
//! ```no_run
//! use mailhold_core::{DeliveryPipeline, DeliveryPolicy, Directory, MailStore};
//!
//! # async fn example() -> mailhold_core::Result<()> {
//! let store = MailStore::new("/var/lib/mailhold/mailhold.db").await?;
//! let directory = Directory::new(store.clone());
//! let pipeline = DeliveryPipeline::new(store, directory, DeliveryPolicy::default());
//! assert!(!pipeline.accepts_domain("example.com"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod delivery;
pub mod directory;
mod error;
pub mod net;
pub mod store;

pub use config::Config;
pub use delivery::{
    Delivered, DeliveryPipeline, DeliveryPolicy, DeliveryReport, SkipReason, Skipped,
};
pub use directory::{AuthFailure, AuthOutcome, Directory, Identity, NewUser};
pub use error::{Error, Result};
pub use net::{ServeOptions, Shutdown, ShutdownTrigger};
pub use store::{
    Email, EmailId, FlagUpdate, MailStore, Mailbox, MailboxId, MailboxKind, MessageFlag,
    MessageFlags, StoredAttachment, User, UserId, UserStatus,
};
