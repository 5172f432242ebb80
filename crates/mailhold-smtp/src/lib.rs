//! # mailhold-smtp
//!
//! Inbound SMTP (RFC 5321) for the `mailhold` server.
//!
//! ## Features
//!
//! - **Session machine**: greeting, EHLO/HELO, envelope sequencing, DATA with
//!   dot-unstuffing and a size limit
//! - **Authentication**: AUTH PLAIN and AUTH LOGIN against the directory
//! - **Delivery**: accepted messages go through the core delivery pipeline
//! - **Extensions advertised**: AUTH, SIZE, 8BITMIME, STARTTLS (TLS itself is
//!   not negotiated)
//! - **Pipelining rejection**: input sent ahead of a reply to EHLO, HELO,
//!   AUTH or DATA is discarded with a 503
//!
//! ## Session States
//!
//! ```text
//! Connected ── EHLO/HELO ──→ Greeted ── MAIL ──→ MailFrom ── RCPT ──→ RcptTo ── DATA ──→ Delivered
//!                                ↑                                                        │
//!                                └──────────────────── envelope reset ────────────────────┘
//! ```
//!
//! AUTH may happen at any point before MAIL.
//!
//! ## Modules
//!
//! - [`command`]: Command parsing
//! - [`connection`]: Stream and session handling
//! - [`parser`]: Path, parameter and SASL parsers
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::Command;
pub use connection::{SmtpServer, SmtpSettings};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode, ReversePath};
