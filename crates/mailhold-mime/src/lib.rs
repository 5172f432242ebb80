//! # mailhold-mime
//!
//! MIME parsing for messages arriving over SMTP.
//!
//! The parser is lenient. Structural problems such as a missing closing
//! boundary or undecodable base64 degrade to treating the content as a single
//! opaque part instead of rejecting the message.
//!
//! ## Features
//!
//! - **Header/body split**: at the first blank line, CRLF or bare LF
//! - **Multipart walking**: nested `multipart/*` trees flattened to leaf parts
//! - **Body extraction**: primary text and HTML bodies
//! - **Attachments**: filename, content type, disposition and Content-ID
//! - **Decoding**: Base64, Quoted-Printable, RFC 2047 encoded words
//! - **Address lists**: bare addresses out of `To`/`Cc`/`Bcc` headers
//!
//! ## Quick Start
//!
//! ```
//! use mailhold_mime::Message;
//!
//! let raw = b"From: Alice <alice@example.com>\r\n\
//!             To: bob@example.com\r\n\
//!             Subject: Hello\r\n\
//!             \r\n\
//!             Hi Bob!\r\n";
//!
//! let message = Message::parse(raw).unwrap();
//! assert_eq!(message.subject().as_deref(), Some("Hello"));
//! assert_eq!(message.text_body().as_deref(), Some("Hi Bob!\r\n"));
//! assert_eq!(message.to_addresses(), vec!["bob@example.com".to_string()]);
//! ```
//!
//! ## Modules
//!
//! - [`encoding`]: transfer and header decoding helpers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use address::parse_address_list;
pub use content_type::{ContentDisposition, ContentType};
pub use error::{Error, Result};
pub use header::{Headers, split_header};
pub use message::{Attachment, Message, Part, TransferEncoding};
