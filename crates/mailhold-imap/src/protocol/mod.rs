//! Server-side protocol pieces that do no I/O.
//!
//! - [`ProtocolState`]: the RFC 3501 session states and what each one holds
//! - [`search`]: SEARCH evaluation over stored messages
//! - response formatting: LIST lines, FETCH responses, dates

mod response;
mod search;
mod state;

pub use response::{
    CAPABILITIES, FetchResponse, greeting_timestamp, internal_date, list_line, quote, split_header,
};
pub use search::search;
pub use state::{ProtocolState, SelectedState};
