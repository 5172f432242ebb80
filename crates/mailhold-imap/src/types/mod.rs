//! Core IMAP types.

mod flags;
mod sequence;

pub use flags::{PERMANENT_FLAGS, flag_list, parse_store_flag};
pub use sequence::UidSet;
