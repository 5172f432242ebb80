//! Connection handling: the buffered stream and the session state machine.

mod session;
mod stream;

pub use session::{Pop3Server, Pop3Settings};
pub use stream::{MAX_LINE, Pop3Stream, dot_stuff};
