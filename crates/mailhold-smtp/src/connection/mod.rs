//! Connection handling: the buffered stream and the session state machine.

mod session;
mod stream;

pub use session::{SmtpServer, SmtpSettings};
pub use stream::{DataBody, MAX_LINE, SmtpStream};
