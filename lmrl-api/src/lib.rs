pub mod builders;
pub mod error;
pub mod http;
pub mod session;

pub use error::ProtocolError;
pub use session::{Protocol, ProtocolState, Session};
