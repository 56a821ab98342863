//! Chrome DevTools Protocol core
//!
//! Wire framing, message/response correlation, and the polling wait
//! primitives the rest of the crate is built on.

pub mod connection;
pub mod message;
pub mod reader;
pub mod response;
pub mod transport;

pub use connection::{Connection, ConnectionConfig, EventKind, DEFAULT_COMMAND_TIMEOUT};
pub use message::{IdAllocator, Message};
pub use reader::{ResponseReader, SessionResponseReader};
pub use response::Response;
pub use transport::{launch_chrome, MockTransport, SocketTransport, WebSocketTransport};
