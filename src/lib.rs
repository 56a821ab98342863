//! # Remora
//!
//! Minimal Chrome DevTools Protocol client over WebSocket.
//!
//! Remora drives a Chromium process through its DevTools endpoint: launch or
//! attach, open targets, issue commands, consume asynchronous protocol
//! events. The core is the correlation layer — unique message ids over a
//! shared duplex channel, per-target session envelopes, and a bounded
//! polling wait that turns the event-driven wire into a call/response API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use remora::{Browser, BrowserConfig};
//!
//! #[tokio::main]
//! async fn main() -> remora::Result<()> {
//!     let browser = Browser::launch(BrowserConfig::new("/usr/bin/google-chrome")).await?;
//!
//!     let target = browser.open("https://example.com").await?;
//!     let session = target.session()?;
//!
//!     let title = session.evaluate("document.title").await?;
//!     println!("title: {title}");
//!
//!     let png = session.capture_screenshot(Some("png"), None).await?;
//!     std::fs::write("screenshot.png", png)?;
//!
//!     browser.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Working at the protocol level
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use remora::{Connection, EventKind, WebSocketTransport};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> remora::Result<()> {
//! let transport = Arc::new(WebSocketTransport::new("ws://127.0.0.1:9222/devtools/browser/x")?);
//! let connection = Connection::new(transport);
//! connection.connect().await;
//!
//! connection
//!     .on(EventKind::TargetCreated, |params| {
//!         println!("new target: {params}");
//!     })
//!     .await;
//!
//! let msg = connection.message("Target.getTargets", json!({}));
//! let reply = connection.send_message_sync(&msg, None).await?;
//! assert!(reply.is_successful());
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod cdp;
pub mod error;
pub mod session;
pub mod target;

// Re-exports
pub use browser::Browser;
pub use cdp::{
    Connection, ConnectionConfig, EventKind, IdAllocator, Message, MockTransport, Response,
    ResponseReader, SessionResponseReader, SocketTransport, WebSocketTransport,
    DEFAULT_COMMAND_TIMEOUT,
};
pub use error::{Error, Result};
pub use session::Session;
pub use target::{Target, TargetInfo};

use std::path::PathBuf;

/// Launch configuration for [`Browser::launch`].
///
/// The binary path is explicit; remora does not auto-detect installations.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Path to the Chrome/Chromium binary
    pub chrome_path: PathBuf,
    /// Headless mode
    pub headless: bool,
    /// Viewport width
    pub window_width: u32,
    /// Viewport height
    pub window_height: u32,
    /// Extra command-line flags appended verbatim
    pub extra_args: Vec<String>,
    /// Protocol connection tuning
    pub connection: ConnectionConfig,
}

impl BrowserConfig {
    /// Config with sensible defaults for a given binary
    pub fn new(chrome_path: impl Into<PathBuf>) -> Self {
        Self {
            chrome_path: chrome_path.into(),
            headless: true,
            window_width: 1920,
            window_height: 1080,
            extra_args: Vec::new(),
            connection: ConnectionConfig::default(),
        }
    }

    /// Visible (non-headless) variant
    pub fn visible(chrome_path: impl Into<PathBuf>) -> Self {
        Self {
            headless: false,
            ..Self::new(chrome_path)
        }
    }
}
