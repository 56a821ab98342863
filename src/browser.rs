//! Browser launcher and facade
//!
//! Launches a Chromium binary, connects to its DevTools endpoint, and opens
//! targets. Everything here is built on the connection's sync-send path;
//! protocol-level error replies are escalated to [`Error::Cdp`].

use std::process::Child;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::cdp::{launch_chrome, Connection, Response, WebSocketTransport};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::target::{Target, TargetInfo};
use crate::BrowserConfig;

fn browser_args(config: &BrowserConfig) -> Vec<String> {
    let mut args = vec![
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-dev-shm-usage".into(),
        format!(
            "--window-size={},{}",
            config.window_width, config.window_height
        ),
    ];
    if config.headless {
        args.push("--headless=new".into());
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

fn expect_success(response: Response, method: &str) -> Result<Response> {
    if response.is_successful() {
        Ok(response)
    } else {
        Err(Error::cdp(
            method,
            response.error_code().unwrap_or(-1),
            response.error_message(false),
        ))
    }
}

/// A launched browser and its DevTools connection.
pub struct Browser {
    connection: Arc<Connection>,
    child: Mutex<Child>,
}

impl Browser {
    /// Launch a browser and connect to its DevTools endpoint
    pub async fn launch(config: BrowserConfig) -> Result<Self> {
        let args = browser_args(&config);
        tracing::info!("Launching browser from {:?}", config.chrome_path);
        let (child, ws_url) = launch_chrome(&config.chrome_path, &args)?;

        let transport = Arc::new(WebSocketTransport::new(&ws_url)?);
        let connection = Arc::new(Connection::with_config(transport, config.connection));

        if !connection.connect().await {
            let mut child = child;
            let _ = child.kill();
            return Err(Error::transport("WebSocket connect to DevTools failed"));
        }

        let browser = Self {
            connection,
            child: Mutex::new(child),
        };

        let version = browser.version().await?;
        tracing::info!("Connected to browser: {}", version);
        Ok(browser)
    }

    /// The shared connection
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The browser product string (`Browser.getVersion`)
    pub async fn version(&self) -> Result<String> {
        let msg = self.connection.message("Browser.getVersion", json!({}));
        let response = expect_success(
            self.connection.send_message_sync(&msg, None).await?,
            "Browser.getVersion",
        )?;
        Ok(response
            .result_field("product")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Create a target for `url`, attach to it, and return it with its
    /// session ready for page events.
    pub async fn open(&self, url: &str) -> Result<Target> {
        let create = self
            .connection
            .message("Target.createTarget", json!({ "url": url }));
        let response = expect_success(
            self.connection.send_message_sync(&create, None).await?,
            "Target.createTarget",
        )?;
        let target_id = response
            .result_field("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidResponse("createTarget reply carried no targetId".into()))?
            .to_string();

        let attach = self
            .connection
            .message("Target.attachToTarget", json!({ "targetId": target_id }));
        let response = expect_success(
            self.connection.send_message_sync(&attach, None).await?,
            "Target.attachToTarget",
        )?;
        let session_id = response
            .result_field("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidResponse("attachToTarget reply carried no sessionId".into())
            })?
            .to_string();

        let session = Session::new(Arc::clone(&self.connection), &target_id, session_id);
        session.page_enable().await?;

        let info = TargetInfo {
            target_id,
            kind: "page".into(),
            title: String::new(),
            url: url.into(),
        };
        Ok(Target::new(info, session))
    }

    /// List all targets the browser reports
    pub async fn targets(&self) -> Result<Vec<TargetInfo>> {
        let msg = self.connection.message("Target.getTargets", json!({}));
        let response = expect_success(
            self.connection.send_message_sync(&msg, None).await?,
            "Target.getTargets",
        )?;
        let infos = response
            .result_field("targetInfos")
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(infos)?)
    }

    /// Close a target by id; true iff the browser reports success
    pub async fn close_target(&self, target_id: &str) -> Result<bool> {
        let msg = self
            .connection
            .message("Target.closeTarget", json!({ "targetId": target_id }));
        let response = expect_success(
            self.connection.send_message_sync(&msg, None).await?,
            "Target.closeTarget",
        )?;
        Ok(response
            .result_field("success")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Close the browser: best-effort `Browser.close`, then disconnect and
    /// kill the child process.
    pub async fn close(self) -> Result<()> {
        let msg = self.connection.message("Browser.close", json!({}));
        let _ = self
            .connection
            .send_message_sync(&msg, Some(Duration::from_millis(500)))
            .await;
        self.connection.disconnect("browser close").await;

        let mut child = self.child.lock().await;
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // Best-effort kill if close() was never called.
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.kill();
        }
    }
}
