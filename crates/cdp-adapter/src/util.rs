use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use serde::Deserialize;
use tokio::time::{timeout, Duration};

use crate::error::AdapterError;

/// Extract DevTools websocket URL from Chromium stderr output.
pub async fn extract_ws_url(child: &mut Child) -> Result<String, AdapterError> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AdapterError::io("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| AdapterError::io(err.to_string()))?;
            if let Some(ws) = parse_ws_line(&line) {
                return Ok(ws);
            }
            captured.push(line);
        }
        Err(AdapterError::io(format!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            captured
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        )))
    };

    timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| AdapterError::io("timed out waiting for chromium devtools websocket url"))?
}

fn parse_ws_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Turn a user supplied CDP endpoint into a browser websocket URL.
///
/// `ws://` URLs pass through; `http://host:port` endpoints are resolved via
/// `/json/version`.
pub async fn resolve_ws_url(cdp_url: &str) -> Result<String, AdapterError> {
    let parsed = url::Url::parse(cdp_url)
        .map_err(|err| AdapterError::io(format!("invalid cdp url {cdp_url}: {err}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(cdp_url.to_string()),
        "http" | "https" => {
            let endpoint = parsed
                .join("/json/version")
                .map_err(|err| AdapterError::io(err.to_string()))?;
            let info: VersionInfo = reqwest::get(endpoint.clone())
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(|err| AdapterError::io(format!("GET {endpoint}: {err}")))?
                .json()
                .await
                .map_err(|err| AdapterError::io(format!("decode {endpoint}: {err}")))?;
            Ok(info.web_socket_debugger_url)
        }
        other => Err(AdapterError::io(format!(
            "unsupported cdp url scheme {other:?}"
        ))),
    }
}
