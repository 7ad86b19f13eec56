use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig as LaunchConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::BrowserConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::metrics;
use crate::util::{extract_ws_url, resolve_ws_url};

/// Where a command is routed: the browser endpoint or an attached page session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Raw DevTools command channel.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Bring the connection up; commands call this lazily as well.
    async fn start(&self) -> Result<(), AdapterError>;

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;

    /// Tear the connection down, killing a launched browser.
    async fn shutdown(&self) {}
}

type RuntimeFactory = Arc<
    dyn Fn(BrowserConfig) -> BoxFuture<'static, Result<Arc<RuntimeState>, AdapterError>>
        + Send
        + Sync,
>;

/// Chromium connection that launches (or attaches to) a browser on first use
/// and relaunches it if the connection dies.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: BrowserConfig,
    state: Arc<Mutex<Option<Arc<RuntimeState>>>>,
    factory: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: BrowserConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: BrowserConfig| {
            Box::pin(async move {
                let state = RuntimeState::start(cfg).await?;
                Ok(Arc::new(state))
            })
        });

        Self {
            cfg,
            state: Arc::new(Mutex::new(None)),
            factory,
        }
    }

    async fn runtime(&self) -> Result<Arc<RuntimeState>, AdapterError> {
        let mut guard = self.state.lock().await;

        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(rt.clone());
            }
            warn!(target: "cdp-transport", "chromium connection lost; reconnecting");
        }

        let runtime = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(runtime.clone());
        Ok(runtime)
    }

    #[cfg(test)]
    fn with_factory(cfg: BrowserConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(Mutex::new(None)),
            factory,
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let runtime = self.runtime().await?;
        let version = runtime
            .send_internal(
                CommandTarget::Browser,
                "Browser.getVersion",
                json!({}),
                Duration::from_millis(self.cfg.command_timeout_ms),
            )
            .await?;
        let product = version
            .get("product")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        info!(target: "cdp-transport", product, "browser ready");
        Ok(())
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let runtime = self.runtime().await?;
        metrics::record_command(method);
        let started = Instant::now();
        let result = runtime
            .send_internal(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.command_timeout_ms),
            )
            .await;
        match &result {
            Ok(_) => metrics::record_command_success(method, started.elapsed()),
            Err(err) => {
                metrics::record_command_failure(method);
                debug!(target: "cdp-transport", method, %err, "command failed");
            }
        }
        result
    }

    async fn shutdown(&self) {
        if let Some(runtime) = self.state.lock().await.take() {
            runtime.kill_child().await;
        }
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, AdapterError>>,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: BrowserConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.cdp_url.as_deref() {
            Some(url) => (None, resolve_ws_url(url).await?),
            None => {
                let launch = Self::launch_config(&cfg)?;
                Self::launch_browser(launch).await?
            }
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::io(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let heartbeat_alive = alive.clone();
        let heartbeat_tx = command_tx.clone();

        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "transport loop terminated with error");
            }
        });

        let heartbeat_task = Self::spawn_heartbeat(
            heartbeat_tx,
            heartbeat_alive,
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.command_timeout_ms),
        );

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn test_stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_task = tokio::spawn(futures::future::pending::<()>());

        (
            Arc::new(Self {
                command_tx,
                loop_task,
                heartbeat_task: None,
                child: Mutex::new(None),
                alive: alive.clone(),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| AdapterError::io(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::io("command response channel closed")),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("{method} timed out"))
                .retriable(true)),
        }
    }

    async fn kill_child(&self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
            }
        }
    }

    fn spawn_heartbeat(
        sender: mpsc::Sender<ControlMessage>,
        alive: Arc<AtomicBool>,
        interval_duration: Duration,
        deadline: Duration,
    ) -> Option<JoinHandle<()>> {
        if interval_duration.is_zero() {
            return None;
        }

        let response_deadline = deadline.min(Duration::from_secs(5));

        Some(tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            while alive.load(Ordering::Relaxed) {
                ticker.tick().await;

                let (resp_tx, resp_rx) = oneshot::channel();
                let message = ControlMessage {
                    target: CommandTarget::Browser,
                    method: "Browser.getVersion".to_string(),
                    params: json!({}),
                    responder: resp_tx,
                };

                if sender.send(message).await.is_err() {
                    debug!(target: "cdp-transport", "heartbeat send failed (channel closed)");
                    break;
                }

                match tokio::time::timeout(response_deadline, resp_rx).await {
                    Ok(Ok(Ok(_))) => {}
                    Ok(Ok(Err(err))) => {
                        warn!(target: "cdp-transport", ?err, "heartbeat command error");
                        alive.store(false, Ordering::Relaxed);
                        break;
                    }
                    Ok(Err(_)) => {
                        debug!(target: "cdp-transport", "heartbeat response channel closed");
                        break;
                    }
                    Err(_) => {
                        warn!(target: "cdp-transport", "heartbeat timed out");
                        alive.store(false, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }))
    }

    fn launch_config(cfg: &BrowserConfig) -> Result<LaunchConfig, AdapterError> {
        let mut builder = LaunchConfig::builder()
            .request_timeout(Duration::from_millis(cfg.command_timeout_ms))
            .launch_timeout(Duration::from_secs(20));

        if !cfg.headless {
            builder = builder.with_head();
        }

        if let Some(executable) = cfg.resolve_executable() {
            builder = builder.chrome_executable(executable);
        } else if let Some(path) = &cfg.chrome_instance_path {
            return Err(AdapterError::io(format!(
                "chrome executable not found at {}",
                path.display()
            ))
            .with_data(json!({
                "expected": path,
                "hint": "Set WEBPILOT_CHROME to the full path of chrome/chromium."
            })));
        }

        if let Some(dir) = &cfg.user_data_dir {
            fs::create_dir_all(dir).map_err(|err| {
                AdapterError::internal(format!("failed to ensure user-data-dir: {err}"))
            })?;
            builder = builder.user_data_dir(dir);
        }

        let viewport = &cfg.new_context_config.viewport;
        builder = builder
            .window_size(viewport.width, viewport.height)
            .args(cfg.launch_args());

        builder
            .build()
            .map_err(|err| AdapterError::internal(format!("browser config error: {err}")))
    }

    async fn launch_browser(config: LaunchConfig) -> Result<(Option<Child>, String), AdapterError> {
        let mut child = config
            .launch()
            .map_err(|err| AdapterError::internal(format!("failed to launch chromium: {err}")))?;

        let ws_url = extract_ws_url(&mut child).await?;

        Ok((Some(child), ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
    ) -> Result<(), AdapterError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            trace!(target: "cdp-transport", method = %event_method(event), "event");
                        }
                        Some(Err(err)) => {
                            let adapter_err = map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(adapter_err.clone()));
                            }
                            return Err(adapter_err);
                        }
                        None => {
                            let err = AdapterError::io("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>,
    ) -> Result<(), AdapterError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let adapter_err = AdapterError::io(err.to_string());
                let _ = cmd.responder.send(Err(adapter_err.clone()));
                Err(adapter_err)
            }
        }
    }

    fn handle_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = extract_payload(resp);

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}

fn event_method(event: CdpEventMessage) -> String {
    let raw: Result<CdpJsonEventMessage, _> = event.try_into();
    raw.map(|raw| raw.method.into_owned()).unwrap_or_default()
}

fn extract_payload(resp: Response) -> Result<Value, AdapterError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        let retriable = error.code >= 500;
        Err(AdapterError::io(format!("cdp error {}: {}", error.code, error.message))
            .retriable(retriable))
    } else {
        Err(AdapterError::internal("empty cdp response"))
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            AdapterError::new(AdapterErrorKind::ScriptFailed).with_hint(hint)
        }
        CdpError::FrameNotFound(_) | CdpError::NotFound => {
            AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(hint)
        }
        CdpError::Serde(_) => AdapterError::internal(hint),
        _ => AdapterError::io(hint).retriable(true),
    }
}
