use std::env;
use std::path::PathBuf;

use agent_core::BrowserContextConfig;
use serde::{Deserialize, Serialize};
use which::which;

/// Environment variable naming the Chrome/Chromium binary to launch.
pub const CHROME_ENV: &str = "WEBPILOT_CHROME";

/// How the browser is launched or attached.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Relax same-origin checks so the agent can read cross-origin frames.
    pub disable_security: bool,
    /// Explicit browser binary; detected from the environment when unset.
    pub chrome_instance_path: Option<PathBuf>,
    /// Attach to an already running browser instead of launching one.
    /// Accepts a `ws://` DevTools URL or an `http://host:port` endpoint.
    pub cdp_url: Option<String>,
    pub extra_chromium_args: Vec<String>,
    /// Profile directory for launched browsers.
    pub user_data_dir: Option<PathBuf>,
    pub new_context_config: BrowserContextConfig,
    pub command_timeout_ms: u64,
    /// Keep-alive interval; `0` disables the heartbeat.
    pub heartbeat_interval_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            disable_security: true,
            chrome_instance_path: None,
            cdp_url: None,
            extra_chromium_args: Vec::new(),
            user_data_dir: None,
            new_context_config: BrowserContextConfig::default(),
            command_timeout_ms: 30_000,
            heartbeat_interval_ms: 15_000,
        }
    }
}

impl BrowserConfig {
    /// Binary to launch: the configured path when it exists, else whatever
    /// [`detect_chrome_executable`] finds.
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        match &self.chrome_instance_path {
            Some(path) if path.exists() => Some(path.clone()),
            _ => detect_chrome_executable(),
        }
    }

    /// Chromium switches derived from the config, before `extra_chromium_args`.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-client-side-phishing-detection",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-hang-monitor",
            "--disable-popup-blocking",
            "--disable-prompt-on-repost",
            "--disable-sync",
            "--metrics-recording-only",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--remote-allow-origins=*",
            "--use-mock-keychain",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--hide-scrollbars".to_string());
            args.push("--mute-audio".to_string());
        }
        if self.disable_security {
            args.push("--disable-web-security".to_string());
            args.push("--disable-site-isolation-trials".to_string());
            args.push("--disable-features=IsolateOrigins,site-per-process".to_string());
        }
        args.extend(self.extra_chromium_args.iter().cloned());
        args
    }
}

/// Locate a Chrome/Chromium binary: `WEBPILOT_CHROME`, then `PATH`, then
/// well-known install locations.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var(CHROME_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let root = PathBuf::from(value.trim());
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Chromium/Application/chrome.exe"));
                paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}
