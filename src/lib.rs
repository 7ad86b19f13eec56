//! Command line front end for the webpilot browser agent.
//!
//! Wires the agent loop from `agent-core` to a Chromium browser from
//! `cdp-adapter` and an OpenAI-compatible chat model.

pub mod cli;
pub mod config;
pub mod llm;

pub use config::{AppConfig, ConfigError, LlmConfig};
pub use llm::{build_provider, OpenAiConfig, OpenAiProvider, ProviderSetupError};
