//! webpilot agent core.
//!
//! Hosts the browser-agnostic pieces of the agent: settings, the model and
//! browser abstractions, the action controller, and the observe-think-act loop
//! that records an [`AgentHistoryList`].

pub mod agent_loop;
pub mod browser;
pub mod controller;
pub mod element_tree;
pub mod errors;
pub mod llm;
pub mod settings;

pub use agent_loop::{
    create_history_gif, Agent, AgentBrain, AgentBuilder, AgentControl, AgentHistory,
    AgentHistoryList, AgentOutput, AgentStepInfo, BrowserStateHistory, MessageManager,
    StepMetadata,
};
pub use browser::{
    Browser, BrowserContext, BrowserContextConfig, BrowserError, BrowserState, DomElement,
    ScrollDirection, TabInfo, Viewport,
};
pub use controller::{ActionContext, ActionInvocation, ActionRegistry, ActionResult, Controller};
pub use errors::AgentError;
pub use llm::{
    ChatMessage, CompletionOptions, ContentPart, LlmError, LlmProvider, LlmResponse,
    MessageContent, MockLlmProvider, Role, TokenUsage,
};
pub use settings::{AgentSettings, ToolCallingMethod};
