//! Agent loop (observe-think-act) execution.
//!
//! The LLM is consulted at every step to decide the next actions from the
//! current browser state:
//!
//! ```text
//! while !done && steps < max:
//!     state   = observe()        // interactive elements + screenshot
//!     output  = llm.decide()     // brain + up to N actions
//!     results = execute()        // stops early when the page changes
//!     if results.last().is_done: break
//! ```
//!
//! # Key Components
//!
//! - [`Agent`]: the loop, pause/stop control and history replay
//! - [`MessageManager`]: conversation state within a token budget
//! - [`Planner`] and [`ProceduralMemory`]: optional periodic helpers
//! - [`AgentHistoryList`]: the recorded run, persisted as JSON

pub mod agent;
pub mod gif;
pub mod history;
pub mod memory;
pub mod message_manager;
pub mod planner;
pub mod prompt;
pub mod types;

pub use agent::{Agent, AgentBuilder, AgentControl, DoneCallback, NewStepCallback};
pub use gif::create_history_gif;
pub use history::{AgentHistory, AgentHistoryList, BrowserStateHistory, ModelAction, StepMetadata};
pub use memory::ProceduralMemory;
pub use message_manager::{ManagedMessage, MessageKind, MessageManager, MessageManagerSettings};
pub use planner::Planner;
pub use types::{AgentBrain, AgentOutput, AgentStepInfo};
