//! The agent: observe-think-act loop over a browser context.
//!
//! ```text
//! for step in 1..=max_steps:
//!     state  = context.get_state()        // observe
//!     output = llm.complete(messages)     // decide
//!     result = controller.act(actions)    // act
//!     if result.is_done: break
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::gif::create_history_gif;
use super::history::{AgentHistory, AgentHistoryList, BrowserStateHistory, StepMetadata};
use super::memory::ProceduralMemory;
use super::message_manager::{MessageManager, MessageManagerSettings};
use super::planner::Planner;
use super::prompt;
use super::types::{AgentOutput, AgentStepInfo};
use crate::browser::{Browser, BrowserContext, BrowserContextConfig, BrowserState};
use crate::controller::{ActionContext, ActionInvocation, ActionResult, Controller};
use crate::element_tree::find_matching_element;
use crate::errors::AgentError;
use crate::llm::{extract_json_object, ChatMessage, CompletionOptions, LlmProvider};
use crate::settings::AgentSettings;

pub type NewStepCallback = Arc<dyn Fn(&BrowserState, &AgentOutput, u32) + Send + Sync>;
pub type DoneCallback = Arc<dyn Fn(&AgentHistoryList) + Send + Sync>;

#[derive(Default)]
struct ControlFlags {
    paused: AtomicBool,
    stopped: AtomicBool,
    notify: Notify,
}

/// Cloneable handle to pause, resume or stop a running agent.
#[derive(Clone, Default)]
pub struct AgentControl {
    inner: Arc<ControlFlags>,
}

impl AgentControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the agent before its next step.
    pub fn pause(&self) {
        info!("pausing agent");
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        info!("resuming agent");
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Stop the agent before its next step; also releases a pause.
    pub fn stop(&self) {
        info!("stopping agent");
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if !self.is_paused() || self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Assembles an [`Agent`].
pub struct AgentBuilder {
    task: String,
    llm: Arc<dyn LlmProvider>,
    settings: AgentSettings,
    controller: Option<Controller>,
    browser: Option<Arc<dyn Browser>>,
    browser_context: Option<Arc<dyn BrowserContext>>,
    context_config: BrowserContextConfig,
    planner_llm: Option<Arc<dyn LlmProvider>>,
    page_extraction_llm: Option<Arc<dyn LlmProvider>>,
    initial_actions: Vec<ActionInvocation>,
    sensitive_data: HashMap<String, String>,
    on_new_step: Option<NewStepCallback>,
    on_done: Option<DoneCallback>,
    control: Option<AgentControl>,
}

impl AgentBuilder {
    pub fn settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn controller(mut self, controller: Controller) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Browser used to create a context owned (and closed) by the agent.
    pub fn browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Externally managed context; the agent never closes it.
    pub fn browser_context(mut self, context: Arc<dyn BrowserContext>) -> Self {
        self.browser_context = Some(context);
        self
    }

    pub fn browser_context_config(mut self, config: BrowserContextConfig) -> Self {
        self.context_config = config;
        self
    }

    pub fn planner_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.planner_llm = Some(llm);
        self
    }

    pub fn page_extraction_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.page_extraction_llm = Some(llm);
        self
    }

    /// Actions executed before the first model call.
    pub fn initial_actions(mut self, actions: Vec<ActionInvocation>) -> Self {
        self.initial_actions = actions;
        self
    }

    pub fn sensitive_data(mut self, data: HashMap<String, String>) -> Self {
        self.sensitive_data = data;
        self
    }

    pub fn on_new_step<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BrowserState, &AgentOutput, u32) + Send + Sync + 'static,
    {
        self.on_new_step = Some(Arc::new(callback));
        self
    }

    pub fn on_done<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AgentHistoryList) + Send + Sync + 'static,
    {
        self.on_done = Some(Arc::new(callback));
        self
    }

    /// Share a control handle created ahead of the agent.
    pub fn control(mut self, control: AgentControl) -> Self {
        self.control = Some(control);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        self.settings.validate()?;
        if self.browser.is_none() && self.browser_context.is_none() {
            return Err(AgentError::invalid_request(
                "an agent needs a browser or a browser context",
            ));
        }

        let controller = self.controller.unwrap_or_default();
        for action in &self.initial_actions {
            if !controller.registry().contains(&action.name) {
                return Err(AgentError::UnknownAction(action.name.clone()));
            }
        }

        let system_prompt = format!(
            "{}\n\n{}",
            prompt::format_system_prompt(
                self.settings.max_actions_per_step,
                self.settings.override_system_message.as_deref(),
                self.settings.extend_system_message.as_deref(),
            ),
            prompt::format_action_catalogue(&controller.prompt_description()),
        );
        let message_manager = MessageManager::new(
            self.task.clone(),
            system_prompt,
            MessageManagerSettings {
                max_input_tokens: self.settings.max_input_tokens,
                include_attributes: self.settings.include_attributes.clone(),
                message_context: self.settings.message_context.clone(),
                sensitive_data: self.sensitive_data.clone(),
                available_file_paths: self.settings.available_file_paths.clone(),
            },
        );

        let planner = self
            .planner_llm
            .map(|llm| Planner::new(llm, &self.settings));
        let memory = self
            .settings
            .enable_memory
            .then(|| ProceduralMemory::new(self.llm.clone(), self.settings.memory_interval));
        let page_extraction_llm = self
            .page_extraction_llm
            .unwrap_or_else(|| self.llm.clone());

        let id = Uuid::new_v4();
        info!(
            agent_id = %id,
            model = self.llm.model_name(),
            vision = self.settings.use_vision,
            memory = self.settings.enable_memory,
            planner = planner.is_some(),
            "agent created"
        );

        Ok(Agent {
            id,
            task: self.task,
            llm: self.llm,
            settings: self.settings,
            controller,
            browser: self.browser,
            context: self.browser_context,
            owns_context: false,
            context_config: self.context_config,
            planner,
            memory,
            page_extraction_llm,
            initial_actions: self.initial_actions,
            sensitive_data: self.sensitive_data,
            message_manager,
            history: AgentHistoryList::new(),
            n_steps: 1,
            consecutive_failures: 0,
            last_result: Vec::new(),
            control: self.control.unwrap_or_default(),
            on_new_step: self.on_new_step,
            on_done: self.on_done,
        })
    }
}

#[derive(Default)]
struct StepProgress {
    state: Option<BrowserState>,
    model_output: Option<AgentOutput>,
    input_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ValidationVerdict {
    is_valid: bool,
    #[serde(default)]
    reason: String,
}

/// LLM-driven browser agent.
pub struct Agent {
    id: Uuid,
    task: String,
    llm: Arc<dyn LlmProvider>,
    settings: AgentSettings,
    controller: Controller,
    browser: Option<Arc<dyn Browser>>,
    context: Option<Arc<dyn BrowserContext>>,
    owns_context: bool,
    context_config: BrowserContextConfig,
    planner: Option<Planner>,
    memory: Option<ProceduralMemory>,
    page_extraction_llm: Arc<dyn LlmProvider>,
    initial_actions: Vec<ActionInvocation>,
    sensitive_data: HashMap<String, String>,
    message_manager: MessageManager,
    history: AgentHistoryList,
    n_steps: u32,
    consecutive_failures: u32,
    last_result: Vec<ActionResult>,
    control: AgentControl,
    on_new_step: Option<NewStepCallback>,
    on_done: Option<DoneCallback>,
}

impl Agent {
    pub fn builder(task: impl Into<String>, llm: Arc<dyn LlmProvider>) -> AgentBuilder {
        AgentBuilder {
            task: task.into(),
            llm,
            settings: AgentSettings::default(),
            controller: None,
            browser: None,
            browser_context: None,
            context_config: BrowserContextConfig::default(),
            planner_llm: None,
            page_extraction_llm: None,
            initial_actions: Vec::new(),
            sensitive_data: HashMap::new(),
            on_new_step: None,
            on_done: None,
            control: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn history(&self) -> &AgentHistoryList {
        &self.history
    }

    pub fn message_manager(&self) -> &MessageManager {
        &self.message_manager
    }

    /// Number of the next step (starts at 1).
    pub fn n_steps(&self) -> u32 {
        self.n_steps
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn control(&self) -> AgentControl {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    /// Continue with a follow-up task, keeping the conversation so far.
    pub fn add_new_task(&mut self, task: impl Into<String>) {
        let task = task.into();
        info!(task = %task, "adding follow-up task");
        self.message_manager.add_new_task(task.clone());
        self.task = task;
    }

    /// Run with the step limit from [`AgentSettings::max_steps`].
    pub async fn run_default(&mut self) -> Result<AgentHistoryList, AgentError> {
        let max_steps = self.settings.max_steps;
        self.run(max_steps).await
    }

    /// Run the task for at most `max_steps` steps.
    pub async fn run(&mut self, max_steps: u32) -> Result<AgentHistoryList, AgentError> {
        let span = info_span!("agent_run", agent_id = %self.id);
        let outcome = self.run_steps(max_steps).instrument(span).await;

        self.close_owned_context().await;
        if let Some(callback) = &self.on_done {
            callback(&self.history);
        }
        if self.settings.generate_gif {
            let path = self.settings.resolved_gif_path();
            if let Err(err) = create_history_gif(&self.task, &self.history, &path) {
                warn!(error = %err, "failed to write history gif");
            }
        }

        outcome.map(|_| self.history.clone())
    }

    async fn run_steps(&mut self, max_steps: u32) -> Result<(), AgentError> {
        info!(task = %self.task, max_steps, "starting task");

        if !self.initial_actions.is_empty() {
            let actions = self.initial_actions.clone();
            self.last_result = match self.multi_act(&actions, None).await {
                Ok(results) => results,
                Err(err) => {
                    warn!(error = %err, "initial actions failed");
                    vec![ActionResult::error(err.to_string())]
                }
            };
        }

        for step in 1..=max_steps {
            if self.consecutive_failures >= self.settings.max_failures {
                error!(
                    failures = self.consecutive_failures,
                    "stopping due to consecutive failures"
                );
                break;
            }
            if self.control.is_stopped() {
                info!("agent stopped");
                break;
            }
            self.control.wait_while_paused().await;
            if self.control.is_stopped() {
                info!("agent stopped");
                break;
            }

            self.step(Some(AgentStepInfo::new(step, max_steps))).await;

            if self.history.is_done() {
                if self.settings.validate_output && step < max_steps && !self.validate_output().await {
                    continue;
                }
                info!(
                    success = self.history.is_successful().unwrap_or(false),
                    "task completed"
                );
                return Ok(());
            }
        }

        if !self.history.is_done() {
            info!("failed to complete task in maximum steps");
        }
        Ok(())
    }

    /// Execute one observe-think-act step; a history item is always recorded.
    pub async fn step(&mut self, step_info: Option<AgentStepInfo>) {
        info!(step = self.n_steps, "step started");
        let started = Utc::now();
        let mut progress = StepProgress::default();

        match self.try_step(step_info, &mut progress).await {
            Ok(results) => {
                self.consecutive_failures = 0;
                self.last_result = results;
            }
            Err(err) => {
                self.message_manager.remove_last_state_message();
                self.last_result = vec![self.handle_step_error(err).await];
            }
        }

        self.record_step(progress, started);
        self.n_steps += 1;
    }

    async fn try_step(
        &mut self,
        step_info: Option<AgentStepInfo>,
        progress: &mut StepProgress,
    ) -> Result<Vec<ActionResult>, AgentError> {
        let context = self.ensure_context().await?;
        let state = context.get_state(self.settings.use_vision).await?;
        progress.state = Some(state.clone());

        if let Some(memory) = &self.memory {
            if memory.is_due(self.n_steps) {
                memory.summarize_logged(&mut self.message_manager).await;
            }
        }

        self.message_manager.add_state_message(
            &state,
            &self.last_result,
            step_info.as_ref(),
            self.settings.use_vision,
        );

        if let Some(planner) = &self.planner {
            if planner.is_due(self.n_steps) {
                let plan = planner.plan(&self.message_manager.get_messages()).await?;
                self.message_manager.add_plan(&plan);
            }
        }

        self.message_manager.cut_messages()?;
        let input_messages = self.message_manager.get_messages();
        progress.input_tokens = self.message_manager.total_tokens();

        let (output, prompt_tokens) = self.get_next_action(&input_messages).await?;
        if let Some(tokens) = prompt_tokens {
            progress.input_tokens = tokens;
        }
        progress.model_output = Some(output.clone());

        if let Some(callback) = &self.on_new_step {
            callback(&state, &output, self.n_steps);
        }
        if let Some(dir) = &self.settings.save_conversation_path {
            if let Err(err) = save_conversation(dir, self.n_steps, &input_messages, &output).await
            {
                warn!(error = %err, "failed to save conversation");
            }
        }

        self.message_manager.remove_last_state_message();
        self.message_manager.add_model_output(&output)?;

        let cached = state.fingerprints();
        self.multi_act(&output.action, Some(&cached)).await
    }

    async fn get_next_action(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(AgentOutput, Option<usize>), AgentError> {
        let options = CompletionOptions {
            json_mode: self.settings.tool_calling_method.wants_json_mode(),
        };
        let response = self.llm.complete(messages, &options).await?;
        let mut output = AgentOutput::parse(&response.content)?;

        let max_actions = self.settings.max_actions_per_step as usize;
        if output.action.len() > max_actions {
            debug!(
                requested = output.action.len(),
                max_actions, "truncating model actions"
            );
            output.truncate(max_actions);
        }

        let brain = &output.current_state;
        info!(evaluation = %brain.evaluation_previous_goal, "eval");
        info!(memory = %brain.memory, "memory");
        info!(next_goal = %brain.next_goal, "next goal");
        for (i, action) in output.action.iter().enumerate() {
            info!(
                action = i + 1,
                total = output.action.len(),
                "{}",
                serde_json::to_string(action).unwrap_or_else(|_| action.name.clone())
            );
        }

        let prompt_tokens = response
            .usage
            .map(|usage| usage.prompt_tokens as usize);
        Ok((output, prompt_tokens))
    }

    async fn handle_step_error(&mut self, err: AgentError) -> ActionResult {
        self.consecutive_failures += 1;
        let mut message = err.to_string();
        if matches!(err, AgentError::ModelOutput(_)) {
            message = format!(
                "Invalid model output format. Please follow the correct schema. Details: {message}"
            );
        }

        if err.is_rate_limited() {
            warn!(
                failures = self.consecutive_failures,
                delay_secs = self.settings.retry_delay.as_secs_f64(),
                "model rate limited, backing off"
            );
            tokio::time::sleep(self.settings.retry_delay).await;
        } else {
            error!(
                failures = self.consecutive_failures,
                max_failures = self.settings.max_failures,
                error = %message,
                "step failed"
            );
        }
        ActionResult::error(message)
    }

    fn record_step(&mut self, progress: StepProgress, started: chrono::DateTime<Utc>) {
        let interacted_elements = match (&progress.model_output, &progress.state) {
            (Some(output), Some(state)) => output
                .action
                .iter()
                .map(|action| action.index().and_then(|i| state.element(i).cloned()))
                .collect(),
            _ => Vec::new(),
        };
        let state = progress
            .state
            .map(|state| BrowserStateHistory {
                url: state.url,
                title: state.title,
                tabs: state.tabs,
                interacted_elements,
                screenshot: state.screenshot,
            })
            .unwrap_or_default();

        self.history.push(AgentHistory {
            model_output: progress.model_output,
            result: self.last_result.clone(),
            state,
            metadata: Some(StepMetadata {
                step_number: self.n_steps,
                step_start_time: started,
                step_end_time: Utc::now(),
                input_tokens: progress.input_tokens,
            }),
        });
    }

    /// Execute actions in order.
    ///
    /// With `cached` fingerprints, an indexed action after the first one is
    /// skipped (and the sequence ends with a memory note) when new elements
    /// appeared on the page. Elements that disappeared do not count.
    async fn multi_act(
        &mut self,
        actions: &[ActionInvocation],
        cached: Option<&HashSet<String>>,
    ) -> Result<Vec<ActionResult>, AgentError> {
        let context = self.ensure_context().await?;
        let action_ctx = ActionContext::new(context.clone())
            .with_page_extraction_llm(self.page_extraction_llm.clone())
            .with_sensitive_data(self.sensitive_data.clone())
            .with_available_file_paths(self.settings.available_file_paths.clone());

        let mut results = Vec::with_capacity(actions.len());
        for (i, action) in actions.iter().enumerate() {
            if i > 0 && action.index().is_some() {
                if let Some(cached) = cached {
                    let fresh = context.get_state(false).await?;
                    if !fresh.fingerprints().is_subset(cached) {
                        let message =
                            format!("Something new appeared after action {} / {}", i, actions.len());
                        info!("{message}");
                        results.push(ActionResult::memory(message));
                        break;
                    }
                }
            }

            if let Err(err) = context.remove_highlights().await {
                debug!(error = %err, "failed to remove highlights");
            }

            let result = self.controller.act(action, &action_ctx).await?;
            let stop = result.is_done || result.is_error();
            results.push(result);
            if stop || i + 1 == actions.len() {
                break;
            }
            tokio::time::sleep(self.settings.wait_between_actions).await;
        }
        Ok(results)
    }

    /// Ask the model whether the final answer satisfies the task.
    async fn validate_output(&mut self) -> bool {
        let Some(context) = self.context.clone() else {
            return true;
        };
        let state = match context.get_state(self.settings.use_vision).await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "could not observe page for validation");
                return true;
            }
        };

        let text = prompt::format_state_message(
            &state,
            &self.last_result,
            None,
            &self.settings.include_attributes,
        );
        let state_message = match (&state.screenshot, self.settings.use_vision) {
            (Some(screenshot), true) => ChatMessage::user_with_image(text, screenshot.clone()),
            _ => ChatMessage::user(text),
        };
        let messages = [
            ChatMessage::system(format!(
                "{}\nThis is the user task: {}",
                prompt::VALIDATOR_SYSTEM_PROMPT,
                self.task
            )),
            state_message,
        ];

        let verdict = match self.llm.complete(&messages, &CompletionOptions::json()).await {
            Ok(response) => extract_json_object(&response.content)
                .and_then(|json| serde_json::from_str::<ValidationVerdict>(&json).ok()),
            Err(err) => {
                warn!(error = %err, "output validation failed");
                None
            }
        };
        let Some(verdict) = verdict else {
            return true;
        };

        if verdict.is_valid {
            info!(reason = %verdict.reason, "output validated");
            return true;
        }
        let note = format!("The output is not yet correct. {}.", verdict.reason);
        info!("{note}");
        self.message_manager.add_user_note(note.clone());
        self.last_result = vec![ActionResult::memory(note)];
        false
    }

    /// Replay a recorded run against the current page.
    ///
    /// Element indexes are re-resolved by matching the recorded element
    /// against the fresh observation. A step is retried up to `max_retries`
    /// times; with `skip_failures` a step that keeps failing is recorded as
    /// an error result instead of aborting the replay.
    pub async fn rerun_history(
        &mut self,
        history: &AgentHistoryList,
        max_retries: u32,
        skip_failures: bool,
        delay_between_actions: Duration,
    ) -> Result<Vec<ActionResult>, AgentError> {
        let span = info_span!("agent_rerun", agent_id = %self.id);
        let outcome = self
            .replay(history, max_retries.max(1), skip_failures, delay_between_actions)
            .instrument(span)
            .await;
        self.close_owned_context().await;
        outcome
    }

    async fn replay(
        &mut self,
        history: &AgentHistoryList,
        max_retries: u32,
        skip_failures: bool,
        delay: Duration,
    ) -> Result<Vec<ActionResult>, AgentError> {
        let mut results = Vec::new();

        if !self.initial_actions.is_empty() {
            let actions = self.initial_actions.clone();
            results.extend(self.multi_act(&actions, None).await?);
        }

        let total = history.history.len();
        for (i, item) in history.history.iter().enumerate() {
            let goal = item
                .model_output
                .as_ref()
                .map(|output| output.current_state.next_goal.as_str())
                .unwrap_or_default();
            info!(step = i + 1, total, goal, "replaying step");

            let has_actions = item
                .model_output
                .as_ref()
                .map(|output| !output.action.is_empty())
                .unwrap_or(false);
            if !has_actions {
                warn!(step = i + 1, "no action to replay, skipping");
                results.push(ActionResult::error("No action to replay"));
                continue;
            }

            let mut attempt = 0;
            loop {
                match self.replay_step(item, delay).await {
                    Ok(step_results) => {
                        results.extend(step_results);
                        break;
                    }
                    Err(err) => {
                        attempt += 1;
                        if attempt >= max_retries {
                            let message = format!(
                                "Step {} failed after {} attempts: {}",
                                i + 1,
                                max_retries,
                                err
                            );
                            error!("{message}");
                            if !skip_failures {
                                return Err(AgentError::action("rerun_history", message));
                            }
                            results.push(ActionResult::error(message));
                            break;
                        }
                        warn!(
                            step = i + 1,
                            attempt,
                            max_retries,
                            error = %err,
                            "replay step failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(results)
    }

    async fn replay_step(
        &mut self,
        item: &AgentHistory,
        delay: Duration,
    ) -> Result<Vec<ActionResult>, AgentError> {
        let Some(output) = &item.model_output else {
            return Ok(Vec::new());
        };
        let context = self.ensure_context().await?;
        let state = context.get_state(false).await?;

        let mut actions = Vec::with_capacity(output.action.len());
        for (i, recorded_action) in output.action.iter().enumerate() {
            let mut action = recorded_action.clone();
            let recorded_element = item.state.interacted_elements.get(i).cloned().flatten();
            if let (Some(old_index), Some(element)) = (action.index(), recorded_element) {
                let current = find_matching_element(&element, &state).ok_or_else(|| {
                    AgentError::action(
                        action.name.clone(),
                        format!("could not find matching element {old_index} in current page"),
                    )
                })?;
                if current.index != old_index {
                    info!(
                        from = old_index,
                        to = current.index,
                        "element moved in DOM, updating index"
                    );
                    action.set_index(current.index);
                }
            }
            actions.push(action);
        }

        let results = self.multi_act(&actions, None).await?;
        if let Some(failed) = results.iter().find_map(|r| r.error.clone()) {
            return Err(AgentError::action("rerun_history", failed));
        }
        tokio::time::sleep(delay).await;
        Ok(results)
    }

    async fn ensure_context(&mut self) -> Result<Arc<dyn BrowserContext>, AgentError> {
        if let Some(context) = &self.context {
            return Ok(context.clone());
        }
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| AgentError::invalid_request("agent has no browser"))?;
        let context = browser.new_context(self.context_config.clone()).await?;
        self.context = Some(context.clone());
        self.owns_context = true;
        Ok(context)
    }

    async fn close_owned_context(&mut self) {
        if !self.owns_context {
            return;
        }
        if let Some(context) = self.context.take() {
            if let Err(err) = context.close().await {
                warn!(error = %err, "failed to close browser context");
            }
        }
        self.owns_context = false;
    }
}

async fn save_conversation(
    dir: &Path,
    step: u32,
    messages: &[ChatMessage],
    output: &AgentOutput,
) -> Result<(), AgentError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut body = String::new();
    for message in messages {
        let role = serde_json::to_value(message.role)?;
        body.push_str(&format!(" {} \n", role.as_str().unwrap_or("user")));
        body.push_str(&message.text());
        body.push_str("\n\n");
    }
    body.push_str(" RESPONSE\n");
    body.push_str(&serde_json::to_string_pretty(output)?);
    body.push('\n');

    let path = dir.join(format!("conversation_{step}.txt"));
    tokio::fs::write(&path, body).await?;
    debug!(path = %path.display(), "saved conversation");
    Ok(())
}
