//! Routes inbound chat events to relay operations.
//!
//! Every request ends with a visible reply that carries a way back to the
//! menu, whether the operation succeeded or not. Errors are logged with full
//! detail and shown to the user in redacted form.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use copilot_relay_error::{redact_markup, RelayError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};

use crate::agent::{check_command_safety, AgentClient};
use crate::config::RelayConfig;
use crate::conversation::{transition, ActiveSessions, ConversationState, Input, MenuAction, Step};
use crate::files::{check_upload_size, human_size, inspect_download, sanitize_file_name};
use crate::formatter::{
    render_agent_failure, render_agent_result, render_for_chat, FormattedResult,
};
use crate::menus;
use crate::reporter::{pump, ProgressReporter};
use crate::session::{SessionMode, SessionRegistry, UserId, UserPreferences};
use crate::surface::{deliver, replace, ChatSurface, Keyboard, MessageRef, OutboundMessage};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Surface-specific handle passed back to [`ChatSurface::fetch_file`].
    pub file_id: String,
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Start,
    Text(String),
    Button(String),
    File(UploadedFile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub user: UserId,
    pub kind: InboundKind,
}

impl Inbound {
    pub fn text(user: UserId, text: impl Into<String>) -> Self {
        Self {
            user,
            kind: InboundKind::Text(text.into()),
        }
    }

    pub fn button(user: UserId, data: impl Into<String>) -> Self {
        Self {
            user,
            kind: InboundKind::Button(data.into()),
        }
    }
}

pub struct Dispatcher {
    config: Arc<RelayConfig>,
    agent: AgentClient,
    surface: Arc<dyn ChatSurface>,
    states: Mutex<HashMap<UserId, ConversationState>>,
}

impl Dispatcher {
    pub fn new(config: RelayConfig, surface: Arc<dyn ChatSurface>) -> Self {
        let defaults = UserPreferences {
            model: config.default_model.clone(),
            auto_approve: config.default_auto_approve,
        };
        let sessions = Arc::new(SessionRegistry::new(config.workspace_root.clone(), defaults));
        let config = Arc::new(config);
        Self {
            agent: AgentClient::new(config.clone(), sessions),
            config,
            surface,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        self.agent.sessions()
    }

    pub async fn state(&self, user: UserId) -> ConversationState {
        self.states
            .lock()
            .await
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    /// Handle one inbound event. Never fails: errors are reported to the user.
    pub async fn handle(&self, inbound: Inbound) {
        let user = inbound.user;
        if let Err(err) = self.dispatch(inbound).await {
            let report = err.to_report();
            if report.type_.is_request_local() {
                tracing::warn!(
                    user = %user,
                    error = %report.message,
                    error_type = report.type_.as_str(),
                    details = ?report.details,
                    "request refused"
                );
            } else {
                tracing::error!(
                    user = %user,
                    error = %report.message,
                    error_type = report.type_.as_str(),
                    details = ?report.details,
                    "request failed"
                );
            }
            let reply = OutboundMessage::markdown(error_text(&err))
                .with_keyboard(menus::back_menu());
            if let Err(err) = self.send(user, reply).await {
                tracing::error!(user = %user, error = %err, "failed to deliver error reply");
            }
        }
    }

    async fn dispatch(&self, inbound: Inbound) -> Result<(), RelayError> {
        let user = inbound.user;
        let action;
        let (input, text) = match &inbound.kind {
            InboundKind::Start => (Input::Start, ""),
            InboundKind::Text(text) => (Input::Text, text.trim()),
            InboundKind::Button(data) => {
                action = match MenuAction::parse(data) {
                    Some(action) => action,
                    None => {
                        tracing::warn!(user = %user, data = %data, "unknown button");
                        let reply = OutboundMessage::markdown("❓ *Unknown action*\n\nPlease use the menu buttons.")
                            .with_keyboard(menus::main_menu());
                        self.send(user, reply).await?;
                        return Ok(());
                    }
                };
                (Input::Button(&action), "")
            }
            InboundKind::File(_) => (Input::File, ""),
        };

        let sessions = ActiveSessions {
            agent: self.sessions().is_active(SessionMode::Agent, user).await,
            chat: self.sessions().is_active(SessionMode::Chat, user).await,
        };
        let step = {
            let mut states = self.states.lock().await;
            let current = states.get(&user).copied().unwrap_or_default();
            let (next, step) = transition(current, input, sessions);
            if next != current {
                tracing::debug!(user = %user, from = ?current, to = ?next, "conversation state changed");
            }
            states.insert(user, next);
            step
        };

        match step {
            Step::ShowMainMenu => {
                self.send_screen(user, menus::welcome_text(), menus::main_menu())
                    .await
            }
            Step::MenuHint => {
                let reply = OutboundMessage::plain(menus::menu_hint_text())
                    .with_keyboard(menus::main_menu());
                self.send(user, reply).await.map(|_| ())
            }
            Step::ShowPrompt(prompt) => {
                let preferences = self.sessions().preferences(user).await;
                let text = menus::prompt_text(prompt, &preferences.model);
                self.send_screen(user, &text, menus::back_menu()).await
            }
            Step::RunAgent { continue_session } => {
                self.run_agent(user, text, continue_session).await
            }
            Step::RunChat { continue_session } => self.run_chat(user, text, continue_session).await,
            Step::Suggest => self.suggest(user, text).await,
            Step::Explain => self.explain(user, text).await,
            Step::RunCommand => self.run_command(user, text).await,
            Step::Download => self.download(user, text).await,
            Step::ShowStatus => self.show_status(user).await,
            Step::ClearAgent => {
                self.sessions().reset(SessionMode::Agent, user).await;
                self.send_screen(
                    user,
                    "🔄 *SESSION CLEARED*\n\n✅ Agent session has been reset\n\n_You can now start fresh with new tasks_",
                    menus::back_menu(),
                )
                .await
            }
            Step::ClearChat => {
                self.sessions().reset(SessionMode::Chat, user).await;
                self.send_screen(
                    user,
                    "🔄 *CHAT CLEARED*\n\n✅ Chat session has been reset\n\n_Conversation history cleared_",
                    menus::back_menu(),
                )
                .await
            }
            Step::ShowSettings => self.show_settings(user, None).await,
            Step::ToggleAutoApprove => {
                let enabled = self.sessions().toggle_auto_approve(user).await;
                let notice = if enabled {
                    "Auto-approve enabled!"
                } else {
                    "Auto-approve disabled!"
                };
                tracing::info!(user = %user, enabled, "auto-approve toggled");
                self.show_settings(user, Some(notice)).await
            }
            Step::ShowModelMenu => self.show_model_menu(user, None).await,
            Step::SetModel(model) => {
                if !model.is_known() {
                    tracing::warn!(user = %user, model = %model, "selected model is not in the menu");
                }
                tracing::info!(user = %user, model = %model, "model selected");
                let notice = format!("Model set to {}!", model.display_name());
                self.sessions().set_model(user, model).await;
                self.show_model_menu(user, Some(&notice)).await
            }
            Step::ShowHelp => {
                self.send_screen(user, menus::help_text(), menus::back_menu())
                    .await
            }
            Step::AcceptUpload => match &inbound.kind {
                InboundKind::File(file) => self.accept_upload(user, file).await,
                _ => Ok(()),
            },
            Step::RejectUpload => {
                self.send_screen(
                    user,
                    "📎 *File Upload*\n\nFiles can only be processed in *Agent Mode*.\n\nPlease select 🤖 Agent Mode from the menu first.",
                    menus::main_menu(),
                )
                .await
            }
        }
    }

    async fn run_agent(
        &self,
        user: UserId,
        task: &str,
        continue_session: bool,
    ) -> Result<(), RelayError> {
        let status = self
            .send(
                user,
                OutboundMessage::markdown(format!(
                    "🤖 *AGENT PROCESSING*\n\n*Task:* {task}\n\n⏳ *Status:* Initializing agent..."
                )),
            )
            .await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let reporter = ProgressReporter::new(task, self.config.progress_throttle());
        let (outcome, reporter) = tokio::join!(
            self.agent.run_task(user, task, continue_session, events_tx),
            pump(events_rx, reporter, self.surface.as_ref(), &status),
        );

        let text = match outcome {
            Ok(run) => match run.error() {
                None => {
                    tracing::info!(
                        user = %user,
                        milestones = run.result.milestones.len(),
                        commands = run.formatted.commands.len(),
                        continued = run.continued,
                        "agent task completed"
                    );
                    render_agent_result(
                        task,
                        &run.formatted,
                        reporter.milestones(),
                        &self.config.limits,
                    )
                }
                Some(err) => {
                    tracing::warn!(
                        user = %user,
                        error = %err,
                        exit_code = run.result.exit_code,
                        timed_out = run.result.timed_out,
                        "agent task failed"
                    );
                    render_agent_failure(task, &err.user_message(), &run.formatted)
                }
            },
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "agent task not started");
                render_agent_failure(task, &err.user_message(), &FormattedResult::default())
            }
        };

        self.replace(
            &status,
            OutboundMessage::markdown(text).with_keyboard(menus::back_menu()),
        )
        .await
    }

    async fn run_chat(
        &self,
        user: UserId,
        message: &str,
        continue_session: bool,
    ) -> Result<(), RelayError> {
        let status = self
            .send(user, OutboundMessage::markdown("💬 *Thinking...*"))
            .await?;
        let reply = match self.agent.chat(user, message, continue_session).await {
            Ok(reply) => OutboundMessage::markdown(format!(
                "💬 {}",
                render_for_chat(&reply, self.config.limits.chat)
            ))
            .with_keyboard(menus::chat_reply_menu()),
            Err(err) => self.failure(user, "chat", &err),
        };
        self.replace(&status, reply).await
    }

    async fn suggest(&self, user: UserId, query: &str) -> Result<(), RelayError> {
        let status = self
            .send(
                user,
                OutboundMessage::markdown(format!(
                    "💡 *ANALYZING QUERY*\n\n*Query:* {query}\n\n⏳ *Processing...*"
                )),
            )
            .await?;
        let reply = match self.agent.suggest(user, query).await {
            Ok(answer) => OutboundMessage::markdown(format!(
                "💡 *SUGGESTION*\n\n*Query:* {query}\n\n{}",
                render_for_chat(&answer, self.config.limits.suggest)
            ))
            .with_keyboard(menus::back_menu()),
            Err(err) => self.failure(user, "suggest", &err),
        };
        self.replace(&status, reply).await
    }

    async fn explain(&self, user: UserId, command: &str) -> Result<(), RelayError> {
        let shown = redact_markup(command);
        let status = self
            .send(
                user,
                OutboundMessage::markdown(format!(
                    "📚 *ANALYZING COMMAND*\n\n*Command:* `{shown}`\n\n⏳ *Processing...*"
                )),
            )
            .await?;
        let reply = match self.agent.explain(user, command).await {
            Ok(answer) => OutboundMessage::markdown(format!(
                "📚 *EXPLANATION*\n\n*Command:* `{shown}`\n\n{}",
                render_for_chat(&answer, self.config.limits.suggest)
            ))
            .with_keyboard(menus::back_menu()),
            Err(err) => self.failure(user, "explain", &err),
        };
        self.replace(&status, reply).await
    }

    async fn run_command(&self, user: UserId, command: &str) -> Result<(), RelayError> {
        let shown = redact_markup(command);
        if let Err(err) = check_command_safety(command) {
            tracing::info!(user = %user, error = %err, "refusing command");
            return self
                .send_screen(
                    user,
                    &format!(
                        "⚠️ *BLOCKED*\n\n*Reason:* Dangerous command detected\n\n*Command:* `{shown}`\n\nThis command has been blocked for safety."
                    ),
                    menus::back_menu(),
                )
                .await;
        }

        let status = self
            .send(
                user,
                OutboundMessage::markdown(format!(
                    "⚙️ *EXECUTING*\n\n*Command:* `{shown}`\n\n⏳ *Status:* Executing..."
                )),
            )
            .await?;

        let output = match self.agent.run_command(command).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "command failed");
                let text = format!(
                    "❌ *EXECUTION FAILED*\n\n*Command:* `{shown}`\n\n*Error:*\n```\n{}\n```",
                    err.user_message()
                );
                return self
                    .replace(
                        &status,
                        OutboundMessage::markdown(text).with_keyboard(menus::back_menu()),
                    )
                    .await;
            }
        };

        let cap = self.config.limits.command_output;
        let head: String = output.chars().take(cap).collect();
        let text = format!(
            "✅ *EXECUTION COMPLETE*\n\n*Command:* `{shown}`\n\n```\n{}\n```",
            redact_markup(&head)
        );
        self.replace(
            &status,
            OutboundMessage::markdown(text).with_keyboard(menus::back_menu()),
        )
        .await?;

        let rest: Vec<char> = output.chars().skip(cap).collect();
        for chunk in rest.chunks(self.config.limits.message_chunk.max(1)) {
            let chunk: String = chunk.iter().collect();
            self.send(
                user,
                OutboundMessage::markdown(format!("```\n{}\n```", redact_markup(&chunk))),
            )
            .await?;
        }
        Ok(())
    }

    async fn download(&self, user: UserId, raw_path: &str) -> Result<(), RelayError> {
        let path = PathBuf::from(raw_path);
        let target = inspect_download(&path, self.config.max_download_bytes).await?;
        let caption = format!("📥 {} ({})", target.file_name(), human_size(target.size));
        self.surface
            .send_document(user, &target.path, &caption)
            .await?;
        tracing::info!(user = %user, path = %target.path.display(), size = target.size, "file sent");
        self.send_screen(
            user,
            &format!(
                "✅ *File Sent*\n\n*Path:* `{}`\n*Size:* {}",
                redact_markup(&target.path.display().to_string()),
                human_size(target.size)
            ),
            menus::back_menu(),
        )
        .await
    }

    async fn accept_upload(&self, user: UserId, file: &UploadedFile) -> Result<(), RelayError> {
        let status = self
            .send(
                user,
                OutboundMessage::markdown("📎 *Processing File...*\n\n⏳ Downloading file..."),
            )
            .await?;

        let reply = match self.store_upload(user, file).await {
            Ok((path, size)) => {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                OutboundMessage::markdown(format!(
                    "📎 *File Received*\n\n*Name:* `{}`\n*Size:* {}\n*Location:* `{}`\n\n✅ File saved to agent workspace!\n\n_Send a message to tell the agent what to do with this file._",
                    redact_markup(&name),
                    human_size(size),
                    redact_markup(&path.display().to_string()),
                ))
                .with_keyboard(menus::back_menu())
            }
            Err(err) => self.failure(user, "upload", &err),
        };
        self.replace(&status, reply).await
    }

    async fn store_upload(
        &self,
        user: UserId,
        file: &UploadedFile,
    ) -> Result<(PathBuf, u64), RelayError> {
        check_upload_size(file.size, self.config.max_upload_bytes)?;
        let workspace = self
            .sessions()
            .ensure_workspace(SessionMode::Agent, user)
            .await?;
        let dest = workspace.join(sanitize_file_name(&file.name));
        let size = self.surface.fetch_file(&file.file_id, &dest).await?;
        tracing::info!(user = %user, path = %dest.display(), size, "upload stored");
        Ok((dest, size))
    }

    async fn show_status(&self, user: UserId) -> Result<(), RelayError> {
        let status = self
            .send(
                user,
                OutboundMessage::markdown(
                    "📊 *SYSTEM STATUS*\n\n⏳ *Gathering system information...*",
                ),
            )
            .await?;

        let mut text = String::from("📊 *SYSTEM STATUS*\n\n");
        for probe in self.agent.system_status().await {
            match probe.value {
                Some(value) => text.push_str(&format!(
                    "*{}:*\n`{}`\n\n",
                    probe.name,
                    redact_markup(&value)
                )),
                None => text.push_str(&format!("*{}:* ❌ Error\n\n", probe.name)),
            }
        }
        let updated = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "now".to_string());
        text.push_str(&format!("_Updated: {updated}_"));

        self.replace(
            &status,
            OutboundMessage::markdown(text).with_keyboard(menus::back_menu()),
        )
        .await
    }

    async fn show_settings(&self, user: UserId, notice: Option<&str>) -> Result<(), RelayError> {
        let preferences = self.sessions().preferences(user).await;
        let text = with_notice(notice, menus::settings_text(&preferences));
        self.send_screen(user, &text, menus::settings_menu(&preferences))
            .await
    }

    async fn show_model_menu(&self, user: UserId, notice: Option<&str>) -> Result<(), RelayError> {
        let preferences = self.sessions().preferences(user).await;
        let text = with_notice(notice, menus::model_menu_text());
        self.send_screen(user, &text, menus::model_menu(&preferences.model))
            .await
    }

    fn failure(&self, user: UserId, operation: &str, err: &RelayError) -> OutboundMessage {
        tracing::warn!(user = %user, operation, error = %err, "operation failed");
        OutboundMessage::markdown(error_text(err)).with_keyboard(menus::back_menu())
    }

    async fn send_screen(
        &self,
        user: UserId,
        text: &str,
        keyboard: Keyboard,
    ) -> Result<(), RelayError> {
        self.send(user, OutboundMessage::markdown(text).with_keyboard(keyboard))
            .await
            .map(|_| ())
    }

    async fn send(&self, user: UserId, message: OutboundMessage) -> Result<MessageRef, RelayError> {
        deliver(
            self.surface.as_ref(),
            user,
            message,
            self.config.limits.message_chunk,
        )
        .await
        .map_err(RelayError::from)
    }

    async fn replace(&self, target: &MessageRef, message: OutboundMessage) -> Result<(), RelayError> {
        replace(
            self.surface.as_ref(),
            target,
            message,
            self.config.limits.message_chunk,
        )
        .await
        .map_err(RelayError::from)
    }
}

fn error_text(err: &RelayError) -> String {
    format!(
        "❌ *{}*\n\n```\n{}\n```\n\nPlease try again.",
        err.error_type().title(),
        err.user_message()
    )
}

fn with_notice(notice: Option<&str>, text: String) -> String {
    match notice {
        Some(notice) => format!("_{notice}_\n\n{text}"),
        None => text,
    }
}
