//! Per-user conversation state and the transition table that decides what an
//! inbound event means given that state.

use serde::Serialize;

use crate::models::ModelId;

const SET_MODEL_PREFIX: &str = "set_model_";

/// What the next free-text message from a user will be interpreted as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingAgentInput,
    AwaitingChatInput,
    AwaitingSuggestQuery,
    AwaitingExplainTarget,
    AwaitingRunCommand,
    AwaitingDownloadPath,
}

/// Button payloads understood by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Menu,
    Agent,
    Chat,
    Suggest,
    Explain,
    Run,
    Download,
    Status,
    ClearAgent,
    ClearChat,
    Settings,
    ToggleAutoApprove,
    ModelMenu,
    SetModel(ModelId),
    Help,
}

impl MenuAction {
    pub fn parse(data: &str) -> Option<Self> {
        let action = match data {
            "menu" => Self::Menu,
            "agent" => Self::Agent,
            "chat" => Self::Chat,
            "suggest" => Self::Suggest,
            "explain" => Self::Explain,
            "run" => Self::Run,
            "download" => Self::Download,
            "status" => Self::Status,
            "clear" => Self::ClearAgent,
            "clear_chat" => Self::ClearChat,
            "settings" => Self::Settings,
            "toggle_approve" => Self::ToggleAutoApprove,
            "model_menu" => Self::ModelMenu,
            "help" => Self::Help,
            other => {
                let model = other.strip_prefix(SET_MODEL_PREFIX)?;
                if model.is_empty() {
                    return None;
                }
                Self::SetModel(ModelId::new(model))
            }
        };
        Some(action)
    }

    pub fn callback_data(&self) -> String {
        match self {
            Self::Menu => "menu".to_string(),
            Self::Agent => "agent".to_string(),
            Self::Chat => "chat".to_string(),
            Self::Suggest => "suggest".to_string(),
            Self::Explain => "explain".to_string(),
            Self::Run => "run".to_string(),
            Self::Download => "download".to_string(),
            Self::Status => "status".to_string(),
            Self::ClearAgent => "clear".to_string(),
            Self::ClearChat => "clear_chat".to_string(),
            Self::Settings => "settings".to_string(),
            Self::ToggleAutoApprove => "toggle_approve".to_string(),
            Self::ModelMenu => "model_menu".to_string(),
            Self::SetModel(model) => format!("{SET_MODEL_PREFIX}{model}"),
            Self::Help => "help".to_string(),
        }
    }
}

/// Prompt screens shown after a mode button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Agent,
    Chat,
    Suggest,
    Explain,
    Run,
    Download,
}

#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    Start,
    Text,
    Button(&'a MenuAction),
    File,
}

/// Session activity the transition depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveSessions {
    pub agent: bool,
    pub chat: bool,
}

/// Operation the dispatcher performs for a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    ShowMainMenu,
    /// Free text outside any mode with nothing to continue.
    MenuHint,
    ShowPrompt(Prompt),
    RunAgent { continue_session: bool },
    RunChat { continue_session: bool },
    Suggest,
    Explain,
    RunCommand,
    Download,
    ShowStatus,
    ClearAgent,
    ClearChat,
    ShowSettings,
    ToggleAutoApprove,
    ShowModelMenu,
    SetModel(ModelId),
    ShowHelp,
    AcceptUpload,
    RejectUpload,
}

/// Total transition function: every (state, input) pair yields the next
/// state and the step to run.
pub fn transition(
    state: ConversationState,
    input: Input<'_>,
    sessions: ActiveSessions,
) -> (ConversationState, Step) {
    use ConversationState as S;

    match input {
        Input::Start => (S::Idle, Step::ShowMainMenu),
        Input::Button(action) => on_button(state, action),
        Input::Text => match state {
            // Agent and chat modes stay selected so follow-ups keep flowing.
            S::AwaitingAgentInput => (
                state,
                Step::RunAgent {
                    continue_session: sessions.agent,
                },
            ),
            S::AwaitingChatInput => (
                state,
                Step::RunChat {
                    continue_session: sessions.chat,
                },
            ),
            S::AwaitingSuggestQuery => (S::Idle, Step::Suggest),
            S::AwaitingExplainTarget => (S::Idle, Step::Explain),
            S::AwaitingRunCommand => (S::Idle, Step::RunCommand),
            S::AwaitingDownloadPath => (S::Idle, Step::Download),
            S::Idle if sessions.agent => (
                S::Idle,
                Step::RunAgent {
                    continue_session: true,
                },
            ),
            S::Idle if sessions.chat => (
                S::Idle,
                Step::RunChat {
                    continue_session: true,
                },
            ),
            S::Idle => (S::Idle, Step::MenuHint),
        },
        Input::File => {
            if state == S::AwaitingAgentInput || sessions.agent {
                (S::AwaitingAgentInput, Step::AcceptUpload)
            } else {
                (state, Step::RejectUpload)
            }
        }
    }
}

fn on_button(state: ConversationState, action: &MenuAction) -> (ConversationState, Step) {
    use ConversationState as S;

    match action {
        MenuAction::Menu => (S::Idle, Step::ShowMainMenu),
        MenuAction::Agent => (S::AwaitingAgentInput, Step::ShowPrompt(Prompt::Agent)),
        MenuAction::Chat => (S::AwaitingChatInput, Step::ShowPrompt(Prompt::Chat)),
        MenuAction::Suggest => (S::AwaitingSuggestQuery, Step::ShowPrompt(Prompt::Suggest)),
        MenuAction::Explain => (S::AwaitingExplainTarget, Step::ShowPrompt(Prompt::Explain)),
        MenuAction::Run => (S::AwaitingRunCommand, Step::ShowPrompt(Prompt::Run)),
        MenuAction::Download => (S::AwaitingDownloadPath, Step::ShowPrompt(Prompt::Download)),
        MenuAction::ClearAgent => (S::Idle, Step::ClearAgent),
        MenuAction::ClearChat => (S::Idle, Step::ClearChat),
        MenuAction::Status => (state, Step::ShowStatus),
        MenuAction::Settings => (state, Step::ShowSettings),
        MenuAction::ToggleAutoApprove => (state, Step::ToggleAutoApprove),
        MenuAction::ModelMenu => (state, Step::ShowModelMenu),
        MenuAction::SetModel(model) => (state, Step::SetModel(model.clone())),
        MenuAction::Help => (state, Step::ShowHelp),
    }
}
