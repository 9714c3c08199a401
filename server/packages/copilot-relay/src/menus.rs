//! Fixed screens: menus, prompts, help and settings.

use crate::conversation::{MenuAction, Prompt};
use crate::models::{ModelId, MODELS};
use crate::session::UserPreferences;
use crate::surface::{Button, Keyboard};

fn button(label: impl Into<String>, action: MenuAction) -> Button {
    Button::new(label, action.callback_data())
}

pub fn main_menu() -> Keyboard {
    Keyboard::default()
        .row(vec![
            button("🤖 Agent Mode", MenuAction::Agent),
            button("💬 AI Chat", MenuAction::Chat),
        ])
        .row(vec![
            button("💡 Suggest Command", MenuAction::Suggest),
            button("📚 Explain Command", MenuAction::Explain),
        ])
        .row(vec![
            button("⚙️ Run Command", MenuAction::Run),
            button("📊 System Status", MenuAction::Status),
        ])
        .row(vec![button("📥 Download File", MenuAction::Download)])
        .row(vec![
            button("🔄 Clear Agent", MenuAction::ClearAgent),
            button("🔄 Clear Chat", MenuAction::ClearChat),
        ])
        .row(vec![
            button("⚙️ Settings", MenuAction::Settings),
            button("❓ Help", MenuAction::Help),
        ])
}

pub fn back_menu() -> Keyboard {
    Keyboard::default().row(vec![button("🏠 Back to Menu", MenuAction::Menu)])
}

/// Keyboard under a chat reply.
pub fn chat_reply_menu() -> Keyboard {
    Keyboard::default()
        .row(vec![button("🔄 Clear Chat", MenuAction::ClearChat)])
        .row(vec![button("🏠 Back to Menu", MenuAction::Menu)])
}

pub fn settings_menu(preferences: &UserPreferences) -> Keyboard {
    let approve = if preferences.auto_approve {
        "✅ Auto-Approve: ON"
    } else {
        "❌ Auto-Approve: OFF"
    };
    Keyboard::default()
        .row(vec![button(approve, MenuAction::ToggleAutoApprove)])
        .row(vec![button(
            format!("🤖 Model: {}", preferences.model.display_name()),
            MenuAction::ModelMenu,
        )])
        .row(vec![button("🏠 Back to Menu", MenuAction::Menu)])
}

pub fn model_menu(current: &ModelId) -> Keyboard {
    let mut keyboard = Keyboard::default();
    for (id, name) in MODELS {
        let marker = if *id == current.as_str() { "✅" } else { "⚪" };
        keyboard = keyboard.row(vec![button(
            format!("{marker} {name}"),
            MenuAction::SetModel(ModelId::new(*id)),
        )]);
    }
    keyboard.row(vec![button("⬅️ Back to Settings", MenuAction::Settings)])
}

pub fn welcome_text() -> &'static str {
    "🤖 *COPILOT AI ASSISTANT*

*Available Options:*

🤖 *Agent Mode* - AI executes multi-step tasks
💬 *AI Chat* - Continuous conversation with AI
💡 *Suggest* - Get command recommendations
📚 *Explain* - Understand any command
⚙️ *Run* - Execute commands directly
📥 *Download* - Fetch a file from the server

📊 *Status* - Monitor system resources
🔄 *Clear Agent/Chat* - Reset sessions
⚙️ *Settings* - Configure bot behavior
❓ *Help* - View detailed guide

Select an option below:"
}

pub fn menu_hint_text() -> &'static str {
    "Please use the menu buttons to select an action:"
}

pub fn prompt_text(prompt: Prompt, model: &ModelId) -> String {
    match prompt {
        Prompt::Agent => format!(
            "🤖 *AGENT MODE*
🧠 *Model:* {}

AI assistant that can execute complex multi-step tasks. It can create files, run commands, and keep context across messages.

*Examples:*
• \"Create a Python web scraper\"
• \"Set up a Docker container for Node.js\"
• \"Analyze logs and fix errors\"

📎 *You can also send files!*
Uploaded files land in the agent workspace.

*Send your task or file:*",
            model.display_name()
        ),
        Prompt::Chat => format!(
            "💬 *AI CHAT*
🧠 *Model:* {}

Conversation mode. Ask questions, get explanations, or have a discussion. Messages are remembered in this session.

*Examples:*
• \"Explain how Docker works\"
• \"What's the difference between RAM and storage?\"

💡 *Just keep chatting!* The conversation continues automatically.

*Send your message:*",
            model.display_name()
        ),
        Prompt::Suggest => "💡 *SUGGEST COMMAND*

Describe what you want to do and get command suggestions.

*Examples:*
• \"Find large files over 100MB\"
• \"Compress a folder to tar.gz\"

*What do you want to do?*"
            .to_string(),
        Prompt::Explain => "📚 *EXPLAIN COMMAND*

Get a breakdown of any shell command, its flags and what it does.

*Examples:*
• `docker ps -a`
• `tar -xzf file.tar.gz`

*Send the command:*"
            .to_string(),
        Prompt::Run => "⚙️ *RUN COMMAND*

Execute a command on the server. Dangerous commands are blocked.

*Examples:*
• `ls -la /var/log`
• `df -h`

*Send the command:*"
            .to_string(),
        Prompt::Download => "📥 *DOWNLOAD FILE*

Send the absolute path of a file on the server (max 500 MB).

*Example:*
• `/var/log/syslog`

*Send the path:*"
            .to_string(),
    }
}

pub fn help_text() -> &'static str {
    "❓ *HELP GUIDE*

*🤖 Agent Mode*
Complex multi-step tasks with AI
• Creates files and scripts, runs commands
• Keeps session context, just keep messaging
• Accepts file uploads (max 20 MB)
• Use \"Clear Agent\" for a fresh start

*💬 AI Chat*
Continuous conversation, no command execution
• Use \"Clear Chat\" to reset

*💡 Suggest / 📚 Explain*
Command recommendations and breakdowns

*⚙️ Run Command*
Direct execution with safety checks

*📥 Download File*
Fetch a server file (max 500 MB)

*📊 System Status*
Uptime, load, memory, disk and processes

*⚙️ Settings*
Auto-approve prompts and AI model"
}

pub fn settings_text(preferences: &UserPreferences) -> String {
    let approve = if preferences.auto_approve {
        "✅ ON"
    } else {
        "❌ OFF"
    };
    format!(
        "⚙️ *SETTINGS*

*Auto-Approve Prompts:* {approve}
_Automatically answer agent confirmation prompts_

*AI Model:* {}
_Select which language model to use_

Click the buttons below to configure:",
        preferences.model.display_name()
    )
}

pub fn model_menu_text() -> String {
    let mut text = String::from("🤖 *AI MODEL*\n\n*Available Models:*\n\n");
    for (_, name) in MODELS {
        text.push_str(&format!("• *{name}*\n"));
    }
    text.push_str("\n_Select a model:_");
    text
}
