//! Slash command handling

mod model;
mod policy;
mod usage;

pub use model::ModelCommand;
pub use policy::PolicyCommand;
pub use usage::UsageCommand;

use colloquy_agent::{ChatSession, CompressionPolicy};
use colloquy_ai::{Provider, ResponseFormat};

/// Result of executing a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Display a message to the user
    Message(String),
    /// Clear the conversation
    Clear,
    /// Zero the session usage of the current provider
    ResetUsage,
    SetPolicy(CompressionPolicy),
    SetStrict(bool),
    SetStream(bool),
    SetFormat(ResponseFormat),
    SetProvider(Provider),
    SetModel(String),
    /// Exit the application
    Exit,
}

/// Try to execute a slash command. Returns `None` for plain chat input.
pub fn execute_command(input: &str, session: &ChatSession) -> Option<CommandResult> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }

    let parts: Vec<&str> = input[1..].splitn(2, ' ').collect();
    let cmd = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    let config = session.config();
    let result = match cmd.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),
        "clear" => CommandResult::Clear,
        "usage" => UsageCommand::execute(session),
        "reset-usage" => CommandResult::ResetUsage,
        "policy" => PolicyCommand::execute(args, session.policy()),
        "strict" => toggle(args, "Strict mode", config.strict_mode, CommandResult::SetStrict),
        "stream" => toggle(args, "Streaming", config.use_streaming, CommandResult::SetStream),
        "format" => format_command(args, config.format),
        "provider" => provider_command(args, session),
        "model" => ModelCommand::execute(args, config.provider, &config.model),
        "summaries" => summaries_message(session),
        "context" => context_message(session),
        "quit" | "exit" | "q" => CommandResult::Exit,
        _ => CommandResult::Message(format!(
            "Unknown command: /{}. Type /help for available commands.",
            cmd
        )),
    };

    Some(result)
}

/// Parse an on/off argument; no argument flips the current value
fn toggle(
    args: &str,
    label: &str,
    current: bool,
    set: fn(bool) -> CommandResult,
) -> CommandResult {
    match args.to_lowercase().as_str() {
        "" => set(!current),
        "on" | "true" | "1" | "yes" => set(true),
        "off" | "false" | "0" | "no" => set(false),
        other => CommandResult::Message(format!(
            "{}: expected on or off, got '{}'",
            label, other
        )),
    }
}

fn format_command(args: &str, current: ResponseFormat) -> CommandResult {
    match args.to_lowercase().as_str() {
        "" => CommandResult::Message(format!(
            "Reply format: {}\nUsage: /format <text|json>",
            format_name(current)
        )),
        "text" => CommandResult::SetFormat(ResponseFormat::Text),
        "json" => CommandResult::SetFormat(ResponseFormat::Json),
        other => CommandResult::Message(format!("Unknown format: {}", other)),
    }
}

pub fn format_name(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Text => "text",
        ResponseFormat::Json => "json",
    }
}

fn provider_command(args: &str, session: &ChatSession) -> CommandResult {
    if args.is_empty() {
        let mut lines = vec![format!("Provider: {}", session.config().provider)];
        lines.push(String::new());
        lines.push("Available:".to_string());
        for provider in session.available_providers() {
            let marker = if provider == session.config().provider { "*" } else { " " };
            lines.push(format!("  {} {:<10} {}", marker, provider.id(), provider.name()));
        }
        return CommandResult::Message(lines.join("\n"));
    }

    match args.parse::<Provider>() {
        Ok(provider) => CommandResult::SetProvider(provider),
        Err(e) => CommandResult::Message(e),
    }
}

fn summaries_message(session: &ChatSession) -> CommandResult {
    let summaries = session.summaries();
    if summaries.is_empty() {
        return CommandResult::Message("No summaries yet.".to_string());
    }

    let mut lines = vec![format!(
        "{} summaries covering the first {} messages:",
        summaries.len(),
        session.compressed_through()
    )];
    for (i, summary) in summaries.iter().enumerate() {
        lines.push(String::new());
        lines.push(format!(
            "[{}] {} messages, {}",
            i + 1,
            summary.original_message_count,
            summary.created_at.format("%Y-%m-%d %H:%M")
        ));
        lines.push(summary.content.clone());
    }
    CommandResult::Message(lines.join("\n"))
}

fn context_message(session: &ChatSession) -> CommandResult {
    let context = session.context();
    let conversation = session.conversation();
    let mut lines = vec![format!(
        "Next request carries {} of {} messages (policy: {}, {} not yet summarized)",
        context.len(),
        conversation.messages.len(),
        session.policy(),
        conversation.uncompressed_count()
    )];
    for message in &context {
        let preview: String = message.content.chars().take(60).collect();
        let ellipsis = if message.content.chars().count() > 60 { "..." } else { "" };
        lines.push(format!(
            "  {:<9} {}{}",
            message.role.as_str(),
            preview.replace('\n', " "),
            ellipsis
        ));
    }
    CommandResult::Message(lines.join("\n"))
}

/// Generate help message
pub fn help_message() -> String {
    r#"Available commands:
  /help              Show this help message
  /clear             Clear the conversation (usage totals are kept)
  /usage             Show token usage for every provider
  /reset-usage       Zero the session usage of the current provider
  /policy [p]        Show or set history compression (none, truncate, summarize)
  /strict [on|off]   Toggle very short, bulleted answers
  /stream [on|off]   Toggle streamed replies
  /format [f]        Show or set the reply format (text, json)
  /provider [name]   Show or switch provider (gigachat, yandex)
  /model [name]      Show or set the model
  /summaries         Show stored summaries of older messages
  /context           Preview what the next request will send
  /quit              Exit"#
        .to_string()
}
