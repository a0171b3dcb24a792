//! Compression policy command

use colloquy_agent::CompressionPolicy;

use super::CommandResult;

pub struct PolicyCommand;

impl PolicyCommand {
    pub fn execute(args: &str, current: CompressionPolicy) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(Self::show(current));
        }

        match args.parse::<CompressionPolicy>() {
            Ok(policy) => CommandResult::SetPolicy(policy),
            Err(e) => CommandResult::Message(e),
        }
    }

    fn show(current: CompressionPolicy) -> String {
        let mut lines = vec![format!("Compression policy: {}", current)];
        lines.push(String::new());
        lines.push("Available policies:".to_string());
        for policy in CompressionPolicy::all() {
            let marker = if policy == current { "*" } else { " " };
            lines.push(format!(
                "  {} {:<10} {}",
                marker,
                policy.as_str(),
                Self::describe(policy)
            ));
        }
        lines.push(String::new());
        lines.push("Usage: /policy <none|truncate|summarize>".to_string());
        lines.join("\n")
    }

    fn describe(policy: CompressionPolicy) -> &'static str {
        match policy {
            CompressionPolicy::None => "Send the full history",
            CompressionPolicy::Truncate => "Send only the most recent messages",
            CompressionPolicy::Summarize => "Summarize older messages, keep recent ones verbatim",
        }
    }
}
