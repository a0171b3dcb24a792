//! Token usage report

use colloquy_agent::ChatSession;
use colloquy_ai::{Provider, UsageRecord};

use super::CommandResult;

pub struct UsageCommand;

impl UsageCommand {
    pub fn execute(session: &ChatSession) -> CommandResult {
        let usage = session.usage();
        let mut lines = vec![format!(
            "{:<12} {:<9} {:>10} {:>10} {:>10}",
            "Provider", "Scope", "Prompt", "Reply", "Total"
        )];

        for provider in Provider::all() {
            let scopes = [
                ("last", usage.last_request(provider)),
                ("session", usage.session(provider)),
                ("lifetime", usage.lifetime(provider)),
            ];
            for (scope, record) in scopes {
                lines.push(Self::row(provider, scope, &record));
            }
        }

        CommandResult::Message(lines.join("\n"))
    }

    fn row(provider: Provider, scope: &str, record: &UsageRecord) -> String {
        format!(
            "{:<12} {:<9} {:>10} {:>10} {:>10}",
            provider.name(),
            scope,
            record.prompt_tokens,
            record.completion_tokens,
            record.total_tokens
        )
    }
}
