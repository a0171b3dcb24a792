//! Model selection command

use colloquy_ai::{GigaChatModel, Provider};

use super::CommandResult;

/// Well-known YandexGPT model names. Full `gpt://` URIs are accepted too.
const YANDEX_MODELS: &[&str] = &["yandexgpt/rc", "yandexgpt/latest", "yandexgpt-lite/latest"];

pub struct ModelCommand;

impl ModelCommand {
    pub fn execute(args: &str, provider: Provider, current: &str) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(Self::show(provider, current));
        }

        match provider {
            Provider::GigaChat => {
                // Unknown ids would silently fall back to the base model on the wire
                match GigaChatModel::all()
                    .into_iter()
                    .find(|m| m.id().eq_ignore_ascii_case(args))
                {
                    Some(model) => CommandResult::SetModel(model.id().to_string()),
                    None => CommandResult::Message(format!(
                        "Unknown GigaChat model: {}\n{}",
                        args,
                        Self::show(provider, current)
                    )),
                }
            }
            Provider::Yandex => CommandResult::SetModel(args.to_string()),
        }
    }

    fn known_models(provider: Provider) -> Vec<&'static str> {
        match provider {
            Provider::GigaChat => GigaChatModel::all().iter().map(|m| m.id()).collect(),
            Provider::Yandex => YANDEX_MODELS.to_vec(),
        }
    }

    fn show(provider: Provider, current: &str) -> String {
        let mut lines = vec![format!("Model: {} ({})", current, provider)];
        lines.push(String::new());
        lines.push("Known models:".to_string());
        for model in Self::known_models(provider) {
            let marker = if model.eq_ignore_ascii_case(current) { "*" } else { " " };
            lines.push(format!("  {} {}", marker, model));
        }
        lines.push(String::new());
        lines.push("Usage: /model <name>".to_string());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gigachat_model_normalized() {
        assert_eq!(
            ModelCommand::execute("gigachat-2-max", Provider::GigaChat, "GigaChat-2"),
            CommandResult::SetModel("GigaChat-2-Max".to_string())
        );
    }

    #[test]
    fn test_gigachat_unknown_model_rejected() {
        let result = ModelCommand::execute("gpt-4", Provider::GigaChat, "GigaChat-2");
        assert!(matches!(result, CommandResult::Message(msg) if msg.contains("Unknown GigaChat model")));
    }

    #[test]
    fn test_yandex_accepts_any_model() {
        assert_eq!(
            ModelCommand::execute("gpt://b1g/yandexgpt/rc", Provider::Yandex, "yandexgpt/rc"),
            CommandResult::SetModel("gpt://b1g/yandexgpt/rc".to_string())
        );
    }

    #[test]
    fn test_show_lists_provider_models() {
        let CommandResult::Message(msg) = ModelCommand::execute("", Provider::GigaChat, "GigaChat-2-Pro")
        else {
            panic!("expected message");
        };
        assert!(msg.contains("* GigaChat-2-Pro"));
        assert!(msg.contains("GigaChat-2-Max"));
    }
}
