//! colloquy - chat client for GigaChat and YandexGPT

mod commands;
mod config;

use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use colloquy_agent::{
    ChatSession, CompactionConfig, CompressionPolicy, JsonFileStore, SessionConfig, SessionEvent,
    SessionHandle,
};
use colloquy_ai::providers::{gigachat::GigaChatProvider, yandex::YandexProvider};
use colloquy_ai::{ChatTransport, Message, Provider, ResponseFormat, UsageRecord};

use commands::CommandResult;

/// colloquy - chat with GigaChat and YandexGPT, with history compression
#[derive(Parser, Debug)]
#[command(name = "colloquy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider (gigachat, yandex)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use (default: the provider's default model)
    #[arg(short, long)]
    model: Option<String>,

    /// History compression (none, truncate, summarize)
    #[arg(long)]
    policy: Option<String>,

    /// Ask for very short, bulleted answers
    #[arg(short, long)]
    strict: bool,

    /// Stream replies when the provider supports it
    #[arg(long)]
    stream: bool,

    /// Never stream replies
    #[arg(long, conflicts_with = "stream")]
    no_stream: bool,

    /// Ask for replies formatted as JSON
    #[arg(long)]
    json: bool,

    /// Maximum tokens per reply
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Directory for conversation state
    #[arg(long)]
    data_dir: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    // Prefix match covers colloquy_ai and colloquy_agent too
    let filter = if verbose {
        EnvFilter::new("colloquy=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// One transport per provider with credentials available
fn build_transports(config: &config::Config) -> Vec<Arc<dyn ChatTransport>> {
    let mut transports: Vec<Arc<dyn ChatTransport>> = Vec::new();

    if let Some(gigachat) = config.gigachat_config() {
        transports.push(Arc::new(GigaChatProvider::new(gigachat)));
    }
    if let Some(yandex) = config.yandex_config() {
        transports.push(Arc::new(YandexProvider::new(yandex)));
    }

    tracing::debug!("Configured {} transport(s)", transports.len());
    transports
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = config::Config::init()?;
        println!("Config file: {}", path.display());
        println!();
        println!("Example configuration:");
        println!("{}", config::example_config());
        return Ok(());
    }

    // CLI args override config file
    let cfg = config::Config::load();

    let provider: Provider = args
        .provider
        .as_deref()
        .or(cfg.provider.as_deref())
        .unwrap_or("gigachat")
        .parse()
        .map_err(anyhow::Error::msg)?;

    // A configured model belongs to the configured provider
    let model = args
        .model
        .clone()
        .or_else(|| cfg.model.clone().filter(|_| args.provider.is_none()))
        .unwrap_or_else(|| provider.default_model().to_string());

    let defaults = CompactionConfig::default();
    let session_config = SessionConfig {
        provider,
        model,
        max_tokens: args.max_tokens.or(cfg.max_tokens),
        temperature: args.temperature.or(cfg.temperature).unwrap_or(0.0),
        strict_mode: args.strict || cfg.strict_mode.unwrap_or(false),
        use_streaming: !args.no_stream && (args.stream || cfg.stream.unwrap_or(false)),
        format: if args.json {
            ResponseFormat::Json
        } else {
            ResponseFormat::Text
        },
        compaction: CompactionConfig {
            window_size: cfg.context_window.unwrap_or(defaults.window_size),
            block_size: cfg.block_size.unwrap_or(defaults.block_size),
            ..defaults
        },
        ..SessionConfig::default()
    };

    let data_dir = args
        .data_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.data_dir());
    tracing::debug!("Using data directory {}", data_dir.display());

    let transports = build_transports(&cfg);
    if transports.is_empty() {
        anyhow::bail!(
            "No provider credentials found. Set GIGACHAT_AUTH_KEY or YANDEX_API_KEY, \
             or add them to {}",
            config::Config::config_path().display()
        );
    }

    let mut session = ChatSession::new(session_config, Arc::new(JsonFileStore::new(data_dir)));
    for transport in transports {
        session.add_transport(transport);
    }
    session
        .set_provider(provider)
        .map_err(|e| anyhow::anyhow!("{}. Check the credentials for {}.", e, provider))?;

    if let Some(policy) = args.policy.as_deref().or(cfg.policy.as_deref()) {
        let policy: CompressionPolicy = policy.parse().map_err(anyhow::Error::msg)?;
        session.set_policy(policy);
    }

    if let Some(prompt) = args.command {
        run_command(&mut session, &prompt, args.verbose).await
    } else {
        run_interactive(&mut session, args.verbose).await
    }
}

/// Prints session events as they arrive
struct Renderer {
    verbose: bool,
    /// Whether the current reply arrived as deltas
    streamed: bool,
    last_usage: Option<UsageRecord>,
}

impl Renderer {
    fn new(verbose: bool) -> Self {
        Self {
            verbose,
            streamed: false,
            last_usage: None,
        }
    }

    fn render(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SendStart => {
                self.streamed = false;
                self.last_usage = None;
            }
            SessionEvent::CompactionStart { messages } => {
                eprintln!("[Summarizing {} older messages...]", messages);
            }
            SessionEvent::CompactionEnd {
                summarized,
                compressed_through,
            } => {
                if self.verbose {
                    eprintln!(
                        "[Summarized {} messages; {} compressed so far]",
                        summarized, compressed_through
                    );
                }
            }
            SessionEvent::CompactionFailed { message } => {
                eprintln!("[Summary skipped: {}]", message);
            }
            SessionEvent::StreamStart => {
                self.streamed = true;
            }
            SessionEvent::StreamDelta { text } => {
                print!("{}", text);
                let _ = io::stdout().flush();
            }
            SessionEvent::MessageEnd { message } => {
                if self.streamed {
                    println!();
                } else {
                    println!("{}", message.content);
                }
            }
            SessionEvent::UsageUpdated { last_request, .. } => {
                self.last_usage = Some(last_request);
            }
            SessionEvent::Error { .. } => {
                // Finish a partially streamed line; the error itself is
                // reported by the caller
                if self.streamed {
                    println!();
                }
            }
            SessionEvent::SendEnd => {
                let usage = self.last_usage.take();
                if let (true, Some(usage)) = (self.verbose, usage) {
                    eprintln!(
                        "[Tokens: {} in, {} out, {} total]",
                        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                    );
                }
            }
            SessionEvent::StreamCleared | SessionEvent::Cleared => {}
        }
    }
}

/// What a Ctrl-C does
#[derive(Debug, PartialEq)]
enum Interrupt {
    /// A send was in flight and has been aborted
    Abort,
    /// Nothing was running; leave the program
    Exit,
}

fn interrupt(handle: &SessionHandle) -> Interrupt {
    if handle.is_busy() {
        handle.abort();
        Interrupt::Abort
    } else {
        Interrupt::Exit
    }
}

/// One process-wide Ctrl-C listener: it aborts a send in flight and exits
/// at the prompt.
fn spawn_interrupt_listener(handle: SessionHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt(&handle) == Interrupt::Exit {
                println!();
                std::process::exit(130);
            }
        }
    });
}

/// Send one turn, rendering events until the send completes
async fn send_and_render(
    session: &mut ChatSession,
    events: &mut broadcast::Receiver<SessionEvent>,
    renderer: &mut Renderer,
    input: &str,
) -> colloquy_agent::Result<Option<Message>> {
    let send = session.send(input);
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            Ok(event) = events.recv() => renderer.render(event),
        }
    };

    // Events sent right before the send returned, up to its SendEnd
    while let Ok(event) = events.try_recv() {
        let terminal = event.is_terminal();
        renderer.render(event);
        if terminal {
            break;
        }
    }

    result
}

async fn run_command(session: &mut ChatSession, prompt: &str, verbose: bool) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let mut renderer = Renderer::new(verbose);
    spawn_interrupt_listener(session.handle());

    send_and_render(session, &mut events, &mut renderer, prompt).await?;
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

async fn run_interactive(session: &mut ChatSession, verbose: bool) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let mut renderer = Renderer::new(verbose);
    spawn_interrupt_listener(session.handle());

    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        let config = session.config();
        eprintln!(
            "colloquy ({} / {}) policy: {}",
            config.provider,
            config.model,
            session.policy()
        );
        if !session.messages().is_empty() {
            eprintln!("Resumed conversation with {} messages.", session.messages().len());
        }
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // Handle slash commands
        if let Some(result) = commands::execute_command(input, session) {
            match result {
                CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                CommandResult::Clear => {
                    session.clear_conversation();
                    println!("Cleared conversation.");
                }
                CommandResult::ResetUsage => {
                    session.reset_session_usage();
                    println!("Session usage reset for {}.", session.config().provider);
                }
                CommandResult::SetPolicy(policy) => {
                    session.set_policy(policy);
                    println!("Compression policy: {}", policy);
                }
                CommandResult::SetStrict(enabled) => {
                    session.set_strict_mode(enabled);
                    println!("Strict mode: {}", on_off(enabled));
                }
                CommandResult::SetStream(enabled) => {
                    session.set_streaming(enabled);
                    println!("Streaming: {}", on_off(enabled));
                }
                CommandResult::SetFormat(format) => {
                    session.set_format(format);
                    println!("Reply format: {}", commands::format_name(format));
                }
                CommandResult::SetProvider(provider) => match session.set_provider(provider) {
                    Ok(()) => println!(
                        "Switched to: {} ({})",
                        provider,
                        session.config().model
                    ),
                    Err(e) => println!("{}", e),
                },
                CommandResult::SetModel(model) => {
                    println!("Model: {}", model);
                    session.set_model(model);
                }
                CommandResult::Exit => {
                    break;
                }
            }
            continue;
        }

        if let Err(e) = send_and_render(session, &mut events, &mut renderer, input).await {
            if e.is_aborted() {
                eprintln!("[Aborted]");
            } else {
                eprintln!("Error: {}", e);
                if matches!(&e, colloquy_agent::Error::Ai(inner) if inner.is_connection_error()) {
                    eprintln!("[Could not reach the provider; check the network and try again]");
                }
            }
        }
        println!();
    }

    Ok(())
}
