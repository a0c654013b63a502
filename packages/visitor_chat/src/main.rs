use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use visitor_chat::config::{FileConfig, default_data_dir, load_config};
use visitor_chat::model::format_time;
use visitor_chat::{
    AttachmentKind, ChatConfig, SenderType, SessionActor, SessionEvent, SessionHandle,
    SessionPhase, SessionStore, StagedFile,
};

#[derive(Parser)]
#[command(name = "visitor-chat")]
#[command(about = "Chat with a website's support team from the terminal")]
struct Cli {
    /// Config file (default: <data-dir>/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the session token and default config
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Chat API base URL (overrides config)
    #[arg(long)]
    api_url: Option<String>,

    /// Visitor name, used when no session exists yet
    #[arg(long)]
    name: Option<String>,

    /// Visitor email, used when no session exists yet
    #[arg(long)]
    email: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

const HELP: &str = "\
Commands:
  /start <name> <email>   start a new chat
  /attach <path>          stage a file for the next message
  /detach                 drop the staged file
  /open, /close, /toggle  show or hide the chat window
  /reconnect              retry the realtime connection
  /status                 show connection state
  /quit                   leave (the session is kept)
Anything else is sent as a message.";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they don't interleave with the transcript
    let default_directive = if cli.debug {
        "visitor_chat=debug,info"
    } else {
        "visitor_chat=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let config_path = cli
        .config
        .unwrap_or_else(|| data_dir.join("config.toml"));
    let config = resolve_config(&config_path, cli.api_url)?;
    info!("Using chat API at {}", config.api_url);

    let api_url = config.api_url.clone();
    let store = SessionStore::in_dir(&data_dir);
    let (handle, events) = SessionActor::spawn(config, store);
    let renderer = tokio::spawn(render_events(events, api_url));

    let snapshot = handle.snapshot().await?;
    if snapshot.phase == SessionPhase::NoSession {
        match (cli.name, cli.email) {
            (Some(name), Some(email)) => handle.start_chat(name, email).await?,
            _ => println!("No active chat. Use /start <name> <email> to begin, /help for help."),
        }
    }

    read_commands(&handle).await?;

    handle.shutdown().await?;
    renderer.abort();
    Ok(())
}

fn resolve_config(config_path: &Path, api_url: Option<String>) -> Result<ChatConfig> {
    let mut file_config: FileConfig = load_config(config_path)
        .extract()
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(url) = api_url {
        file_config.api_url = Some(url);
    }
    Ok(ChatConfig::from_file(&file_config)?)
}

async fn read_commands(handle: &SessionHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/start" => match rest.rsplit_once(' ') {
                Some((name, email)) => handle.start_chat(name, email).await?,
                None => println!("usage: /start <name> <email>"),
            },
            "/attach" => match StagedFile::from_path(Path::new(rest)) {
                Ok(file) => {
                    println!("* attached {} ({} bytes)", file.file_name, file.bytes.len());
                    handle.stage_file(file).await?;
                }
                Err(e) => println!("! could not read {}: {}", rest, e),
            },
            "/detach" => handle.clear_file().await?,
            "/open" => handle.open_window().await?,
            "/close" => handle.close_window().await?,
            "/toggle" => handle.toggle_window().await?,
            "/reconnect" => handle.reconnect().await?,
            "/status" => {
                let s = handle.snapshot().await?;
                println!(
                    "* {:?}, {}, retries {}{}, {} messages{}",
                    s.phase,
                    if s.connected { "connected" } else { "disconnected" },
                    s.attempt_count,
                    if s.reconnect_exhausted { " (gave up)" } else { "" },
                    s.message_count,
                    s.staged_file
                        .map(|f| format!(", staged {}", f))
                        .unwrap_or_default(),
                );
            }
            _ => {
                handle.keystroke().await?;
                handle.submit(line).await?;
            }
        }
    }

    debug!("Input closed");
    Ok(())
}

async fn render_events(mut events: mpsc::UnboundedReceiver<SessionEvent>, api_url: String) {
    while let Some(event) = events.recv().await {
        render(&event, &api_url);
    }
}

fn render(event: &SessionEvent, api_url: &str) {
    match event {
        SessionEvent::Render {
            body,
            sender,
            timestamp,
            attachments,
            ..
        } => {
            let who = match sender {
                SenderType::Visitor => "you",
                SenderType::Operator => "support",
                SenderType::System => "system",
                SenderType::Unknown => "unknown",
            };
            let time = format_time(&timestamp.unwrap_or_else(Utc::now));
            if !body.is_empty() || attachments.is_empty() {
                println!("[{}] {}: {}", time, who, body);
            }
            for attachment in attachments {
                let icon = match attachment.kind {
                    AttachmentKind::Image => "🖼",
                    AttachmentKind::File => "📎",
                };
                println!(
                    "[{}] {}: {} {} <{}>",
                    time,
                    who,
                    icon,
                    attachment.file_name,
                    attachment.resolve(api_url)
                );
            }
        }
        SessionEvent::Phase(phase) => match phase {
            SessionPhase::NoSession => println!("* No active chat. Use /start <name> <email>."),
            SessionPhase::AwaitingBootstrap => println!("* Starting chat..."),
            SessionPhase::Active => println!("* Chat started."),
        },
        SessionEvent::Connection { connected: true } => println!("* Connected"),
        SessionEvent::Connection { connected: false } => println!("* Disconnected"),
        SessionEvent::ReconnectExhausted => {
            println!("* Connection lost. Messages will be sent over HTTP; /reconnect to retry.")
        }
        SessionEvent::NewMessage => {
            // terminal bell
            print!("\x07");
            let _ = std::io::stdout().flush();
        }
        SessionEvent::OperatorTyping => println!("* support is typing..."),
        SessionEvent::SessionClosed => println!("* This chat session has been closed."),
        SessionEvent::Alert(text) => eprintln!("! {}", text),
        SessionEvent::Window { open } => {
            println!("* Chat window {}", if *open { "opened" } else { "closed" })
        }
        SessionEvent::ScrollToBottom => {}
    }
}
