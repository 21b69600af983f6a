//! Interactive chat client for a chatwire backend.
//!
//! This binary provides a streaming REPL on top of the chatwire library:
//! responses render token by token, Ctrl+C cancels the in-flight turn, and
//! live usage statistics arrive over the resilient socket client.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local backend
//! chatwire-chat
//!
//! # Point at another backend
//! chatwire-chat --url http://chat.example.com:8000
//!
//! # Set a system prompt for every request
//! chatwire-chat --system "You are a helpful assistant"
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/config` - Show the backend's generation configuration
//! - `/stats` - Show aggregate usage statistics
//! - `/live` - Show the latest pushed statistics snapshot
//! - `/reset-stats` - Reset aggregate usage statistics
//! - `/temperature <t>` - Override the sampling temperature
//! - `/max-tokens <n>` - Override the response token cap
//! - `/system [prompt]` - Set or clear the system prompt
//! - `/quit` - Exit the application

use std::io::Write;
use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use arrrg_derive::CommandLine;
use futures::StreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;

use chatwire::{
    AccumulatingTurn, BackendClient, ChatRequest, ChatTurn, ResilientSocketClient,
    StreamingChatSession, TurnEvent,
};

/// Command-line arguments for the chatwire-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
struct ChatArgs {
    /// Backend base URL.
    #[arrrg(optional, "Backend base URL (default: http://localhost:8000)", "URL")]
    url: Option<String>,

    /// System prompt sent with every request.
    #[arrrg(optional, "System prompt for every request", "PROMPT")]
    system: Option<String>,

    /// Token cap sent with every request.
    #[arrrg(optional, "Max tokens per response (backend default if unset)", "TOKENS")]
    max_tokens: Option<u32>,
}

fn help_text() -> &'static str {
    "/help              Show this help
/config            Show the backend's generation configuration
/stats             Show aggregate usage statistics
/live              Show the latest pushed statistics snapshot
/reset-stats       Reset aggregate usage statistics
/temperature <t>   Override the sampling temperature
/max-tokens <n>    Override the response token cap
/system [prompt]   Set or clear the system prompt
/quit              Exit"
}

/// Main entry point for the chatwire-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("chatwire-chat [OPTIONS]");

    let client = BackendClient::new(args.url)?;
    let session = StreamingChatSession::new(client.clone());
    let (stats_client, mut stats_events) = ResilientSocketClient::connect(client.socket_url()?);
    // Keep the event channel drained; the latest snapshot is read on demand.
    tokio::spawn(async move { while stats_events.recv().await.is_some() {} });

    let mut rl = DefaultEditor::new()?;
    let mut history: Vec<ChatTurn> = Vec::new();
    let mut next_id: u64 = 0;
    let mut system = args.system;
    let mut temperature: Option<f32> = None;
    let mut max_tokens = args.max_tokens;

    // Ctrl+C during streaming cancels the in-flight turn.
    let current_turn: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let current_turn_for_handler = Arc::clone(&current_turn);
    ctrlc::set_handler(move || {
        if let Some(token) = current_turn_for_handler.lock().unwrap().as_ref() {
            token.cancel();
        }
    })?;

    println!("chatwire chat ({})", client.base_url());
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);

                if let Some(rest) = line.strip_prefix('/') {
                    let (cmd, arg) = match rest.split_once(' ') {
                        Some((cmd, arg)) => (cmd, arg.trim()),
                        None => (rest, ""),
                    };
                    match cmd {
                        "quit" | "exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        "help" => {
                            for help_line in help_text().lines() {
                                println!("    {}", help_line);
                            }
                        }
                        "config" => match client.generation_config().await {
                            Ok(config) => println!(
                                "model: {}  temperature: {}  max_tokens: {}",
                                config.model, config.temperature, config.max_tokens
                            ),
                            Err(e) => eprintln!("error: {}", e),
                        },
                        "stats" => match client.usage_stats().await {
                            Ok(stats) => println!(
                                "chats: {}  tokens: {}  avg response: {:.2}s",
                                stats.total_chats,
                                stats.total_tokens,
                                stats.average_response_time
                            ),
                            Err(e) => eprintln!("error: {}", e),
                        },
                        "live" => {
                            stats_client.request_snapshot();
                            match stats_client.snapshot() {
                                Some(snapshot) => println!("{}", snapshot.as_value()),
                                None => println!("no live data ({:?})", stats_client.state()),
                            }
                        }
                        "reset-stats" => match client.reset_stats().await {
                            Ok(()) => println!("Statistics reset."),
                            Err(e) => eprintln!("error: {}", e),
                        },
                        "temperature" => match arg.parse::<f32>() {
                            Ok(value) => {
                                temperature = Some(value);
                                println!("temperature set to {:.2}", value);
                            }
                            Err(_) if arg.is_empty() => {
                                temperature = None;
                                println!("temperature reset to backend default");
                            }
                            Err(_) => eprintln!("usage: /temperature <t>"),
                        },
                        "max-tokens" => match arg.parse::<u32>() {
                            Ok(value) => {
                                max_tokens = Some(value);
                                println!("max_tokens set to {}", value);
                            }
                            Err(_) if arg.is_empty() => {
                                max_tokens = None;
                                println!("max_tokens reset to backend default");
                            }
                            Err(_) => eprintln!("usage: /max-tokens <n>"),
                        },
                        "system" => {
                            if arg.is_empty() {
                                system = None;
                                println!("System prompt cleared.");
                            } else {
                                system = Some(arg.to_string());
                                println!("System prompt set.");
                            }
                        }
                        _ => eprintln!("Unknown command: /{} (try /help)", cmd),
                    }
                    continue;
                }

                // Regular message - one streaming turn
                let mut request = ChatRequest::new(line.clone());
                if let Some(t) = temperature {
                    request = request.with_temperature(t);
                }
                if let Some(n) = max_tokens {
                    request = request.with_max_tokens(n);
                }
                if let Some(s) = &system {
                    request = request.with_system_prompt(s.clone());
                }

                let turn_stream = match session.send(request).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        eprintln!("error: {}", e);
                        continue;
                    }
                };

                history.push(ChatTurn::user(next_id, line));
                next_id += 1;
                let pending = ChatTurn::assistant_pending(next_id);
                next_id += 1;

                *current_turn.lock().unwrap() = Some(turn_stream.cancellation_token());
                let (mut events, finished) = AccumulatingTurn::new(turn_stream, pending);

                print!("Assistant: ");
                let mut cancelled = true;
                while let Some(event) = events.next().await {
                    match event {
                        TurnEvent::Delta(fragment) => {
                            print!("{}", fragment);
                            let _ = std::io::stdout().flush();
                        }
                        TurnEvent::Completed => {
                            println!();
                            cancelled = false;
                        }
                        TurnEvent::Failed(reason) => {
                            println!();
                            eprintln!("error: {}", reason);
                            cancelled = false;
                        }
                    }
                }
                if cancelled {
                    println!("\n[cancelled]");
                }
                drop(events);
                *current_turn.lock().unwrap() = None;

                if let Ok(turn) = finished.await {
                    history.push(turn);
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Input error: {}", err);
                break;
            }
        }
    }

    Ok(())
}
