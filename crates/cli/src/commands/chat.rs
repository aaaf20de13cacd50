//! `kaputa chat` — Interactive or single-message chat mode.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use kaputa_chat::{CancellationToken, ChatSession, ChatStreamEvent, ContextSources, ResponseOutcome, TurnInput};
use kaputa_core::event::EventBus;
use kaputa_core::provider::Attachment;
use kaputa_core::retrieval::Upload;
use kaputa_tools::CaptionFileTranscripts;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::load_config_with_key;
use crate::expand_path;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,

    /// Load a text document as context
    #[arg(short, long)]
    pub document: Option<PathBuf>,

    /// Ground answers in web search results
    #[arg(short, long)]
    pub web: bool,

    /// Load a transcript by media id (captions read from --captions-dir)
    #[arg(short, long)]
    pub transcript: Option<String>,

    /// Directory holding `<media id>.vtt` / `.srt` caption files
    #[arg(long, default_value = ".")]
    pub captions_dir: PathBuf,

    /// Attach an image or audio file to the single message
    #[arg(short, long, requires = "message")]
    pub attach: Option<PathBuf>,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_with_key()?;

    let router = kaputa_providers::router::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;

    let sources = ContextSources::from_config(&config).with_transcripts(Arc::new(
        CaptionFileTranscripts::new(expand_path(args.captions_dir.clone())),
    ));
    let event_bus = Arc::new(EventBus::default());
    let mut session = ChatSession::from_config(&config, provider, event_bus).with_sources(sources);

    if args.web {
        session.sources_mut().set_web_search(true);
    }
    if let Some(path) = &args.document {
        load_document(&mut session, path).await?;
    }
    if let Some(media_id) = &args.transcript {
        session
            .load_transcript(media_id)
            .await
            .map_err(|e| format!("Transcript error: {e}"))?;
    }

    if let Some(message) = args.message {
        let mut input = TurnInput::new(message);
        if let Some(path) = &args.attach {
            input = input.with_attachment(read_attachment(path).await?);
        }
        match run_turn(&mut session, input).await? {
            ResponseOutcome::Failed(e) => return Err(format!("Model error: {e}").into()),
            ResponseOutcome::Replied { .. } | ResponseOutcome::Cancelled => {}
        }
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          Kaputa — Interactive Chat           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.model());
    println!("  Context:   {}", describe_context(session.sources()));
    println!();
    println!("  Commands:  /doc <path>  /transcript <id>  /web on|off  /attach <path>");
    println!("             /clear  /reset  /history  exit");
    println!("  Ctrl+C cancels a reply in progress.");
    println!();

    if let Some(greeting) = session.store().history().first() {
        print_assistant(&greeting.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_attachment: Option<Attachment> = None;

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
            break;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command
                .split_once(' ')
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name {
                "reset" => {
                    session.reset();
                    println!("  [conversation reset]");
                    if let Some(greeting) = session.store().history().first() {
                        print_assistant(&greeting.content);
                    }
                }
                "history" => {
                    for turn in session.store().history() {
                        println!("  [{}] {}", turn.speaker, turn.content);
                    }
                }
                "web" => {
                    let enabled = !matches!(arg, "off" | "false" | "0");
                    session.sources_mut().set_web_search(enabled);
                    println!("  [web search {}]", if enabled { "on" } else { "off" });
                }
                "doc" | "document" if !arg.is_empty() => {
                    if let Err(e) = load_document(&mut session, Path::new(arg)).await {
                        eprintln!("  [Error] {e}");
                    }
                }
                "transcript" if !arg.is_empty() => match session.load_transcript(arg).await {
                    Ok(_) => println!("  [transcript {arg} loaded]"),
                    Err(e) => eprintln!("  [Error] {e}"),
                },
                "attach" if !arg.is_empty() => match read_attachment(Path::new(arg)).await {
                    Ok(attachment) => {
                        println!("  [{} attached to your next message]", attachment.mime_type);
                        pending_attachment = Some(attachment);
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                },
                "clear" => {
                    session.sources_mut().clear_document();
                    session.sources_mut().clear_transcript();
                    println!("  [document and transcript cleared]");
                }
                _ => eprintln!("  [Unknown command: /{name}]"),
            }
            println!("  Context:   {}", describe_context(session.sources()));
            continue;
        }

        let mut input = TurnInput::new(line);
        if let Some(attachment) = pending_attachment.take() {
            input = input.with_attachment(attachment);
        }
        if let Err(e) = run_turn(&mut session, input).await {
            eprintln!("  [Error] {e}");
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

/// Run one turn, rendering events as they arrive. Ctrl+C cancels it.
async fn run_turn(
    session: &mut ChatSession,
    input: TurnInput,
) -> Result<ResponseOutcome, Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(render_events(rx));

    let result = session.submit(input, &tx, &cancel).await;
    drop(tx);
    let streamed = printer.await.unwrap_or(false);
    ctrl_c.abort();

    let outcome = result?;
    if let ResponseOutcome::Replied { turn, .. } = &outcome {
        if !streamed {
            print_assistant(&turn.content);
        }
    }
    Ok(outcome)
}

/// Print streamed chunks progressively. Returns whether any chunk arrived.
async fn render_events(mut rx: mpsc::Receiver<ChatStreamEvent>) -> bool {
    let mut streamed = false;
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event {
            ChatStreamEvent::Started { .. } => {
                eprint!("  ...");
            }
            ChatStreamEvent::Chunk { content } => {
                if !streamed {
                    eprint!("\r     \r");
                    print!("\n  Assistant > ");
                    streamed = true;
                }
                print!("{}", content.replace('\n', "\n    "));
                let _ = stdout.flush();
            }
            ChatStreamEvent::Done { .. } => {
                if streamed {
                    println!("\n");
                } else {
                    eprint!("\r     \r");
                }
            }
            ChatStreamEvent::Error { message } => {
                eprint!("\r     \r");
                if streamed {
                    println!();
                }
                eprintln!("  [Error] {message}");
                println!();
            }
            ChatStreamEvent::Cancelled => {
                eprint!("\r     \r");
                if streamed {
                    println!();
                }
                eprintln!("  [cancelled]");
                println!();
            }
        }
    }

    streamed
}

fn print_assistant(text: &str) {
    println!();
    for line in text.lines() {
        println!("  Assistant > {line}");
    }
    println!();
}

async fn load_document(session: &mut ChatSession, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let path = expand_path(path.to_path_buf());
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    session
        .load_document(&Upload::new(name.clone(), bytes))
        .await
        .map_err(|e| format!("Document error: {e}"))?;
    println!("  [document {name} loaded]");
    Ok(())
}

async fn read_attachment(path: &Path) -> Result<Attachment, Box<dyn std::error::Error>> {
    let path = expand_path(path.to_path_buf());
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;

    attachment_for(&ext, bytes).ok_or_else(|| format!("Unsupported attachment type: .{ext}").into())
}

/// Map a file extension to an image or audio attachment.
fn attachment_for(ext: &str, bytes: Vec<u8>) -> Option<Attachment> {
    let attachment = match ext {
        "png" => Attachment::image("image/png", bytes),
        "jpg" | "jpeg" => Attachment::image("image/jpeg", bytes),
        "webp" => Attachment::image("image/webp", bytes),
        "gif" => Attachment::image("image/gif", bytes),
        "mp3" => Attachment::audio("audio/mpeg", bytes),
        "wav" => Attachment::audio("audio/wav", bytes),
        "ogg" => Attachment::audio("audio/ogg", bytes),
        "m4a" => Attachment::audio("audio/mp4", bytes),
        "flac" => Attachment::audio("audio/flac", bytes),
        _ => return None,
    };
    Some(attachment)
}

fn describe_context(sources: &ContextSources) -> String {
    let mut parts = Vec::new();
    if sources.web_search_enabled() {
        parts.push("web search".to_string());
    }
    if let Some(id) = sources.active_document() {
        parts.push(format!("document {}", short_id(id)));
    }
    if let Some(id) = sources.active_transcript() {
        parts.push(id.to_string());
    }
    if parts.is_empty() {
        "none".into()
    } else {
        parts.join(", ")
    }
}

fn short_id(id: &str) -> &str {
    let end = id.char_indices().nth(16).map(|(i, _)| i).unwrap_or(id.len());
    &id[..end]
}
