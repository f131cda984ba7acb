use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voxline::cli::{Cli, Commands, ConfigAction, SpeechArgs};
use voxline::config::{Config, TtsConfig};
use voxline::conversation::Conversation;
use voxline::history::{ConversationSink, HistoryQuery, JsonlHistory};
use voxline::output;
use voxline::reply::{RESPONDER_IDS, build_responder, responder_from_config};
use voxline::tts::registry::BackendRegistry;
use voxline::tts::{ProgressCallback, StreamingOptions, StreamingTts, split_text};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Speak {
            text,
            file,
            speech,
            no_preview,
            timeout,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let text = read_input(text, file.as_deref())?;
            run_speak(config, &speech, &text, no_preview, timeout, cli.quiet)?;
        }
        Commands::Chunk {
            text,
            max_chunk_size,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let text = read_input(text, None)?;
            let size = max_chunk_size.unwrap_or(config.tts.max_chunk_size).max(1);
            print_chunks(&split_text(&text, size), json)?;
        }
        Commands::Chat {
            session,
            responder,
            no_speak,
            no_history,
            speech,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(responder) = responder {
                config.reply.backend = responder;
            }
            if no_speak {
                config.conversation.speak_replies = false;
            }
            if no_history {
                config.history.enabled = false;
            }
            run_chat(config, &speech, session, cli.quiet)?;
        }
        Commands::History {
            session,
            user,
            limit,
            offset,
            json,
            stats,
            prune,
        } => {
            let config = load_config(cli.config.as_deref())?;
            if prune {
                prune_history(&config)?;
                return Ok(());
            }
            let query = HistoryQuery {
                session_id: session,
                user_id: user,
                limit,
                offset,
            };
            show_history(&config, query, json, stats)?;
        }
        Commands::Backends => {
            let config = load_config(cli.config.as_deref())?;
            show_backends(&config);
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "voxline", &mut io::stdout());
        }
    }

    Ok(())
}

/// `-q` shows errors only, `-v` debug, `-vv` trace. `RUST_LOG` wins when set.
fn init_logging(verbose: u8, quiet: bool) {
    let filter = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "warn,voxline=debug",
        (false, _) => "info,voxline=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path()?)?
    };

    // Apply environment variable overrides
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Text from the argument, a file, or stdin (when absent or `-`).
fn read_input(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    match text {
        Some(text) if text != "-" => Ok(text),
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read text from stdin")?;
            Ok(buffer)
        }
    }
}

fn apply_speech_args(tts: &mut TtsConfig, args: &SpeechArgs) {
    if let Some(synthesizer) = &args.synthesizer {
        tts.synthesizer = synthesizer.clone();
    }
    if let Some(player) = &args.player {
        tts.player = player.clone();
    }
    if let Some(size) = args.max_chunk_size {
        tts.max_chunk_size = size.max(1);
    }
    if let Some(size) = args.queue_size {
        tts.queue_size = size.max(1);
    }
    if args.cache_to_disk {
        tts.cache_to_disk = true;
    }
}

fn build_speech(tts: &TtsConfig) -> Result<StreamingTts> {
    let registry = BackendRegistry::with_defaults();
    let synthesizer = registry.synthesizer_from_config(tts)?;
    let player = registry.player_from_config(tts)?;
    Ok(StreamingTts::new(
        synthesizer,
        player,
        StreamingOptions::from_config(tts),
    ))
}

/// Progress bar on an interactive stderr, nothing otherwise.
fn progress_callback(quiet: bool) -> Option<ProgressCallback> {
    if quiet || !io::stderr().is_terminal() {
        return None;
    }
    let progress: ProgressCallback = Arc::new(|fraction: f32, message: &str| {
        output::render_progress(fraction, message);
    });
    Some(progress)
}

fn run_speak(
    mut config: Config,
    args: &SpeechArgs,
    text: &str,
    no_preview: bool,
    timeout: Option<Duration>,
    quiet: bool,
) -> Result<()> {
    apply_speech_args(&mut config.tts, args);
    let tts = build_speech(&config.tts)?;

    if !quiet && !no_preview && config.tts.show_preview {
        let total = split_text(text, tts.options().max_chunk_size).len();
        output::render_preview(&tts.preview(text), total);
    }

    if !tts.run(text, progress_callback(quiet))? {
        if !quiet {
            eprintln!("{}", "Nothing to speak".dimmed());
        }
        return Ok(());
    }

    if !tts.wait(timeout) {
        tts.cancel();
        output::clear_line();
        eprintln!("{}", "Timed out, speech cancelled".yellow());
    }

    if !quiet {
        output::render_run_stats(&tts.stats());
    }
    Ok(())
}

fn open_history(config: &Config) -> Option<Arc<dyn ConversationSink>> {
    if !config.history.enabled {
        return None;
    }
    let Some(path) = config.history.resolved_path() else {
        tracing::warn!("no data directory, conversation history disabled");
        return None;
    };
    let history = JsonlHistory::new(path);
    if let Some(cutoff) = config.history.retention_cutoff(Utc::now())
        && let Err(e) = history.prune_before(cutoff)
    {
        tracing::warn!(error = %e, "pruning conversation history failed");
    }
    Some(Arc::new(history))
}

fn prune_history(config: &Config) -> Result<()> {
    let Some(cutoff) = config.history.retention_cutoff(Utc::now()) else {
        eprintln!("{}", "history.retention_days is 0, nothing to prune".dimmed());
        return Ok(());
    };
    let path = config
        .history
        .resolved_path()
        .context("Could not determine the history file location")?;
    let removed = JsonlHistory::new(&path).prune_before(cutoff)?;
    eprintln!(
        "{} {removed} turn(s) older than {} days from {}",
        "Removed".green(),
        config.history.retention_days,
        path.display()
    );
    Ok(())
}

fn run_chat(
    mut config: Config,
    args: &SpeechArgs,
    session: Option<String>,
    quiet: bool,
) -> Result<()> {
    apply_speech_args(&mut config.tts, args);
    let responder = responder_from_config(&config.reply)?;

    let mut conversation = Conversation::new(responder.clone(), &config.conversation);
    if config.conversation.speak_replies {
        let speech = Arc::new(build_speech(&config.tts)?);
        conversation = conversation.with_speech(speech);
        if let Some(progress) = progress_callback(quiet) {
            conversation = conversation.with_progress(progress);
        }
    }
    if let Some(sink) = open_history(&config) {
        conversation = conversation.with_history(sink);
    }
    if let Some(session) = session {
        conversation = conversation.with_session_id(session);
    }

    if !quiet {
        eprintln!(
            "{} {} {}",
            "Session".dimmed(),
            conversation.session_id(),
            format!("(responder: {}, /quit to exit, /stop to interrupt)", responder.name()).dimmed()
        );
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if conversation.is_timed_out() {
            eprintln!("{}", "Conversation timed out".yellow());
            break;
        }
        eprint!("{} ", "you>".cyan());
        io::stderr().flush().ok();

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read from stdin")?;
        let message = line.trim();
        match message {
            "" => continue,
            "/quit" | "/exit" => break,
            "/stop" => {
                conversation.stop_speaking();
                continue;
            }
            "/stats" => {
                eprintln!("{}", conversation.stats());
                continue;
            }
            _ => {}
        }

        match conversation.turn(message) {
            Ok(outcome) => {
                println!("{} {}", "ai>".green(), outcome.reply.text);
                conversation.wait_for_speech(None);
                output::clear_line();
            }
            Err(e) => eprintln!("{}", format!("Error: {e}").red()),
        }
    }

    conversation.stop_speaking();
    if !quiet {
        eprintln!("{}", "Conversation statistics".bold());
        eprintln!("{}", conversation.stats());
    }
    Ok(())
}

fn print_chunks(chunks: &[String], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(chunks)?);
        return Ok(());
    }
    for (index, chunk) in chunks.iter().enumerate() {
        println!(
            "{} {}",
            format!("{index:>3} ({:>3})", chunk.chars().count()).dimmed(),
            chunk
        );
    }
    Ok(())
}

fn show_history(config: &Config, query: HistoryQuery, json: bool, stats: bool) -> Result<()> {
    let path = config
        .history
        .resolved_path()
        .context("Could not determine the history file location")?;
    let history = JsonlHistory::new(path);

    if stats {
        let user = query
            .user_id
            .clone()
            .unwrap_or_else(|| config.conversation.user_id.clone());
        let stats = history.user_stats(&user)?;
        println!("User {}:", user.green());
        println!("  {}  {}", "Messages:".dimmed(), stats.total_messages);
        println!("  {}  {}", "Sessions:".dimmed(), stats.total_sessions);
        if let (Some(first), Some(last)) = (stats.first_message, stats.last_message) {
            println!("  {}     {}", "First:".dimmed(), first.to_rfc3339());
            println!("  {}      {}", "Last:".dimmed(), last.to_rfc3339());
        }
        return Ok(());
    }

    let records = history.query(&query)?;
    if records.is_empty() {
        eprintln!("{}", "No conversation history".dimmed());
        return Ok(());
    }
    for record in records {
        if json {
            println!("{}", serde_json::to_string(&record)?);
            continue;
        }
        println!(
            "{} {} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S").dimmed(),
            record.session_id,
            format!("({})", record.user_id).dimmed()
        );
        println!("  {} {}", "you:".cyan(), record.user_message);
        println!("  {}  {}", "ai:".green(), record.ai_response);
    }
    Ok(())
}

fn show_backends(config: &Config) {
    let registry = BackendRegistry::with_defaults();
    println!(
        "Speech backends (synthesizer: {}, player: {}):",
        config.tts.synthesizer.green(),
        config.tts.player.green()
    );
    output::render_backends(&registry.statuses(&config.tts));

    println!("Responders (current: {}):", config.reply.backend.green());
    for id in RESPONDER_IDS {
        match build_responder(id, &config.reply) {
            Ok(responder) if responder.is_available() => println!("  {} {}", "●".green(), id),
            Ok(_) => println!("  {} {} {}", "○".red(), id, "(not reachable)".dimmed()),
            Err(e) => println!("  {} {} {}", "○".red(), id, format!("({e})").dimmed()),
        }
    }
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = match custom_path {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}
