use std::sync::Arc;

use clap::{Parser, Subcommand};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::{Value, json};

use aigentz::campaign::{CampaignRecord, FilterExpression};
use aigentz::config::Settings;
use aigentz::llm::LlmClient;
use aigentz::pipeline::{Assistant, TurnOutcome};
use aigentz::session::Session;
use aigentz::{clamp_limit, query, resolve_history_path};

#[derive(Parser)]
#[command(
    name = "aigentz",
    about = "AigentZ: chat with your marketing campaign data"
)]
struct Cli {
    /// Output machine-readable JSON (default: human-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Maximum number of campaign records per query (1-100)
    #[arg(long, global = true)]
    limit: Option<usize>,

    /// Send a single message and exit
    #[arg(short, long)]
    prompt: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat session (default)
    Chat,
    /// Fetch raw campaign records with an explicit filter
    Records {
        #[arg(long, help = "JSON filter, e.g. '{\"clicks\": {\"$gt\": 1000}}'")]
        filter: Option<String>,
    },
    /// Show the filter a question would be translated into
    Filter {
        /// The question (positional, collects remaining args)
        utterance: Vec<String>,
    },
}

// ============================================================================
// REPL Commands
// ============================================================================

#[derive(Debug, PartialEq)]
enum ReplInput<'a> {
    Quit,
    Reset,
    History,
    Limit(usize),
    Invalid(String),
    Say(&'a str),
}

fn parse_repl_input(line: &str) -> ReplInput<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return ReplInput::Say(line);
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit" | "exit"), None) => ReplInput::Quit,
        (Some("reset" | "clear"), None) => ReplInput::Reset,
        (Some("history"), None) => ReplInput::History,
        (Some("limit"), Some(n)) => match n.parse::<usize>() {
            Ok(n) => ReplInput::Limit(clamp_limit(n)),
            Err(_) => ReplInput::Invalid(format!("'{n}' is not a number")),
        },
        _ => ReplInput::Invalid(format!(
            "unknown command '/{command}' (try /reset, /history, /limit N, /quit)"
        )),
    }
}

// ============================================================================
// Output Formatting
// ============================================================================

fn outcome_json(outcome: &TurnOutcome) -> Value {
    let reply = match outcome {
        TurnOutcome::Direct { reply, .. } => reply.clone(),
        TurnOutcome::NoResults { .. } => aigentz::pipeline::NO_RESULTS_MESSAGE.to_string(),
        TurnOutcome::Insight { insights, .. } => insights.clone(),
    };
    json!({
        "decision": outcome.decision(),
        "filter": outcome.filter().cloned().map(Value::Object),
        "records": outcome.records(),
        "reply": reply,
    })
}

fn print_outcome(outcome: &TurnOutcome, as_json: bool) -> Result<(), serde_json::Error> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(outcome))?);
    } else {
        println!("{}", outcome.render());
    }
    Ok(())
}

fn format_record(record: &CampaignRecord) -> String {
    format!(
        "{} {} [{} / {} / {}] {} spend={:.2} impressions={} clicks={} ctr={:.2}% conversions={}",
        record.campaign_id,
        record.name,
        record.channel,
        record.region,
        record.status,
        record.date,
        record.spend,
        record.impressions,
        record.clicks,
        record.ctr,
        record.conversions
    )
}

// ============================================================================
// Interactive Session
// ============================================================================

async fn run_repl(
    assistant: &Assistant,
    mut limit: usize,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = DefaultEditor::new()?;
    let history_path = resolve_history_path();
    let _ = editor.load_history(&history_path);

    let mut session = Session::new();
    eprintln!("AigentZ chat. Commands: /reset, /history, /limit N, /quit");

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line.as_str());

        match parse_repl_input(&line) {
            ReplInput::Quit => break,
            ReplInput::Reset => {
                let dropped = session.reset();
                eprintln!("Cleared {dropped} turns.");
            }
            ReplInput::History => {
                if as_json {
                    println!("{}", serde_json::to_string_pretty(session.history())?);
                } else if session.is_empty() {
                    eprintln!("No conversation yet.");
                } else {
                    for turn in session.history() {
                        println!("[{}] {}", turn.role, turn.content);
                    }
                }
            }
            ReplInput::Limit(n) => {
                limit = n;
                eprintln!("Result limit set to {limit}.");
            }
            ReplInput::Invalid(msg) => eprintln!("{msg}"),
            ReplInput::Say(utterance) => match assistant.chat(&mut session, utterance, limit).await {
                Ok(outcome) => print_outcome(&outcome, as_json)?,
                // Nothing was added to history; the next message starts clean.
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn require_llm(settings: &Settings) -> Result<Arc<dyn LlmClient>, Box<dyn std::error::Error>> {
    settings.build_llm().map_err(|e| {
        format!("{e}. Set the API key for AIGENTZ_PROVIDER (default: OPENAI_API_KEY).").into()
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let limit = clamp_limit(cli.limit.unwrap_or(settings.result_limit));

    match cli.command {
        Some(Command::Records { filter }) => {
            let filter: FilterExpression = match filter.as_deref().map(str::trim) {
                None | Some("") => FilterExpression::new(),
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| format!("--filter must be a JSON object: {e}"))?,
            };
            let backend = settings.connect_backend().await?;
            let records = backend.retrieve(&filter, limit).await?;
            let total = backend.count(&filter).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                eprintln!("No matching campaigns found.");
            } else {
                for record in &records {
                    println!("{}", format_record(record));
                }
                eprintln!("Showing {} of {total} matching campaigns.", records.len());
            }
        }
        Some(Command::Filter { utterance }) => {
            let utterance = utterance.join(" ");
            if utterance.trim().is_empty() {
                eprintln!("Error: No question provided.");
                std::process::exit(1);
            }
            let llm = require_llm(&settings)?;
            let filter = query::synthesize(llm.as_ref(), &utterance).await;
            let filter = Value::Object(filter);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&filter)?);
            } else {
                println!("{filter}");
            }
        }
        Some(Command::Chat) | None => {
            let llm = require_llm(&settings)?;
            let backend = settings.connect_backend().await?;
            let assistant = Assistant::new(llm, backend);

            if let Some(prompt) = cli.prompt {
                let mut session = Session::new();
                let outcome = assistant.chat(&mut session, &prompt, limit).await?;
                print_outcome(&outcome, cli.json)?;
            } else {
                run_repl(&assistant, limit, cli.json).await?;
            }
        }
    }

    Ok(())
}
