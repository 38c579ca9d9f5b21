//! cogwheel-repl - drive the cognitive core from a terminal
//!
//! Usage:
//!   cogwheel-repl                          interactive script REPL
//!   cogwheel-repl --eval 'const a = 1; a'  evaluate once and exit
//!   cogwheel-repl perceive events.jsonl    replay raw callbacks, print signals
//!   cogwheel-repl ask "a zombie is near"   one planner turn against the model
//!   cogwheel-repl --dump-config            print the effective config

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use cogwheel::agent::{Brain, CognitiveAgent};
use cogwheel::core::{Channel, CogwheelConfig, Modality, Signal};
use cogwheel::llm::{CancellationToken, OpenAiCompatProvider};
use cogwheel::perception::{stock_definitions, ChannelSink, FixedContext, PerceptionPipeline, Position};
use cogwheel::repl::{HostFunction, ReplEngine};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "cogwheel-repl", about = "Perception, planning and sandboxed scripts for game agents", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file (TOML)
    #[arg(long, global = true, default_value = "cogwheel.toml")]
    config: PathBuf,

    /// Override the script timeout
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Evaluate one script and exit
    #[arg(short, long)]
    eval: Option<String>,

    /// Print the effective config as TOML and exit
    #[arg(long, default_value_t = false)]
    dump_config: bool,

    /// Log as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay raw callbacks (one `{"event": .., "args": [..]}` per line) through the stock events
    Perceive {
        file: PathBuf,
        /// Username of the agent itself
        #[arg(short, long, default_value = "cogwheel")]
        name: String,
        /// Agent position as x,y,z
        #[arg(long)]
        at: Option<String>,
    },
    /// Run one planner turn with the given text as a system signal
    Ask { text: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "cogwheel=info,warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = CogwheelConfig::load(&cli.config);
    if let Some(ms) = cli.timeout_ms {
        config.repl.timeout_ms = ms;
    }

    if cli.dump_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    match cli.command {
        Some(Commands::Perceive { file, name, at }) => perceive(&config, &file, name, at.as_deref()).await,
        Some(Commands::Ask { text }) => ask(config, text).await,
        None => {
            let mut engine = new_engine(&config)?;
            match cli.eval {
                Some(script) => {
                    let output = engine.evaluate(&script)?;
                    println!("{}", output);
                    Ok(())
                }
                None => interactive(engine).await,
            }
        }
    }
}

fn new_engine(config: &CogwheelConfig) -> anyhow::Result<ReplEngine> {
    let mut engine = ReplEngine::new(config.repl.clone())?;
    let print: HostFunction = Arc::new(|args: Vec<Value>| {
        let line: Vec<String> = args
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", line.join(" "));
        Ok(Value::Null)
    });
    engine.expose_helper("print", print)?;
    Ok(engine)
}

async fn interactive(mut engine: ReplEngine) -> anyhow::Result<()> {
    eprintln!("cogwheel-repl v{} (.globals, .timeout <ms>, .exit)", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            ".exit" => break,
            ".globals" => {
                println!("{}", engine.globals()?.join(", "));
                continue;
            }
            _ => {}
        }
        if let Some(ms) = line.strip_prefix(".timeout") {
            match ms.trim().parse::<u64>() {
                Ok(ms) => engine.set_timeout(Duration::from_millis(ms)),
                Err(_) => println!("timeout is {} ms", engine.timeout().as_millis()),
            }
            continue;
        }

        match engine.evaluate(line) {
            Ok(output) => println!("{}", output),
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}

async fn perceive(config: &CogwheelConfig, file: &Path, name: String, at: Option<&str>) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let mut ctx = FixedContext::new(name, config.perception.max_distance);
    if let Some(at) = at {
        let parts: Vec<f64> = at.split(',').map(|p| p.trim().parse()).collect::<Result<_, _>>()?;
        anyhow::ensure!(parts.len() == 3, "--at expects x,y,z");
        ctx = ctx.at(Position::new(parts[0], parts[1], parts[2]));
    }

    let mut pipeline = PerceptionPipeline::new();
    pipeline.register_all(stock_definitions())?;
    pipeline.attach(Arc::new(ctx));
    let (sink, mut rx) = ChannelSink::pair();
    pipeline.subscribe(Channel::Conscious, Arc::new(sink));

    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(line).with_context(|| format!("line {}", number + 1))?;
        let Some(event) = record.get("event").and_then(Value::as_str) else {
            tracing::warn!(line = number + 1, "record without event name, skipping");
            continue;
        };
        let args = record.get("args").and_then(Value::as_array).cloned().unwrap_or_default();
        pipeline.ingest(event, &args);

        while let Ok(signal) = rx.try_recv() {
            println!("{}", serde_json::to_string(&signal)?);
        }
    }
    Ok(())
}

async fn ask(config: CogwheelConfig, text: String) -> anyhow::Result<()> {
    let provider = OpenAiCompatProvider::from_config(&config.model)?;
    let agent = CognitiveAgent::from_config(Arc::new(provider), &config.model);
    let engine = new_engine(&config)?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut brain = Brain::new(agent, engine, rx, config.brain.clone()).with_json_response(config.model.json_response);
    tx.send(Signal {
        source_event_id: "cli".into(),
        signal_type: "instruction".into(),
        modality: Modality::System,
        kind: "operator".into(),
        description: text,
        metadata: Value::Null,
        timestamp: chrono::Utc::now(),
    })?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let Some(turn) = brain.step(Some(cancel)).await? else {
        return Ok(());
    };
    match (turn.script, turn.result) {
        (Some(script), Some(Ok(output))) => println!("{}\n=> {}", script, output),
        (Some(script), Some(Err(e))) => println!("{}\n!! {}", script, e),
        _ => println!("(no script) {}", turn.completion.text),
    }
    Ok(())
}
