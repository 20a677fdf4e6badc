//! tts-relay CLI: 语音合成命令行工具
//!
//! Usage:
//!   tts-relay speak <text> [options]        Synthesize text, writing audio chunks to disk
//!   tts-relay voices [--engine <id>]        List voices of an engine
//!   tts-relay config get|set|unset ...      Inspect or edit the preference store

use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tts_relay::config::{ConfigKey, ConfigStore, JsonFileConfigStore, MemoryConfigStore, RelayConfig};
use tts_relay::engine::{LocalEngine, NullSpeechDevice, RemoteEngine};
use tts_relay::notify::TracingNotificationSink;
use tts_relay::playback::{FileSink, StreamingPlaybackQueue};
use tts_relay::{FallbackCoordinator, Orchestrator, SynthesisOptions};

const DEFAULT_OUT_DIR: &str = "tts-out";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tts_relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "speak" => cmd_speak(&args[2..]).await,
        "voices" => cmd_voices(&args[2..]).await,
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"tts-relay: 语音合成命令行工具

USAGE:
    tts-relay <COMMAND> [OPTIONS]

COMMANDS:
    speak <text>                Synthesize text with retry and engine fallback
        --engine <id>           Switch to this engine first (remote, local)
        --voice <id>            Voice id
        --lang <tag>            Language tag, e.g. zh-CN
        --speed <f>             0.5..=2.0
        --volume <n>            0..=100
        --stream                Request streamed (SSE) audio
        --out <dir>             Where audio chunks are written (default: {DEFAULT_OUT_DIR})
    voices [--engine <id>]      List voices
    config get [key]            Show stored preferences
    config set <key> <value>    Store a preference
    config unset <key>          Remove a preference
    version                     Show version information
    help                        Show this help message

GLOBAL OPTIONS:
    --config <file>             YAML runtime configuration
    --store <file>              JSON preference store (default: in-memory)

ENVIRONMENT:
    TTS_RELAY_API_KEY           Credential used when the store has none
    TTS_RELAY_ENDPOINT, TTS_RELAY_MODEL, TTS_RELAY_HTTP_TIMEOUT_SECS, TTS_RELAY_PROXY_URL
    RUST_LOG                    Log filter (default: tts_relay=info)"#
    );
}

fn cmd_version() {
    println!("tts-relay {}", env!("CARGO_PKG_VERSION"));
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn load_config(args: &[String]) -> anyhow::Result<RelayConfig> {
    let cfg = match flag_value(args, "--config") {
        Some(path) => RelayConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => RelayConfig::default(),
    };
    Ok(cfg.apply_env_overrides())
}

fn open_store(args: &[String]) -> anyhow::Result<Arc<dyn ConfigStore>> {
    let store: Arc<dyn ConfigStore> = match flag_value(args, "--store") {
        Some(path) => Arc::new(
            JsonFileConfigStore::open(path).with_context(|| format!("opening store {path}"))?,
        ),
        None => Arc::new(MemoryConfigStore::new()),
    };
    if store.get(ConfigKey::Credential).is_none() {
        if let Ok(key) = std::env::var("TTS_RELAY_API_KEY") {
            store.save(ConfigKey::Credential, &key)?;
        }
    }
    Ok(store)
}

fn build_relay(
    args: &[String],
    cfg: &RelayConfig,
    store: Arc<dyn ConfigStore>,
) -> anyhow::Result<FallbackCoordinator> {
    let out: PathBuf = flag_value(args, "--out").unwrap_or(DEFAULT_OUT_DIR).into();
    let sink = Arc::new(FileSink::new(out)?);
    let queue = Arc::new(StreamingPlaybackQueue::new(sink, cfg.playback.clone()));

    let remote = RemoteEngine::new(cfg.remote.clone(), store.clone(), queue)?;
    let local = LocalEngine::new(cfg.local.clone(), Arc::new(NullSpeechDevice));

    let orchestrator = Orchestrator::builder(store)
        .defaults(cfg.defaults.clone())
        .engine(Arc::new(remote))
        .engine(Arc::new(local))
        .build()?;

    Ok(FallbackCoordinator::new(
        Arc::new(orchestrator),
        &cfg.fallback,
        Arc::new(TracingNotificationSink),
    )?)
}

async fn cmd_speak(args: &[String]) -> anyhow::Result<()> {
    let text = args
        .first()
        .filter(|t| !t.starts_with("--"))
        .ok_or_else(|| anyhow!("speak needs the text to synthesize"))?;

    let cfg = load_config(args)?;
    let store = open_store(args)?;
    let relay = build_relay(args, &cfg, store)?;

    if let Some(engine) = flag_value(args, "--engine") {
        relay.orchestrator().switch_engine(engine).await?;
    }

    let mut options = SynthesisOptions::new();
    if let Some(voice) = flag_value(args, "--voice") {
        options = options.voice(voice);
    }
    if let Some(lang) = flag_value(args, "--lang") {
        options = options.language(lang);
    }
    if let Some(speed) = flag_value(args, "--speed") {
        options = options.speed(speed.parse().context("--speed expects a number")?);
    }
    if let Some(volume) = flag_value(args, "--volume") {
        options = options.volume(volume.parse().context("--volume expects 0..=100")?);
    }
    if has_flag(args, "--stream") {
        options = options.stream(true);
    }

    let outcome = relay.synthesize(text, &options).await?;
    match outcome.playback {
        Some(report) => println!(
            "{}: played {} chunk(s), {} failed, {} timed out{}",
            outcome.engine_id,
            report.played,
            report.failed,
            report.timed_out,
            if report.truncated { " (stream truncated)" } else { "" }
        ),
        None => println!("{}: done", outcome.engine_id),
    }
    Ok(())
}

async fn cmd_voices(args: &[String]) -> anyhow::Result<()> {
    let cfg = load_config(args)?;
    let store = open_store(args)?;
    let relay = build_relay(args, &cfg, store)?;
    let orchestrator = relay.orchestrator();

    let engine = match flag_value(args, "--engine") {
        Some(id) => orchestrator
            .engine(id)
            .ok_or_else(|| anyhow!("unknown engine: {id}"))?,
        None => orchestrator.active_engine()?,
    };

    let voices = engine.available_voices().await?;
    if voices.is_empty() {
        println!("{}: no voices available", engine.id());
    }
    for v in voices {
        println!("{:<12} {:<16} {:<8} {}", v.id, v.name, v.engine_id, v.description);
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let store = open_store(args)?;
    let parse_key = |raw: Option<&String>| -> anyhow::Result<ConfigKey> {
        let raw = raw.ok_or_else(|| anyhow!("missing config key"))?;
        ConfigKey::parse(raw).ok_or_else(|| anyhow!("unknown config key: {raw}"))
    };

    match args.first().map(String::as_str) {
        Some("get") => {
            let keys = match args.get(1).filter(|a| !a.starts_with("--")) {
                Some(raw) => vec![parse_key(Some(raw))?],
                None => ConfigKey::ALL.to_vec(),
            };
            for key in keys {
                let value = match (key, store.get(key)) {
                    (ConfigKey::Credential, Some(_)) => "<set>".to_string(),
                    (_, Some(v)) => v,
                    (_, None) => "<unset>".to_string(),
                };
                println!("{:<18} {}", key, value);
            }
        }
        Some("set") => {
            let key = parse_key(args.get(1))?;
            let value = args.get(2).ok_or_else(|| anyhow!("missing value for {key}"))?;
            store.save(key, value)?;
        }
        Some("unset") => {
            let key = parse_key(args.get(1))?;
            store.remove(key)?;
        }
        Some(other) => bail!("unknown config command: {other}"),
        None => bail!("config needs get, set or unset"),
    }
    Ok(())
}
