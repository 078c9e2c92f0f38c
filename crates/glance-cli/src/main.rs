use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glance_contracts::providers::mask_secret;
use glance_contracts::{DispatchRequest, ImageSource, Outcome, Provider, Settings, SettingsStore};
use glance_engine::{capture_screenshot, ClientOptions, Dispatcher};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "glance", version, about = "Ask a vision model about your screen")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings document (defaults to $GLANCE_CONFIG or ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture the screen (or use --image) and ask a question about it
    Ask(AskArgs),
    /// Take a screenshot and print its path
    Capture(CaptureArgs),
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Parser)]
struct AskArgs {
    /// Question about the image
    #[arg(short, long)]
    prompt: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    provider: Option<Provider>,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    key: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Send the image at full resolution (Gemini only)
    #[arg(long)]
    no_scale: bool,
    /// Print the `{"choices": [...]}` envelope instead of plain text
    #[arg(long)]
    json: bool,
    #[arg(long, default_value = "screenshots")]
    screenshot_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct CaptureArgs {
    #[arg(long, default_value = "screenshots")]
    dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    /// Print the current settings (credential masked)
    Show,
    /// Update and persist settings
    Set(SetArgs),
}

#[derive(Debug, Parser)]
struct SetArgs {
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    key: Option<String>,
    #[arg(long)]
    provider: Option<Provider>,
    /// Model id; pass an empty string to clear
    #[arg(long)]
    model: Option<String>,
}

const WAIT_TICK: Duration = Duration::from_secs(1);

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("glance error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "glance={level},glance_engine={level},glance_contracts={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location(),
    };
    match cli.command {
        Command::Ask(args) => run_ask(&store, args),
        Command::Capture(args) => {
            let path = capture_screenshot(&args.dir)?;
            println!("{}", path.display());
            Ok(0)
        }
        Command::Settings(SettingsCommand::Show) => {
            let settings = store.load()?;
            let view = settings_view(&store, &settings);
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(0)
        }
        Command::Settings(SettingsCommand::Set(args)) => run_settings_set(&store, args),
    }
}

fn run_ask(store: &SettingsStore, args: AskArgs) -> Result<i32> {
    let settings = store.load()?;
    let mut config = settings.provider_config();
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(endpoint) = args.endpoint {
        config.endpoint = Some(endpoint.trim().to_string()).filter(|value| !value.is_empty());
    }
    if let Some(key) = args.key {
        config.credential = key;
    }
    if let Some(model) = args.model {
        config = config.with_model(model);
    }

    let image_path = match args.image {
        Some(path) => path,
        None => capture_screenshot(&args.screenshot_dir)
            .context("no --image given and capture failed")?,
    };
    debug!(path = %image_path.display(), "using image");

    let request = DispatchRequest::new(config, ImageSource::Path(image_path), args.prompt)?;
    let options = ClientOptions {
        gemini_allow_scale: !args.no_scale,
        ..ClientOptions::from_env()
    };
    let mut dispatcher = Dispatcher::with_options(request, options);
    let mut handle = dispatcher.start()?;
    info!(request_id = %handle.request_id(), "waiting for response");

    let outcome = loop {
        match handle.wait_timeout(WAIT_TICK) {
            Ok(outcome) => break outcome,
            Err(pending) => {
                debug!(state = ?pending.state(), "still waiting");
                handle = pending;
            }
        }
    };

    match outcome {
        Outcome::Success(response) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&response.into_envelope())?);
            } else {
                println!("{}", response.text);
            }
            Ok(0)
        }
        failure @ Outcome::Failure(_) => {
            eprintln!("{}", failure.display_text());
            Ok(1)
        }
    }
}

fn run_settings_set(store: &SettingsStore, args: SetArgs) -> Result<i32> {
    let mut settings = store.load()?;
    if let Some(endpoint) = args.endpoint {
        settings.api_endpoint = endpoint.trim().to_string();
    }
    if let Some(key) = args.key {
        settings.api_key = key;
    }
    if let Some(provider) = args.provider {
        settings.model_provider = provider;
    }
    if let Some(model) = args.model {
        let trimmed = model.trim();
        settings.model = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
    store.save(&settings)?;
    println!("Saved settings to {}", store.path().display());
    Ok(0)
}

fn settings_view(store: &SettingsStore, settings: &Settings) -> serde_json::Value {
    json!({
        "path": store.path().display().to_string(),
        "api_endpoint": settings.api_endpoint,
        "api_key": mask_secret(&settings.api_key),
        "model_provider": settings.model_provider.name(),
        "model": settings.model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_parses_prompt_and_overrides() {
        let cli = Cli::try_parse_from([
            "glance",
            "ask",
            "--provider",
            "gemini",
            "--image",
            "/tmp/shot.png",
            "--prompt",
            "what is this?",
        ]);
        let Ok(Cli {
            command: Command::Ask(args),
            ..
        }) = cli
        else {
            panic!("expected ask command");
        };
        assert_eq!(args.prompt, "what is this?");
        assert_eq!(args.provider, Some(Provider::Gemini));
        assert_eq!(args.image, Some(PathBuf::from("/tmp/shot.png")));
        assert!(!args.json);
    }

    #[test]
    fn ask_requires_a_prompt() {
        assert!(Cli::try_parse_from(["glance", "ask"]).is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let parsed = Cli::try_parse_from(["glance", "ask", "--provider", "claude", "-p", "hi"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn settings_set_persists_and_view_masks_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SettingsStore::new(temp.path().join("config.json"));
        run_settings_set(
            &store,
            SetArgs {
                endpoint: Some(" https://api.example.com/v1/chat/completions ".to_string()),
                key: Some("sk-secret-value".to_string()),
                provider: Some(Provider::OpenAi),
                model: Some("gpt-4o".to_string()),
            },
        )?;

        let settings = store.load()?;
        assert_eq!(settings.api_endpoint, "https://api.example.com/v1/chat/completions");
        assert_eq!(settings.model.as_deref(), Some("gpt-4o"));

        let view = settings_view(&store, &settings);
        assert_eq!(view["model_provider"], json!("openai"));
        assert_ne!(view["api_key"], json!("sk-secret-value"));

        run_settings_set(
            &store,
            SetArgs {
                endpoint: None,
                key: None,
                provider: Some(Provider::Gemini),
                model: Some(String::new()),
            },
        )?;
        let settings = store.load()?;
        assert_eq!(settings.model_provider, Provider::Gemini);
        assert_eq!(settings.model, None);
        assert_eq!(settings.api_key, "sk-secret-value");
        Ok(())
    }

    #[test]
    fn ask_without_endpoint_reports_failure_exit_code() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SettingsStore::new(temp.path().join("config.json"));
        let image = temp.path().join("shot.png");
        std::fs::write(&image, b"\x89PNG\r\n\x1a\n")?;
        let code = run_ask(
            &store,
            AskArgs {
                prompt: "What is in this image?".to_string(),
                image: Some(image),
                provider: Some(Provider::OpenAi),
                endpoint: None,
                key: Some("sk".to_string()),
                model: None,
                no_scale: false,
                json: false,
                screenshot_dir: temp.path().join("screenshots"),
            },
        )?;
        assert_eq!(code, 1);
        Ok(())
    }
}
