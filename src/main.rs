#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

use transkit::ItemStatus;
use transkit::app_config::{Config, LogLevel, TranslationProvider};
use transkit::app_controller::Controller;

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    Ollama,
    #[value(name = "openai")]
    OpenAI,
    Anthropic,
    #[value(name = "lmstudio")]
    LMStudio,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Ollama => TranslationProvider::Ollama,
            CliTranslationProvider::OpenAI => TranslationProvider::OpenAI,
            CliTranslationProvider::Anthropic => TranslationProvider::Anthropic,
            CliTranslationProvider::LMStudio => TranslationProvider::LMStudio,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate every pending item of a progress snapshot
    #[command(alias = "translate")]
    Run(RunArgs),

    /// Show item counts by status for a progress snapshot
    Status {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },

    /// Generate shell completions for transkit
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Progress snapshot to work on; it is updated in place
    #[arg(value_name = "SNAPSHOT")]
    snapshot: PathBuf,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language code (e.g., 'en', 'es', 'fr')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'en', 'es', 'fr')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum number of retry rounds
    #[arg(short, long)]
    rounds: Option<u32>,

    /// API key for the selected provider
    #[arg(long, env = "TRANSKIT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

/// transkit - batch translation of large text projects with AI providers
#[derive(Parser, Debug)]
#[command(name = "transkit")]
#[command(version)]
#[command(about = "Concurrent, resumable batch translation with AI providers")]
#[command(long_about = "transkit translates the pending items of a progress snapshot in bounded chunks, \
under provider rate limits, retrying failures over several rounds. Progress is saved periodically \
and on Ctrl-C, so an interrupted job picks up where it stopped.

EXAMPLES:
    transkit run project.json                        # Translate using default config
    transkit run -p openai -m gpt-4o project.json    # Use specific provider and model
    transkit run -s en -t de -w 8 project.json       # English to German with 8 workers
    transkit status project.json                     # Show progress counts
    transkit completions bash > transkit.bash        # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        // the logger accepts everything; `set_max_level` does the filtering
        log::set_boxed_logger(Box::new(CustomLogger::new(LevelFilter::Trace)))?;
        log::set_max_level(level);
        Ok(())
    }

    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌",
            Level::Warn => "🚧",
            Level::Info => " ",
            Level::Debug => "🔍",
            Level::Trace => "📋",
        }
    }

    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                Self::get_emoji_for_level(record.level()),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    if let Some(level) = &cli.log_level {
        log::set_max_level(LogLevel::from(level.clone()).to_level_filter());
    }

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "transkit", &mut std::io::stdout());
            Ok(())
        }
        Commands::Status { snapshot } => print_status(&snapshot),
        Commands::Run(args) => run_job(&cli.config_path, cli.log_level, args).await,
    }
}

fn apply_overrides(config: &mut Config, log_level: Option<CliLogLevel>, args: &RunArgs) {
    if let Some(provider) = &args.provider {
        config.translation.provider = provider.clone().into();
    }
    let active = config.translation.provider;
    if let Some(model) = &args.model {
        config.translation.get_provider_config_mut(active).model = model.clone();
    }
    if let Some(api_key) = &args.api_key {
        config.translation.get_provider_config_mut(active).api_key = api_key.clone();
    }
    if let Some(source_lang) = &args.source_language {
        config.source_language = source_lang.clone();
    }
    if let Some(target_lang) = &args.target_language {
        config.target_language = target_lang.clone();
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_count = Some(workers);
    }
    if let Some(rounds) = args.rounds {
        config.pipeline.round_limit = rounds;
    }
    if let Some(level) = log_level {
        config.log_level = level.into();
    }
}

async fn run_job(config_path: &str, log_level: Option<CliLogLevel>, args: RunArgs) -> Result<()> {
    let mut config = Config::load_or_create(Path::new(config_path))?;
    let level_from_cli = log_level.is_some();
    apply_overrides(&mut config, log_level, &args);

    config.validate().context("Configuration validation failed")?;
    if !level_from_cli {
        log::set_max_level(config.log_level.to_level_filter());
    }

    let controller = Controller::with_config(config)?;
    let report = controller.run(&args.snapshot).await?;

    info!("{}", report);
    if report.cancelled {
        warn!("Job interrupted; run the same command again to resume");
    } else if report.still_pending > 0 {
        warn!(
            "{} items are still untranslated; run the same command again to retry them",
            report.still_pending
        );
    } else {
        info!("Success: {}", args.snapshot.display());
    }
    Ok(())
}

fn print_status(snapshot: &Path) -> Result<()> {
    let counts = Controller::status(snapshot)?;
    println!("{}", snapshot.display());
    for status in [
        ItemStatus::Untranslated,
        ItemStatus::Translated,
        ItemStatus::Polished,
        ItemStatus::Excluded,
    ] {
        println!("  {:<13}{:>8}", status.as_str(), counts.get(status));
    }
    println!("  {:<13}{:>8}", "total", counts.total());
    Ok(())
}
