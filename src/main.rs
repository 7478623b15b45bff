use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use tracing::{info, warn, Level};

use lingo_core::config;
use lingo_core::model::language::{Language, LanguageContext};
use lingo_core::protocol::Core;
use lingo_core::services::document::DocumentTranslator;
use lingo_core::services::runtime_cache::preference;
use lingo_core::services::runtime_cache::storage::FileStorage;

/// Markdown-safe translation core.
///
/// Without a subcommand, serves the JSON-lines protocol on stdin/stdout.
#[derive(Parser)]
#[command(name = "lingo-core", version)]
struct Cli {
    /// Path to the TOML config (default: ./lingo.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one JSON request per stdin line
    Serve,

    /// Pre-translate every published post into the translation map
    Batch {
        /// Overrides `batch.content_dir`
        #[arg(long)]
        content_dir: Option<PathBuf>,
    },

    /// Translate one string through the runtime cache
    Translate {
        /// Target language code (ko, en, ja); remembered for later calls.
        /// Falls back to the remembered language when omitted.
        #[arg(long, short)]
        to: Option<String>,

        /// Treat the input as markdown and protect code, links and HTML
        #[arg(long)]
        markdown: bool,

        text: String,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // stdout carries protocol responses
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let core = Core::from_config(cfg).context("failed to initialise translation provider")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&core),
        Commands::Batch { content_dir } => {
            let report = core
                .run_batch(content_dir.as_deref())
                .context("batch translation aborted")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Translate { to, markdown, text } => {
            let target = target_language(&core, to.as_deref())?;
            translate_once(&core, target, markdown, &text)
        }
    }
}

fn serve(core: &Core) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    info!("serving line protocol on stdin");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };

        if line.trim().is_empty() {
            continue;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| core.handle(&line)));

        let response = match result {
            Ok(resp) => resp,
            Err(_) => serde_json::json!({
                "status": "error",
                "message": "internal core error"
            })
            .to_string(),
        };

        if writeln!(stdout, "{response}").is_err() {
            break;
        }

        let _ = stdout.flush();
    }

    Ok(())
}

fn target_language(core: &Core, to: Option<&str>) -> Result<Language> {
    let storage = FileStorage::new(core.config().cache.dir.clone());

    match to {
        Some(code) => {
            let lang: Language = code.parse().context("unsupported target language")?;
            if let Err(e) = preference::save_language(&storage, lang) {
                warn!("could not remember language choice: {e}");
            }
            Ok(lang)
        }
        None => Ok(preference::load_context(&storage, core.config().languages.source).active),
    }
}

fn translate_once(core: &Core, target: Language, markdown: bool, text: &str) -> Result<()> {
    let source = core.config().languages.source;

    if target == source {
        println!("{text}");
        return Ok(());
    }

    if markdown {
        let out = DocumentTranslator::new(core.translator(), core.codec())
            .translate_markdown(text, target)
            .context("translation failed")?;
        if !out.unresolved_tokens.is_empty() {
            warn!(tokens = ?out.unresolved_tokens, "some protected spans could not be restored");
        }
        println!("{}", out.markdown);
        return Ok(());
    }

    let cache = core.runtime_cache()?;
    let state = cache.lookup(text, LanguageContext::new(source, target));
    if let Some(e) = &state.error {
        warn!("showing original text: {e}");
    }
    println!("{}", state.translated_text);
    Ok(())
}
