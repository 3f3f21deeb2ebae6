#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use spoiler_guard::boundary::compute_boundary;
use spoiler_guard::config::{Config, JsonRuleStore};
use spoiler_guard::dom::{Document, ElementSpec};
use spoiler_guard::host::LogHost;
use spoiler_guard::registry::{NullRuleStore, ProtectionRegistry};
use spoiler_guard::source::{JsonLibrary, MediaSource};
use spoiler_guard::types::{ItemId, MediaItem, ProtectionRule, RuleType};
use spoiler_guard::SpoilerEngine;

#[derive(Parser)]
#[command(name = "spoiler-guard")]
#[command(about = "Spoiler protection rules and offline page scans", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage protection rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Inspect settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Print the watch boundary of a series
    Boundary {
        /// Library JSON file
        #[arg(long)]
        library: PathBuf,
        series_id: String,
    },

    /// Run a full protection pass over a page snapshot and print the result
    Scan {
        /// Library JSON file
        #[arg(long)]
        library: PathBuf,
        /// Page snapshot (element tree JSON)
        #[arg(long)]
        page: PathBuf,
        /// Client location, e.g. "#/details?id=abc"
        #[arg(long, default_value = "#/home")]
        location: String,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the effective settings as JSON
    Show,
}

#[derive(Subcommand)]
enum RulesAction {
    /// List all rules
    List,

    /// Protect an item
    Enable {
        item_id: String,
        #[arg(long)]
        name: String,
        /// series, movie or boxset
        #[arg(long = "type")]
        item_type: String,
    },

    /// Stop protecting an item
    Disable {
        item_id: String,
        /// Skip the confirmation requirement
        #[arg(long)]
        yes: bool,
    },
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn registry_for(config: &Config, path: &Path) -> ProtectionRegistry {
    ProtectionRegistry::new(config.rules.clone(), Box::new(JsonRuleStore::new(path.to_path_buf())))
}

fn run_rules(action: RulesAction, config: &Config, path: &Path) -> Result<()> {
    let mut registry = registry_for(config, path);
    match action {
        RulesAction::List => {
            if registry.rules().is_empty() {
                println!("No protection rules");
            }
            for rule in registry.rules().values() {
                let state = if rule.enabled { "on " } else { "off" };
                println!("[{state}] {} {:?} {}", rule.item_id, rule.item_type, rule.item_name);
            }
        }
        RulesAction::Enable { item_id, name, item_type } => {
            let Some(rule_type) = RuleType::parse(&item_type) else {
                bail!("Unknown rule type '{item_type}' (expected series, movie or boxset)");
            };
            registry.set_rule(ProtectionRule::enabled(ItemId::from(item_id), name, rule_type));
        }
        RulesAction::Disable { item_id, yes } => {
            let item_id = ItemId::from(item_id);
            let Some(rule) = registry.get_rule(&item_id).cloned() else {
                bail!("No rule for item {item_id}");
            };
            if config.settings.show_disable_confirmation && !yes {
                bail!("Disabling protection for '{}' needs confirmation, pass --yes", rule.item_name);
            }
            registry.set_rule(ProtectionRule { enabled: false, ..rule });
        }
    }
    Ok(())
}

async fn print_boundary(library: &Path, series_id: &str) -> Result<()> {
    let library = JsonLibrary::load(library)?;
    let episodes = library.episodes(&ItemId::from(series_id)).await?;
    let watches: Vec<_> = episodes.iter().filter_map(MediaItem::episode_watch).collect();
    match compute_boundary(&watches) {
        Some(boundary) => println!("S{}E{}", boundary.season, boundary.episode),
        None => println!("nothing watched"),
    }
    Ok(())
}

async fn scan_page(config: Config, library: &Path, page: &Path, location: &str) -> Result<()> {
    let library = JsonLibrary::load(library)?;
    let contents = fs::read_to_string(page).with_context(|| format!("Failed to read page {}", page.display()))?;
    let spec: ElementSpec =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse page {}", page.display()))?;

    let document = Rc::new(RefCell::new(Document::new()));
    let root = {
        let mut doc = document.borrow_mut();
        let body = doc.body();
        doc.insert(body, &spec)
    };

    // Scans never write rules back
    let registry = ProtectionRegistry::new(config.rules, Box::new(NullRuleStore));
    let engine = SpoilerEngine::new(library, Rc::new(LogHost::new()), Rc::clone(&document), config.settings, registry);
    engine.navigate(location);
    engine.process_current_page().await;
    info!(fetches = engine.source().item_fetches(), "Scan complete");

    let output = serde_json::to_string_pretty(&document.borrow().to_spec(root))?;
    println!("{output}");
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(Config::path);
    let config = Config::load_from(&path);

    match cli.command {
        Commands::Rules { action } => run_rules(action, &config, &path),
        Commands::Settings {
            action: SettingsAction::Show,
        } => {
            println!("{}", serde_json::to_string_pretty(&config.settings)?);
            Ok(())
        }
        Commands::Boundary { library, series_id } => {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
            runtime.block_on(print_boundary(&library, &series_id))
        }
        Commands::Scan { library, page, location } => {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, scan_page(config, &library, &page, &location))
        }
    }
}
