mod config;
mod host;
mod rapl;
mod report;
mod runner;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use ramp_core::{
    EnergyMeter, ModelDirectory, ModelKind, NullMeter, RampController, RampSettings, ResultStore,
};
use ramp_engine::{OllamaClient, RemoteClient};
use ramp_store::{ModelCatalog, SqliteStore};

use crate::config::Config;
use crate::runner::{ModelOutcome, RunOptions};

#[derive(Parser)]
#[command(
    name = "ramp",
    version,
    about = "Progressive, swap-aware context benchmarks for local language models"
)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to the models.json catalog
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark catalog models
    Run {
        /// Model names or tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// Which models to run
        #[arg(short, long, default_value = "local")]
        kind: KindFilter,

        /// Skip models that already have a fresh record
        #[arg(long)]
        skip_tested: bool,

        /// Highest context tier to attempt
        #[arg(long)]
        max_context: Option<u32>,

        /// Output-token ceiling per tier call
        #[arg(long)]
        output_tokens: Option<u32>,

        /// Skip the functional probe battery
        #[arg(long)]
        skip_functional: bool,

        /// Run tool probes even for models that do not declare tools
        #[arg(long)]
        force_tools: bool,

        /// Do not write results back to the catalog
        #[arg(long)]
        no_update: bool,

        /// Do not regenerate the Markdown report
        #[arg(long)]
        no_report: bool,
    },

    /// Render the Markdown decision report from stored records
    Report {
        /// Output file (default from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the stored record of a model
    Show {
        /// Model name or engine tag
        model: String,

        /// Print the raw JSON record
        #[arg(long)]
        json: bool,
    },

    /// Show per-tier history of a model across runs
    History {
        /// Model name or engine tag
        model: String,

        /// Maximum rows
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete the stored record of a model
    Forget {
        /// Model name
        model: String,
    },

    /// Show resolved configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindFilter {
    Local,
    #[value(alias = "api")]
    Remote,
    All,
}

impl KindFilter {
    fn kind(self) -> Option<ModelKind> {
        match self {
            Self::Local => Some(ModelKind::Local),
            Self::Remote => Some(ModelKind::Remote),
            Self::All => None,
        }
    }
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "ramp", "ramp")
        .map(|dirs| dirs.data_dir().join("benchmarks.db"))
        .unwrap_or_else(|| PathBuf::from("benchmarks.db"))
}

fn open_store(db: Option<PathBuf>, cfg: &Config) -> Result<SqliteStore> {
    let path = db
        .or_else(|| cfg.store.path.as_ref().map(PathBuf::from))
        .unwrap_or_else(default_db_path);
    SqliteStore::new(&path).context("failed to open database")
}

fn catalog_path(catalog: Option<PathBuf>, cfg: &Config) -> PathBuf {
    catalog
        .or_else(|| cfg.store.catalog.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("models.json"))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config()?;
    let catalog = catalog_path(cli.catalog, &cfg);

    match cli.command {
        Commands::Run {
            models,
            kind,
            skip_tested,
            max_context,
            output_tokens,
            skip_functional,
            force_tools,
            no_update,
            no_report,
        } => {
            let store = open_store(cli.db, &cfg)?;
            let mut settings = cfg.ramp_settings();
            if max_context.is_some() {
                settings.max_context = max_context;
            }
            if let Some(n) = output_tokens {
                settings.max_output_tokens = n;
            }
            settings.functional &= !skip_functional;
            settings.probes.force_tools |= force_tools;

            let opts = RunOptions {
                models,
                kind: kind.kind(),
                skip_tested,
                update_catalog: !no_update,
            };
            cmd_run(&cfg, &store, &catalog, settings, &opts)?;
            if !no_report {
                cmd_report(&cfg, &store, None)?;
            }
            Ok(())
        }
        Commands::Report { output } => {
            let store = open_store(cli.db, &cfg)?;
            cmd_report(&cfg, &store, output)
        }
        Commands::Show { model, json } => {
            let store = open_store(cli.db, &cfg)?;
            cmd_show(&store, &resolve_name(&catalog, &model), json)
        }
        Commands::History { model, limit } => {
            let store = open_store(cli.db, &cfg)?;
            cmd_history(&store, &resolve_name(&catalog, &model), limit)
        }
        Commands::Forget { model } => {
            let store = open_store(cli.db, &cfg)?;
            if store.delete(&model)? {
                println!("Deleted record for {model}.");
            } else {
                println!("No record for {model}.");
            }
            Ok(())
        }
        Commands::Config => cmd_config(&cfg, &catalog),
    }
}

/// Map an engine tag to its catalog name. Falls back to the argument.
fn resolve_name(catalog: &Path, model: &str) -> String {
    match ModelCatalog::load(catalog) {
        Ok(cat) => {
            let specs = cat.specs();
            if specs.iter().any(|s| s.identity.name == model) {
                return model.to_string();
            }
            let directory = ModelDirectory::from_specs(&specs);
            let friendly = directory.friendly_name(model);
            if specs.iter().any(|s| s.identity.name == friendly) {
                friendly
            } else {
                model.to_string()
            }
        }
        Err(_) => model.to_string(),
    }
}

fn build_controllers(cfg: &Config, settings: RampSettings) -> runner::Controllers {
    let connect = Duration::from_secs(cfg.engine.connect_timeout_secs);
    let meter: Box<dyn EnergyMeter> = if cfg.energy.rapl {
        Box::new(rapl::RaplMeter::discover(
            Path::new(rapl::POWERCAP_ROOT),
            cfg.grid_factor(),
        ))
    } else {
        Box::new(NullMeter)
    };

    let local = RampController::new(
        Box::new(OllamaClient::new(&cfg.engine.ollama_url, connect)),
        Box::new(host::HostProbe::new("ollama")),
        meter,
        settings.clone(),
    );
    let remote = RampController::new(
        Box::new(RemoteClient::new(
            &cfg.engine.remote_url,
            &cfg.engine.api_key_env,
            connect,
        )),
        Box::new(host::HostProbe::new("ollama")),
        Box::new(NullMeter),
        settings,
    );
    runner::Controllers { local, remote }
}

fn cmd_run(
    cfg: &Config,
    store: &SqliteStore,
    catalog_path: &Path,
    settings: RampSettings,
    opts: &RunOptions,
) -> Result<()> {
    let mut catalog = ModelCatalog::load(catalog_path)
        .with_context(|| format!("loading catalog {}", catalog_path.display()))?;
    let queue = runner::select_models(&catalog.specs(), opts);
    if queue.is_empty() {
        bail!("no catalog model matches the selection");
    }
    println!("Benchmarking {} model(s).", queue.len());

    let mut controllers = build_controllers(cfg, settings);
    let report = runner::run_queue(
        &mut controllers,
        store,
        Some(&mut catalog),
        &queue,
        opts,
        &cfg.staleness(),
    );

    println!();
    for (name, outcome) in &report.outcomes {
        match outcome {
            ModelOutcome::Recorded(record) => println!("  ok      {}", runner::summary_line(record)),
            ModelOutcome::SkippedFresh => println!("  skip    {name}: fresh record"),
            ModelOutcome::NotInstalled => println!("  skip    {name}: not installed"),
            ModelOutcome::Unreachable(e) => println!("  retry   {name}: {e}"),
            ModelOutcome::Failed(e) => println!("  failed  {name}: {e}"),
        }
    }
    println!(
        "\n{} recorded, {} of {} model(s) not recorded.",
        report.recorded(),
        report.outcomes.len() - report.recorded(),
        report.outcomes.len()
    );
    Ok(())
}

fn cmd_report(cfg: &Config, store: &SqliteStore, output: Option<PathBuf>) -> Result<()> {
    let records = store.list()?;
    let Some(markdown) = report::render_report(&records, Utc::now()) else {
        println!("No records yet, report not written.");
        return Ok(());
    };
    let path = output.unwrap_or_else(|| PathBuf::from(&cfg.report.path));
    std::fs::write(&path, markdown).with_context(|| format!("writing {}", path.display()))?;
    println!("Report written to {}", path.display());
    Ok(())
}

fn cmd_show(store: &SqliteStore, model: &str, json: bool) -> Result<()> {
    let Some(record) = store.load(model)? else {
        bail!("no record for {model}");
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("{}", runner::summary_line(&record));
    println!("Tag:        {} ({})", record.tag, record.kind);
    println!("Run:        {}", record.run_date.format("%Y-%m-%d %H:%M"));
    println!("License:    {}", record.detected_license);
    if let Some(size) = record.size_gb {
        println!("Size:       {size:.2} GB");
    }
    if !record.complete {
        println!("Partial:    yes (re-run on resume)");
    }
    if let Some(ttft) = record.avg_ttft_ms {
        println!("TTFT:       {ttft:.0} ms");
    }
    println!(
        "CO2e:       {:.4} g total, {:.4} g / 1k tokens{}",
        record.total_co2_kg * 1000.0,
        record.co2_per_1k_tokens_kg * 1000.0,
        if record.energy_degraded { " (estimated)" } else { "" }
    );
    if !record.capabilities_validated.is_empty() {
        println!("Validated:  {}", record.capabilities_validated.join(", "));
    }
    if let Some(f) = &record.functional {
        println!(
            "Probes:     reasoning {:.0}%, instructions {:.0}%, json {:.0}%, variance {:.0}%",
            f.reasoning_avg * 100.0,
            f.instruction_following_avg * 100.0,
            f.json_schema_compliance_rate * 100.0,
            f.response_variance * 100.0
        );
        let langs = f.languages_validated();
        if !langs.is_empty() {
            println!("Languages:  {}", langs.join(", "));
        }
    }

    println!();
    println!("{:>8}  {:<10} {:>8} {:>8} {:>9}  needle", "context", "outcome", "tok/s", "ram GB", "ttft ms");
    for tier in &record.tiers {
        let (tps, ram, ttft) = tier.metrics.as_ref().map_or(
            ("-".to_string(), "-".to_string(), "-".to_string()),
            |m| {
                (
                    format!("{:.1}", m.tokens_per_second),
                    format!("{:.2}", m.peak_ram_gb),
                    m.ttft_ms.map_or("-".to_string(), |t| format!("{t:.0}")),
                )
            },
        );
        let needle = tier.needle.as_ref().map_or(String::new(), |n| {
            n.offsets
                .iter()
                .map(|(k, v)| format!("{k}:{}", if *v { "ok" } else { "miss" }))
                .collect::<Vec<_>>()
                .join(" ")
        });
        let capped = if tier.output_capped { " (capped)" } else { "" };
        println!(
            "{:>8}  {:<10} {:>8} {:>8} {:>9}  {needle}{capped}",
            tier.context,
            tier.outcome.to_string(),
            tps,
            ram,
            ttft
        );
    }
    Ok(())
}

fn cmd_history(store: &SqliteStore, model: &str, limit: usize) -> Result<()> {
    let entries = store.tier_history(model, limit)?;
    if entries.is_empty() {
        println!("No history for {model}.");
        return Ok(());
    }
    for e in entries {
        let tps = e
            .tier
            .metrics
            .as_ref()
            .map_or("-".to_string(), |m| format!("{:.1} tok/s", m.tokens_per_second));
        println!(
            "{}  {:>7}  {:<10} {}",
            e.run_date.format("%Y-%m-%d %H:%M"),
            e.tier.context,
            e.tier.outcome.to_string(),
            tps
        );
    }
    Ok(())
}

fn cmd_config(cfg: &Config, catalog: &Path) -> Result<()> {
    println!("Config: {}", config::show_config_path());
    println!("Catalog: {}", catalog.display());
    println!();
    println!("[engine]");
    println!("  ollama_url = {}", cfg.engine.ollama_url);
    println!("  remote_url = {}", cfg.engine.remote_url);
    println!("  api_key_env = {}", cfg.engine.api_key_env);
    println!("  connect_timeout_secs = {}", cfg.engine.connect_timeout_secs);
    println!();
    println!("[ramp]");
    println!("  ladder = {:?}", cfg.ramp.ladder);
    println!(
        "  max_context = {}",
        cfg.ramp
            .max_context
            .map_or("(declared context)".to_string(), |c| c.to_string())
    );
    println!("  safety_margin_gb = {}", cfg.ramp.safety_margin_gb);
    println!("  swap_ratio = {}", cfg.ramp.swap_ratio);
    println!("  sample_interval_ms = {}", cfg.ramp.sample_interval_ms);
    println!("  unload_settle_ms = {}", cfg.ramp.unload_settle_ms);
    println!("  max_output_tokens = {}", cfg.ramp.max_output_tokens);
    println!("  temperature = {}", cfg.ramp.temperature);
    println!("  tier_timeout_secs = {}", cfg.ramp.tier_timeout_secs);
    println!("  needle = {}", cfg.ramp.needle);
    println!("  needle_min_context = {}", cfg.ramp.needle_min_context);
    println!();
    println!("[probes]");
    println!("  enabled = {}", cfg.probes.enabled);
    println!("  repeats = {}", cfg.probes.repeats);
    println!("  context_window = {}", cfg.probes.context_window);
    println!("  max_output_tokens = {}", cfg.probes.max_output_tokens);
    println!("  timeout_secs = {}", cfg.probes.timeout_secs);
    println!("  force_tools = {}", cfg.probes.force_tools);
    println!();
    println!("[energy]");
    println!("  country = {}", cfg.energy.country);
    let grid = cfg.grid_factor();
    println!("  grid_g_per_kwh = {} (resolved)", grid.g_per_kwh);
    println!("  pue = {}", grid.pue);
    println!("  rapl = {}", cfg.energy.rapl);
    println!();
    println!("[grades]");
    println!("  instant_ms = {}", cfg.grades.instant_ms);
    println!("  fast_ms = {}", cfg.grades.fast_ms);
    println!("  acceptable_ms = {}", cfg.grades.acceptable_ms);
    println!("  excellent_ratio = {}", cfg.grades.excellent_ratio);
    println!("  good_ratio = {}", cfg.grades.good_ratio);
    println!();
    println!("[store]");
    println!(
        "  path = {}",
        cfg.store.path.as_deref().unwrap_or("(default platform path)")
    );
    println!(
        "  max_age_days = {}",
        cfg.store
            .max_age_days
            .map_or("(never)".to_string(), |d| d.to_string())
    );
    println!();
    println!("[report]");
    println!("  path = {}", cfg.report.path);
    Ok(())
}
