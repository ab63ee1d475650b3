use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use raw_renamer_core::{
    app_paths, load_config_from, save_config_to, AppConfig, ApplyResult, BackupLog,
    CancelToken, DHashProvider, Engine, RenameOutcome, RenamePlan, RestoreOutcome,
    RestoreResult, RestoreScope,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "raw-renamer")]
#[command(about = "Renames RAW files after the JPG that looks the same")]
struct Cli {
    /// Backup log location (defaults to the configured one)
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    /// Config file location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List RAW and JPG candidates
    Scan(ScanArgs),
    /// Pair RAWs with JPGs and preview or apply the renames
    Rename(RenameArgs),
    /// Undo logged renames
    Restore(RestoreArgs),
    /// Show pending backup-log entries
    Log,
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct FolderArgs {
    #[arg(long)]
    raw_dir: Option<PathBuf>,
    #[arg(long)]
    jpg_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    recursive: bool,
    #[arg(long, default_value_t = false)]
    include_hidden: bool,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[command(flatten)]
    folders: FolderArgs,
}

#[derive(Debug, Args)]
struct RenameArgs {
    #[command(flatten)]
    folders: FolderArgs,
    /// Maximum fingerprint distance for a pair
    #[arg(long)]
    threshold: Option<u32>,
    #[arg(long, default_value_t = false)]
    apply: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    /// Restore every pending entry, not only the last session
    #[arg(long, default_value_t = false)]
    all: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    Set(ConfigSetArgs),
}

#[derive(Debug, Args)]
struct ConfigSetArgs {
    #[arg(long)]
    raw_dir: Option<PathBuf>,
    #[arg(long)]
    jpg_dir: Option<PathBuf>,
    #[arg(long)]
    threshold: Option<u32>,
    #[arg(long)]
    hash_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

struct AppContext {
    config: AppConfig,
    config_path: PathBuf,
    log_path: PathBuf,
}

impl AppContext {
    fn load(cli: &Cli) -> Result<Self> {
        let paths = app_paths()?;
        let config_path = cli.config.clone().unwrap_or(paths.config_path.clone());
        let config = load_config_from(&config_path)?;
        let log_path = cli
            .log
            .clone()
            .unwrap_or_else(|| config.backup_log_path(&paths));
        debug!(
            "config {} / backup log {}",
            config_path.display(),
            log_path.display()
        );
        Ok(Self {
            config,
            config_path,
            log_path,
        })
    }

    fn engine(&self, folders: Option<&FolderArgs>) -> Result<Engine<DHashProvider>> {
        let mut config = self.config.clone();
        if let Some(folders) = folders {
            config.recursive |= folders.recursive;
            config.include_hidden |= folders.include_hidden;
        }
        config.validate()?;
        Ok(Engine::new(
            DHashProvider::new(config.hash_size),
            config.scan_options()?,
            BackupLog::at(&self.log_path),
        ))
    }

    fn folders(&self, args: &FolderArgs) -> Result<(PathBuf, PathBuf)> {
        let raw = args.raw_dir.clone().or_else(|| self.config.raw_folder.clone());
        let jpg = args.jpg_dir.clone().or_else(|| self.config.jpg_folder.clone());
        match (raw, jpg) {
            (Some(raw), Some(jpg)) => Ok((raw, jpg)),
            (None, _) => bail!("no RAW folder: pass --raw-dir or run `config set --raw-dir`"),
            (_, None) => bail!("no JPG folder: pass --jpg-dir or run `config set --jpg-dir`"),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let ctx = AppContext::load(&cli)?;

    match &cli.command {
        Commands::Scan(args) => cmd_scan(&ctx, args),
        Commands::Rename(args) => cmd_rename(&ctx, args),
        Commands::Restore(args) => cmd_restore(&ctx, args),
        Commands::Log => cmd_log(&ctx),
        Commands::Config(config) => match &config.action {
            ConfigAction::Show => cmd_config_show(&ctx),
            ConfigAction::Set(args) => cmd_config_set(&ctx, args),
        },
    }
}

fn cmd_scan(ctx: &AppContext, args: &ScanArgs) -> Result<()> {
    let (raw_dir, jpg_dir) = ctx.folders(&args.folders)?;
    let engine = ctx.engine(Some(&args.folders))?;
    let candidates = engine.scan(&raw_dir, &jpg_dir)?;

    println!("RAW ({}):", candidates.raws.len());
    for record in &candidates.raws {
        println!("  {}", record.path().display());
    }
    println!("JPG ({}):", candidates.jpgs.len());
    for record in &candidates.jpgs {
        println!("  {}", record.path().display());
    }

    let stats = &candidates.stats;
    eprintln!(
        "summary: scanned={} raw={} jpg={} other_skip={} hidden_skip={} unreadable_entries={}",
        stats.scanned_files,
        stats.raw_files,
        stats.jpg_files,
        stats.skipped_other,
        stats.skipped_hidden,
        stats.skipped_unreadable_entries
    );
    Ok(())
}

fn cmd_rename(ctx: &AppContext, args: &RenameArgs) -> Result<()> {
    let (raw_dir, jpg_dir) = ctx.folders(&args.folders)?;
    let threshold = args.threshold.unwrap_or(ctx.config.similarity_threshold);
    let mut checked = ctx.config.clone();
    checked.similarity_threshold = threshold;
    checked.validate()?;

    let engine = ctx.engine(Some(&args.folders))?;
    let candidates = engine.scan(&raw_dir, &jpg_dir)?;

    let total = (candidates.raws.len() + candidates.jpgs.len()) as u64;
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} fingerprinting [{bar:40}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    let report = engine.find_pairs(&candidates, threshold, |progress| {
        bar.set_position(progress.done as u64);
        if let Some(name) = progress.path.file_name() {
            bar.set_message(name.to_string_lossy().to_string());
        }
    })?;
    bar.finish_and_clear();

    let plan = engine.preview(&report);
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Table => print_plan(&plan),
    }

    if !args.apply {
        eprintln!("dry run: nothing was renamed. Pass --apply to rename.");
        return Ok(());
    }

    let result = engine.rename(&plan, &CancelToken::new())?;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&apply_json(&result))?),
        OutputFormat::Table => print_apply(&result),
    }
    eprintln!(
        "renamed {} / failed {} / skipped {} / cancelled {}",
        result.renamed, result.failed, result.skipped, result.cancelled
    );
    if let Some(err) = result.aborted {
        bail!("rename stopped early: {err}");
    }
    Ok(())
}

fn cmd_restore(ctx: &AppContext, args: &RestoreArgs) -> Result<()> {
    let engine = ctx.engine(None)?;
    let scope = if args.all {
        RestoreScope::All
    } else {
        RestoreScope::LastSession
    };
    let result = engine.restore(scope)?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&restore_json(&result))?),
        OutputFormat::Table => print_restore(&result),
    }
    eprintln!(
        "restored {} / already in place {} / failed {} / left in log {}",
        result.restored, result.already_in_place, result.failed, result.remaining_in_log
    );
    Ok(())
}

fn cmd_log(ctx: &AppContext) -> Result<()> {
    let log = BackupLog::at(&ctx.log_path);
    let headers = log.sessions()?;
    let pending = log.pending_entries()?;

    let mut by_session = BTreeMap::<&str, Vec<_>>::new();
    for entry in &pending {
        by_session.entry(entry.session.as_str()).or_default().push(entry);
    }

    println!("backup log: {}", log.path().display());
    for (session, entries) in &by_session {
        match headers.iter().find(|h| h.session == *session) {
            Some(header) => println!(
                "session {session} ({}) raw={} jpg={}",
                header.started_at.format("%Y-%m-%d %H:%M:%S"),
                header.raw_dir.display(),
                header.jpg_dir.display()
            ),
            None => println!("session {session}"),
        }
        for entry in entries {
            println!(
                "  #{} {} -> {}",
                entry.seq,
                entry.original_path.display(),
                entry.new_path.display()
            );
        }
    }
    eprintln!(
        "{} pending entries in {} sessions",
        pending.len(),
        by_session.len()
    );
    Ok(())
}

fn cmd_config_show(ctx: &AppContext) -> Result<()> {
    println!("config file: {}", ctx.config_path.display());
    println!("backup log: {}", ctx.log_path.display());
    println!("{}", toml::to_string_pretty(&ctx.config)?);
    Ok(())
}

fn cmd_config_set(ctx: &AppContext, args: &ConfigSetArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(dir) = &args.raw_dir {
        config.raw_folder = Some(absolute(dir)?);
    }
    if let Some(dir) = &args.jpg_dir {
        config.jpg_folder = Some(absolute(dir)?);
    }
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    if let Some(hash_size) = args.hash_size {
        config.hash_size = hash_size;
    }

    save_config_to(&config, &ctx.config_path)?;
    eprintln!("saved {}", ctx.config_path.display());
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path: {}", path.display()))
}

fn print_plan(plan: &RenamePlan) {
    println!("RAW -> new name (JPG, distance, status)");
    for entry in &plan.entries {
        println!(
            "{} -> {} ({}, {}, {:?})",
            entry.source_path.display(),
            file_name(&entry.target_path),
            file_name(&entry.jpg_path),
            entry.distance,
            entry.status
        );
    }
    for path in &plan.unmatched_raws {
        println!("unmatched RAW: {}", path.display());
    }
    for path in &plan.unmatched_jpgs {
        println!("unmatched JPG: {}", path.display());
    }
    for image in &plan.unreadable {
        println!("unreadable: {} ({})", image.path.display(), image.reason);
    }

    println!(
        "\nsummary: threshold={} planned={} collision_resolved={} skipped={} unmatched_raw={} unmatched_jpg={} unreadable={}",
        plan.threshold,
        plan.stats.planned,
        plan.stats.collision_resolved,
        plan.stats.skipped,
        plan.unmatched_raws.len(),
        plan.unmatched_jpgs.len(),
        plan.unreadable.len()
    );
}

fn print_apply(result: &ApplyResult) {
    for entry in &result.entries {
        match &entry.outcome {
            RenameOutcome::Renamed => println!(
                "renamed   {} -> {}",
                entry.source_path.display(),
                file_name(&entry.target_path)
            ),
            RenameOutcome::Failed(err) => println!("failed    {err}"),
            RenameOutcome::Skipped => println!("skipped   {}", entry.source_path.display()),
            RenameOutcome::Cancelled => println!("cancelled {}", entry.source_path.display()),
        }
    }
    if let Some(session) = &result.session {
        println!("session: {session}");
    }
}

fn print_restore(result: &RestoreResult) {
    for item in &result.entries {
        let entry = &item.entry;
        match &item.outcome {
            RestoreOutcome::Restored => println!(
                "restored  {} -> {}",
                entry.new_path.display(),
                file_name(&entry.original_path)
            ),
            RestoreOutcome::AlreadyInPlace => {
                println!("in place  {}", entry.original_path.display())
            }
            RestoreOutcome::Failed(err) => println!("failed    {err}"),
        }
    }
}

fn apply_json(result: &ApplyResult) -> serde_json::Value {
    let entries: Vec<_> = result
        .entries
        .iter()
        .map(|entry| {
            let (outcome, error) = match &entry.outcome {
                RenameOutcome::Renamed => ("renamed", None),
                RenameOutcome::Failed(err) => ("failed", Some(err.to_string())),
                RenameOutcome::Skipped => ("skipped", None),
                RenameOutcome::Cancelled => ("cancelled", None),
            };
            json!({
                "source_path": entry.source_path,
                "target_path": entry.target_path,
                "outcome": outcome,
                "error": error,
            })
        })
        .collect();

    json!({
        "session": result.session,
        "renamed": result.renamed,
        "failed": result.failed,
        "skipped": result.skipped,
        "cancelled": result.cancelled,
        "aborted": result.aborted.as_ref().map(|err| err.to_string()),
        "entries": entries,
    })
}

fn restore_json(result: &RestoreResult) -> serde_json::Value {
    let entries: Vec<_> = result
        .entries
        .iter()
        .map(|item| {
            let (outcome, error) = match &item.outcome {
                RestoreOutcome::Restored => ("restored", None),
                RestoreOutcome::AlreadyInPlace => ("already_in_place", None),
                RestoreOutcome::Failed(err) => ("failed", Some(err.to_string())),
            };
            json!({
                "session": item.entry.session,
                "seq": item.entry.seq,
                "original_path": item.entry.original_path,
                "new_path": item.entry.new_path,
                "outcome": outcome,
                "error": error,
            })
        })
        .collect();

    json!({
        "restored": result.restored,
        "already_in_place": result.already_in_place,
        "failed": result.failed,
        "remaining_in_log": result.remaining_in_log,
        "entries": entries,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
