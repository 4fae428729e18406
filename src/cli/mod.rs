use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::config::EffectiveConfig;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "cardocs",
    version,
    about = "Generates documentation-support artifacts for the car compatibility dataset"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scrape the dataset README and write the report-link mapping
    Reports(ReportsArgs),
    /// Project the car-definitions dump into metadata.json
    Metadata(MetadataArgs),
    /// Summarize metadata changes against the last commit for CI
    Diff(DiffArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ReportsArgs {}

#[derive(Debug, Args)]
pub struct MetadataArgs {
    /// Drop cars whose support type is "Not compatible" or "Community"
    #[arg(long)]
    pub upstream: bool,
    /// Definitions dump to read instead of the configured path
    #[arg(long)]
    pub definitions: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DiffArgs {}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::config::effective_home_dir()?;
    let env_config_path = std::env::var_os("CARDOCS_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    let ui_cfg = UiConfig {
        stderr_is_tty,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Reports(_) => run_reports(&cfg, timeout, &ui_cfg),
        Commands::Metadata(args) => run_metadata(&cfg, &args, &ui_cfg),
        Commands::Diff(_) => run_diff(&cfg, timeout),
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "cardocs", &mut out);
            Ok(())
        }
        Commands::Config(args) => {
            if args.show {
                println!("{}", toml::to_string_pretty(&cfg)?);
            } else if !ui_cfg.quiet {
                eprintln!("config: use `cardocs config --show` to print the effective configuration");
            }
            Ok(())
        }
    }
}

fn run_reports(cfg: &EffectiveConfig, timeout: Duration, ui_cfg: &UiConfig) -> Result<()> {
    let readme = crate::net::fetch_text(&cfg.reports.readme_url, timeout, ui_cfg)?;
    let outcome = crate::reports::parse_reports(&readme, &cfg.reports.pages_base_url);

    if ui_cfg.verbose && outcome.skipped_rows > 0 {
        eprintln!("skipped {} malformed table row(s)", outcome.skipped_rows);
    }
    if outcome.reports.is_empty() {
        return Err(crate::exit::no_data(
            "no reports found - README format may have changed",
        ));
    }

    let buf = serde_json::to_vec_pretty(&outcome.reports)?;
    std::fs::write(&cfg.reports.output, buf)
        .with_context(|| format!("failed to write {}", cfg.reports.output))?;

    if !ui_cfg.quiet {
        println!(
            "✅ {} reports across {} platforms",
            crate::reports::total_entries(&outcome.reports),
            outcome.reports.len()
        );
    }
    Ok(())
}

fn run_metadata(cfg: &EffectiveConfig, args: &MetadataArgs, ui_cfg: &UiConfig) -> Result<()> {
    let definitions_path = args
        .definitions
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cfg.metadata.definitions));
    let defs = crate::source::load_definitions(&definitions_path)?;

    let outcome = crate::metadata::extract_all(&defs, args.upstream);
    for (name, err) in &outcome.failures {
        eprintln!("{name}: {err}");
    }
    if ui_cfg.verbose && outcome.skipped_no_platform > 0 {
        eprintln!(
            "skipped {} car(s) with no matching platform",
            outcome.skipped_no_platform
        );
    }
    if outcome.records.is_empty() {
        return Err(crate::exit::no_data("No cars extracted"));
    }

    let buf = serde_json::to_vec_pretty(&outcome.records)?;
    std::fs::write(&cfg.metadata.output, buf)
        .with_context(|| format!("failed to write {}", cfg.metadata.output))?;

    if !ui_cfg.quiet {
        let abs_path = std::env::current_dir()
            .map(|dir| dir.join(&cfg.metadata.output))
            .unwrap_or_else(|_| PathBuf::from(&cfg.metadata.output));
        println!(
            "Generated {}/{} cars and written to {}",
            outcome.records.len(),
            outcome.total,
            abs_path.display()
        );
    }
    Ok(())
}

fn run_diff(cfg: &EffectiveConfig, timeout: Duration) -> Result<()> {
    let text = std::fs::read_to_string(&cfg.diff.metadata_path)
        .with_context(|| format!("failed to read {}", cfg.diff.metadata_path))?;
    let updated = crate::diff::load_snapshot(&text)?;

    let committed_text = crate::vcs::git_show(&format!("HEAD:{}", cfg.diff.metadata_path), timeout)
        .map_err(crate::exit::external_cmd_err)?;
    let Some(committed_text) = committed_text else {
        // nothing committed to compare against; succeed without output
        return Ok(());
    };
    let committed = crate::diff::load_snapshot(&committed_text)?;

    let summary = crate::diff::change_summary(&committed, &updated);
    crate::diff::write_ci_output(&summary)
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}
