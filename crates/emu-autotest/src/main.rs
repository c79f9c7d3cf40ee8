//! Command-line driver.
//!
//! Exit status: 0 when every title passed, 1 when any failed, 2 when the
//! run could not start or had to stop.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use emu_autotest::enumerate::{discover, from_paths, sample};
use emu_autotest::report::DEFAULT_REPORT_FILE;
use emu_autotest::{
    ConsoleReport, CsvReport, EmulatorRunner, Harness, HarnessError, LaunchStyle, Recorders,
    Result, RunConfig, RunSummary, WaitMode, resolve_platform,
};
use format_es_systems::SystemCatalog;

#[derive(Parser, Debug)]
#[command(author, version, about = "Boot-test emulator titles and report PASS/FAIL per title")]
struct Args {
    /// Platform to test, as named in es_systems.cfg (e.g. c64, amiga, psx)
    #[arg(short, long)]
    platform: String,

    /// Specific titles to test instead of walking the ROM directory
    titles: Vec<PathBuf>,

    /// System catalog; overrides the search list
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Test only this many titles
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// With --limit, pick titles at random
    #[arg(short, long)]
    random: bool,

    /// CSV report path [default: <rom dir>/test_report.csv]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write a JSON summary here
    #[arg(long)]
    json: Option<PathBuf>,

    /// Liveness checkpoint in seconds
    #[arg(short, long, value_parser = parse_secs)]
    timeout: Option<Duration>,

    /// Exits faster than this many seconds fail
    #[arg(long, value_parser = parse_secs)]
    min_liveness: Option<Duration>,

    /// Treat the timeout as a hard cap on a launcher that should exit by itself
    #[arg(long)]
    until_exit: bool,

    /// Launcher script
    #[arg(long)]
    launcher: Option<PathBuf>,

    /// Shared emulator log
    #[arg(long)]
    log: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_secs(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every title passed.
fn run(args: &Args) -> Result<bool> {
    let mut config = RunConfig::load(args.config.as_deref())?;
    if let Some(catalog) = &args.catalog {
        config = config.with_catalog(catalog.clone());
    }
    if let Some(launcher) = &args.launcher {
        config = config.with_launcher(launcher.clone());
    }
    if let Some(log) = &args.log {
        config = config.with_log_path(log.clone());
    }
    if config.launch_style == LaunchStyle::EmuElec && !config.launcher.is_file() {
        return Err(HarnessError::LauncherMissing(config.launcher.clone()));
    }

    let catalog_path = config.locate_catalog()?.to_path_buf();
    log::info!("Using system catalog {}", catalog_path.display());
    let catalog = SystemCatalog::parse(&fs::read_to_string(&catalog_path)?).map_err(|source| {
        HarnessError::Catalog {
            path: catalog_path.clone(),
            source,
        }
    })?;

    let mut profile = config.profile(&args.platform);
    if let Some(timeout) = args.timeout {
        profile.checkpoint = timeout;
    }
    if let Some(min) = args.min_liveness {
        profile.min_liveness = min;
    }
    if args.until_exit {
        profile.wait_mode = WaitMode::UntilExit;
    }

    let platform = Arc::new(resolve_platform(&catalog, &args.platform, &profile.aliases)?);
    log::info!(
        "{}: {} {:?} (emulator {}, core {})",
        platform.name(),
        platform.rom_dir().display(),
        platform.extensions(),
        platform.emulator_id(),
        platform.core_id()
    );

    let titles = if args.titles.is_empty() {
        discover(&platform)
    } else {
        from_paths(&args.titles, &platform)
    };
    let titles = sample(titles, args.limit, args.random);
    if titles.is_empty() {
        return Err(HarnessError::NoTitles {
            dir: platform.rom_dir().to_path_buf(),
            extensions: platform.extensions().to_vec(),
        });
    }

    let report_path = args
        .output
        .clone()
        .unwrap_or_else(|| platform.rom_dir().join(DEFAULT_REPORT_FILE));
    let mut csv = CsvReport::create(&report_path)?;
    let mut console = ConsoleReport::stdout(titles.len());
    let mut recorders = Recorders::new().with(&mut csv).with(&mut console);

    let runner = EmulatorRunner::new(&config, &profile)?;
    let records = Harness::new(runner, &profile).run(&titles, &mut recorders)?;

    let summary = RunSummary::new(platform.name(), &records);
    summary.print(&mut io::stdout())?;
    println!("Report: {}", report_path.display());
    if let Some(json) = &args.json {
        summary.write_json(json)?;
        log::info!("Summary written to {}", json.display());
    }
    Ok(summary.all_passed())
}
