use anyhow::{Context, bail};
use bucket_backup::bucket::{Bucket, DirBucket};
use bucket_backup::config::{Config, DEFAULT_CONFIG_FILE};
use bucket_backup::progress::Progress;
use bucket_backup::sync::{SyncOptions, run_sync, save_sync_log};
use bucket_backup::{BackupPlan, Error, FileRecord, SizeReport, WalkOptions};
use clap::{Parser, Subcommand};
use log::info;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser)]
#[command(
    name = "bucket-backup",
    version,
    about = "Back up a directory into an object bucket",
    long_about = "Walks a source directory, filters it with .gitignore rules, global patterns and size limits, and syncs the rest into a bucket"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file: YAML, or an environment file named `.env` / `*.env`
    #[arg(short, long, global = true, env = "BACKUP_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log every exclusion and debug details
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the filtered source tree to the bucket
    Sync {
        /// Show planned actions without changing the bucket
        #[arg(long)]
        dry_run: bool,
    },

    /// List every excluded entry with the reason
    ShowExcludedFiles,

    /// Total the size of everything that would be backed up
    ComputeBackupSize {
        /// Print every included file
        #[arg(long)]
        show_files: bool,

        /// Number of top largest files to show. 0 to disable.
        #[arg(long, default_value_t = 0)]
        show_largest_files: usize,
    },
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if let Some(path) = &cli.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Walk the source tree lazily, logging exclusions as they are found.
fn records<'a>(
    options: &'a WalkOptions,
    verbose: bool,
    quiet: bool,
) -> bucket_backup::Result<impl Iterator<Item = FileRecord> + 'a> {
    let walker = options.walk()?;
    let progress = if quiet { Progress::hidden() } else { Progress::scan() };
    Ok(progress.track(walker).inspect(move |record| {
        if verbose && !record.is_included() {
            info!("excluding {} ({})", record.path.display(), record.classification);
        }
    }))
}

fn sync(cli: &Cli, config: &Config, options: &WalkOptions, dry_run: bool) -> anyhow::Result<()> {
    let plan = BackupPlan::from_records(records(options, cli.verbose, cli.quiet)?);
    info!(
        "{} file(s), {} bytes selected; {} entr(ies) excluded",
        plan.len(),
        with_thousands(plan.total_bytes()),
        plan.excluded.len()
    );

    let bucket = DirBucket::open(&config.bucket_root, &config.dst_bucket_name)
        .with_context(|| format!("opening bucket {}", config.dst_bucket_name))?;
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || cancel.store(true, Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;
    }

    let sync_options = SyncOptions {
        dry_run,
        compare_mode: config.compare_mode,
        compare_threshold: config.compare_threshold(),
        delete_removed: config.delete_removed,
        max_workers: config.max_workers,
    };
    let log = run_sync(&plan, &config.src_dir, &bucket, &sync_options, &cancel)?;
    if let Some(path) = &config.sync_log {
        if !dry_run {
            save_sync_log(&log, path).with_context(|| format!("writing {}", path.display()))?;
        }
    }

    info!(
        "bucket {}: {} action(s) succeeded, {} failed",
        bucket.name(),
        log.succeeded(),
        log.failed()
    );
    if log.interrupted {
        return Err(Error::Interrupted.into());
    }
    if log.failed() > 0 {
        bail!("{} sync action(s) failed", log.failed());
    }
    Ok(())
}

fn show_excluded_files(cli: &Cli, options: &WalkOptions) -> anyhow::Result<()> {
    for record in records(options, false, cli.quiet)? {
        if !record.is_included() {
            println!("excluding {} ({})", record.path.display(), record.classification);
        }
    }
    Ok(())
}

fn compute_backup_size(
    cli: &Cli,
    options: &WalkOptions,
    show_files: bool,
    show_largest_files: usize,
) -> anyhow::Result<()> {
    let report = SizeReport::from_records(records(options, cli.verbose, cli.quiet)?, show_largest_files);

    if show_files {
        for record in report.included() {
            println!("{}", record.path.display());
        }
    }

    let size = report.total_bytes;
    println!("{:>20} Bytes", with_thousands(size));
    println!("{:>20} KB", with_thousands(round_div(size, 1_000)));
    println!("{:>20} MB", with_thousands(round_div(size, 1_000_000)));
    println!("{:>20} GB", with_thousands(round_div(size, 1_000_000_000)));

    if !report.largest.is_empty() {
        let pos_pad = show_largest_files.to_string().len();
        let path_pad = report.largest.iter().map(|r| r.key().len()).max().unwrap_or(0);
        for (i, record) in report.largest.iter().enumerate() {
            println!(
                "{:>pos_pad$}. {:<path_pad$} {} MB",
                i + 1,
                record.key(),
                with_thousands(round_div(record.size, 1_000_000)),
            );
        }
    }
    Ok(())
}

fn round_div(value: u64, unit: u64) -> u64 {
    (value + unit / 2) / unit
}

fn with_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let options = config.walk_options()?;

    match &cli.command {
        Commands::Sync { dry_run } => sync(cli, &config, &options, *dry_run),
        Commands::ShowExcludedFiles => show_excluded_files(cli, &options),
        Commands::ComputeBackupSize {
            show_files,
            show_largest_files,
        } => compute_backup_size(cli, &options, *show_files, *show_largest_files),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }

    if let Err(err) = run(&cli) {
        let fatal_config = err
            .downcast_ref::<Error>()
            .is_some_and(Error::is_fatal_config);
        if fatal_config {
            eprintln!("error: invalid configuration, nothing was backed up: {err:#}");
        } else {
            eprintln!("error: {err:#}");
        }
        process::exit(1);
    }
}
