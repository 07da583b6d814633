//! drillscan - find where the disk space went, one big directory at a time.
//!
//! Usage:
//!   drillscan [PATH]            Scan and print the drilled tree
//!   drillscan scan [PATH]       Same, explicitly
//!   drillscan large [PATH]      List every large folder with its parents
//!   drillscan export [PATH]     Export the scan report to JSON
//!   drillscan --help            Show help

use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use drillscan_scan::{DrillScanner, JsonFileSink, NodeStatus, ScanJob, ScanNode, ScanReport};

#[derive(Parser)]
#[command(
    name = "drillscan",
    version,
    about = "Adaptive drill-down disk usage scanner",
    long_about = "drillscan measures a directory and expands only the subdirectories \
                  at or above a size threshold, down to a maximum depth.\n\n\
                  Set RUST_LOG=debug to see every drill decision."
)]
struct Cli {
    #[command(flatten)]
    scan: ScanArgs,

    /// Number of largest children to show per directory
    #[arg(short = 'n', long, default_value = "10")]
    top: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and print the drilled tree
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Number of largest children to show per directory
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,
    },

    /// List every folder at or above the threshold with its parent chain
    Large {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Export the scan report to JSON
    Export {
        #[command(flatten)]
        scan: ScanArgs,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Clone)]
struct ScanArgs {
    /// Path to scan (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Minimum size that triggers drill-down (e.g., "1G", "512MB", "1024")
    #[arg(short, long, default_value = "1G")]
    threshold: String,

    /// Maximum drill depth (1-10)
    #[arg(short, long, default_value = "5")]
    depth: u32,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Path to leave out of the scan (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<PathBuf>,

    /// Descend into other mounted filesystems
    #[arg(long)]
    cross_filesystems: bool,

    /// Do not print progress
    #[arg(short, long)]
    quiet: bool,
}

impl ScanArgs {
    fn to_job(&self) -> Result<ScanJob> {
        let job = ScanJob::builder()
            .root(self.path.as_path())
            .threshold_bytes(parse_size(&self.threshold)?)
            .max_depth(self.depth)
            .threads(self.threads)
            .exclude_paths(self.exclude.clone())
            .cross_filesystems(self.cross_filesystems)
            .build()
            .context("Invalid scan options")?;
        Ok(job)
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Scan { scan, top }) => run_scan(&scan, top)?,
        Some(Command::Large { scan }) => run_large(&scan)?,
        Some(Command::Export { scan, output }) => run_export(&scan, output)?,
        None => run_scan(&cli.scan, cli.top)?,
    }

    Ok(())
}

/// Run a scan, showing progress on stderr unless quiet.
fn scan_with_progress(args: &ScanArgs, scanner: DrillScanner) -> Result<ScanReport> {
    let job = args.to_job()?;

    if !args.quiet {
        eprintln!("Scanning {}...", job.root.display());
    }

    let handle = scanner.start(&job).context("Scan failed")?;

    if !args.quiet {
        let mut stderr = std::io::stderr();
        while !handle.is_done() {
            let progress = handle.progress();
            let _ = write!(
                stderr,
                "\r {} directories, {} measured, {} queued   ",
                progress.nodes_scanned,
                format_size(progress.bytes_scanned),
                progress.pending_task_count
            );
            let _ = stderr.flush();
            thread::sleep(Duration::from_millis(100));
        }
        eprintln!();
    }

    Ok(handle.wait())
}

/// Scan and print the drilled tree.
fn run_scan(args: &ScanArgs, top_n: usize) -> Result<()> {
    let report = scan_with_progress(args, DrillScanner::new())?;

    println!();
    println!("{}", "─".repeat(70));
    println!(
        " {} - {}",
        report.root_path.display(),
        format_size(report.total_size())
    );
    println!(
        " {} directories measured, {} drilled, threshold {}, depth {}",
        report.stats.total_nodes,
        report.stats.expanded_nodes,
        format_size(report.job.threshold_bytes),
        report.job.max_depth
    );
    println!(" Scanned in {:.2}s", report.duration.as_secs_f64());
    println!("{}", "─".repeat(70));
    println!();

    print_node(&report.root, 0, top_n, report.total_size());

    print_footer(&report);
    Ok(())
}

/// List large folders, largest first, each with the folders above it.
fn run_large(args: &ScanArgs) -> Result<()> {
    let report = scan_with_progress(args, DrillScanner::new())?;
    let large = report.large_folders();

    println!();
    println!("{}", "─".repeat(70));
    println!(
        " Folders of {} or more under {}",
        format_size(report.job.threshold_bytes),
        report.root_path.display()
    );
    println!("{}", "─".repeat(70));
    println!();

    if large.is_empty() {
        println!(" No large folders found.");
    }

    for folder in &large {
        println!(
            " {:>10}  {}",
            format_size(folder.size_bytes),
            folder.path.display()
        );
        for (path, size) in &folder.ancestors {
            println!("   {:>10}  in {}", format_size(*size), path.display());
        }
        println!();
    }

    print_footer(&report);
    Ok(())
}

/// Export the scan report to JSON.
fn run_export(args: &ScanArgs, output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(output_path) => {
            let scanner = DrillScanner::new().with_sink(JsonFileSink::new(&output_path));
            let report = scan_with_progress(args, scanner)?;
            if !output_path.exists() {
                bail!("Failed to write {}", output_path.display());
            }
            eprintln!(
                "Exported {} to {}",
                format_size(report.total_size()),
                output_path.display()
            );
        }
        None => {
            let report = scan_with_progress(args, DrillScanner::new())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn print_footer(report: &ScanReport) {
    if report.cancelled {
        println!();
        println!("Scan was cancelled; sizes are partial.");
    }
    if !report.root.complete {
        println!();
        println!("! marks folders with unreadable entries; their sizes are lower bounds.");
    }
    if report.has_warnings() {
        println!("{} entries skipped during scan", report.warnings.len());
    }
}

/// Print a node and its children.
fn print_node(node: &ScanNode, depth: u32, top_n: usize, root_size: u64) {
    let indent = "  ".repeat(depth as usize);
    let ratio = if root_size > 0 {
        node.size_bytes as f64 / root_size as f64 * 100.0
    } else {
        0.0
    };

    let bar = make_bar(ratio / 100.0, 10);

    let name = if depth == 0 {
        node.path.display().to_string()
    } else {
        format!("{}/", node.name)
    };

    let size = match node.status {
        NodeStatus::SkippedNoAccess => "no access".to_string(),
        _ if !node.measured => format!("~{}", format_size(node.size_bytes)),
        _ => format_size(node.size_bytes),
    };

    println!(
        "{}{}{:<40} {:>10} {:>5.1}% {}{}",
        indent,
        if node.is_leaf() { "  " } else { "▼ " },
        truncate(&name, 40),
        size,
        ratio,
        bar,
        if node.complete { "" } else { " !" }
    );

    let remaining = node.children.len().saturating_sub(top_n);
    for child in node.children.iter().take(top_n) {
        print_node(child, depth + 1, top_n, root_size);
    }
    if remaining > 0 {
        let indent = "  ".repeat((depth + 1) as usize);
        println!("{}  ... and {} more", indent, remaining);
    }
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = ((ratio * width as f64).round() as usize).min(width);
    let empty = width - filled;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 1).collect();
        format!("{kept}…")
    }
}

/// Parse a size string (e.g., "1G", "512MB", "1.5KiB", "1024").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);

    let num: f64 = num
        .parse()
        .with_context(|| format!("Invalid size: {s}"))?;
    let multiplier: u64 = match unit.trim().trim_end_matches("IB").trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        other => bail!("Unknown size unit: {other}"),
    };

    Ok((num * multiplier as f64) as u64)
}
