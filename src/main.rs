mod config;
mod extract;
mod payload;
mod pipeline;
mod scraper;
mod table;
mod writer;

use std::backtrace::BacktraceStatus;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::payload::Payload;
use crate::scraper::{ScrapeRequest, SmartScraper};
use crate::table::Table;
use crate::writer::OutputOptions;

#[derive(Parser)]
#[command(
    name = "careers_scraper",
    about = "Scrape job listings from a careers page into CSV",
    after_help = "Settings come from the environment or a .env file. Set RUST_BACKTRACE=1 for stack traces on errors."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the careers page and save the listings
    Run {
        /// Page to scrape (default: SOURCE_URL)
        #[arg(long)]
        url: Option<String>,
        /// CSV path (default: <OUTPUT_DIR>/jobs_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Value for missing fields (default: DEFAULT_VALUE or "N/A")
        #[arg(long)]
        default_value: Option<String>,
    },
    /// Extract listings from a saved JSON payload, e.g. a raw_data backup
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        default_value: Option<String>,
    },
    /// Show which rule matches a saved payload and preview the table
    Inspect {
        input: PathBuf,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match Settings::load() {
        Ok(settings) => {
            init_tracing(&settings);
            execute(cli.command, settings).await
        }
        Err(e) => Err(e),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}", error_report(&e));
            ExitCode::FAILURE
        }
    }
}

/// Message, cause chain and, when one was captured, the stack trace.
fn error_report(e: &anyhow::Error) -> String {
    let mut report = format!("Error occurred: {}\n{:?}", e, e);
    if e.backtrace().status() != BacktraceStatus::Captured {
        report.push_str("\n\n(run with RUST_BACKTRACE=1 to include a stack trace)");
    }
    report
}

fn init_tracing(settings: &Settings) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_filter().into()),
        )
        .try_init();
}

async fn execute(command: Commands, settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Run { url, output, default_value } => {
            let options = output_options(&settings, output, default_value);
            let request = ScrapeRequest::new(url.unwrap_or_else(|| settings.source_url.clone()));
            let engine = SmartScraper::new(&settings)?;

            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
            pb.set_message(format!("Scraping {}", request.url));
            pb.enable_steady_tick(Duration::from_millis(120));
            let payload = pipeline::scrape(&engine, &request).await;
            pb.finish_and_clear();

            pipeline::save(&payload?, &options)?;
            Ok(())
        }
        Commands::Convert { input, output, default_value } => {
            let options = output_options(&settings, output, default_value);
            pipeline::convert(&input, &options)?;
            Ok(())
        }
        Commands::Inspect { input, limit } => {
            let payload = pipeline::load_payload(&input)?;
            let Some(found) = extract::locate(&payload) else {
                println!(
                    "No rule matched ({}). `convert` would write a raw data backup.",
                    Payload::of(&payload).describe()
                );
                return Ok(());
            };

            println!("Matched by: {}", found.source);
            let table = Table::from_records(&found.records, &settings.default_value);
            print_table(&table, limit);
            Ok(())
        }
    }
}

fn output_options(settings: &Settings, output: Option<PathBuf>, default_value: Option<String>) -> OutputOptions {
    let mut options = OutputOptions::from_settings(settings);
    options.destination = output;
    if let Some(v) = default_value {
        options.default_value = v;
    }
    options
}

fn print_table(table: &Table, limit: usize) {
    const WIDTH: usize = 20;

    let header: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{:<WIDTH$}", truncate(c, WIDTH)))
        .collect();
    println!("{:>3} | {}", "#", header.join(" | "));
    println!("{}", "-".repeat(6 + header.len() * (WIDTH + 3)));

    for (i, row) in table.rows.iter().take(limit).enumerate() {
        let cells: Vec<String> = row
            .iter()
            .map(|c| format!("{:<WIDTH$}", truncate(&c.replace('\n', " "), WIDTH)))
            .collect();
        println!("{:>3} | {}", i + 1, cells.join(" | "));
    }

    println!("\n{} records | {} columns", table.len(), table.columns.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
