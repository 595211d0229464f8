use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::scraper::{ScrapeEngine, ScrapeRequest};
use crate::writer::{self, OutputOptions};

/// Ask the engine for a payload.
pub async fn scrape<E>(engine: &E, request: &ScrapeRequest) -> Result<Value>
where
    E: ScrapeEngine + ?Sized,
{
    let payload = engine
        .scrape(request)
        .await
        .with_context(|| format!("Scrape of {} failed", request.url))?;
    Ok(payload)
}

/// Print the payload, then extract and write it. Returns the CSV path, or
/// `None` when the payload was dumped to the backup file instead.
pub fn save(payload: &Value, options: &OutputOptions) -> Result<Option<PathBuf>> {
    println!("{}", writer::to_pretty_json(payload)?);
    let saved = writer::save_payload(payload, options)?;
    report(saved.as_deref());
    Ok(saved)
}

/// Re-run extraction and writing on a payload saved earlier.
pub fn convert(input: &Path, options: &OutputOptions) -> Result<Option<PathBuf>> {
    let payload = load_payload(input)?;
    info!(input = %input.display(), "converting saved payload");
    let saved = writer::save_payload(&payload, options)?;
    report(saved.as_deref());
    Ok(saved)
}

pub fn load_payload(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn report(saved: Option<&Path>) {
    match saved {
        Some(path) => println!("Successfully saved jobs to {}", path.display()),
        None => println!("Could not save jobs to CSV - check the raw data file"),
    }
}
