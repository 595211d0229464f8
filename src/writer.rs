use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{Settings, DEFAULT_SENTINEL};
use crate::extract;
use crate::payload::Record;
use crate::table::Table;

/// Where output files go and how blanks are filled.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// Explicit CSV path. When absent a timestamped name is used.
    pub destination: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub default_value: String,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            destination: None,
            output_dir: None,
            backup_dir: None,
            default_value: DEFAULT_SENTINEL.to_string(),
        }
    }
}

impl OutputOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            destination: None,
            output_dir: settings.output_dir.clone(),
            backup_dir: settings.backup_dir.clone(),
            default_value: settings.default_value.clone(),
        }
    }

    fn csv_path(&self, stamp: &str) -> PathBuf {
        match &self.destination {
            Some(path) => path.clone(),
            None => in_dir(self.output_dir.as_deref(), format!("jobs_{}.csv", stamp)),
        }
    }

    fn backup_path(&self, stamp: &str) -> PathBuf {
        in_dir(self.backup_dir.as_deref(), format!("raw_data_{}.json", stamp))
    }
}

/// Extract records from `payload` and write them.
pub fn save_payload(payload: &Value, options: &OutputOptions) -> Result<Option<PathBuf>> {
    let records = extract::extract(payload);
    write(payload, &records, options)
}

/// Write `records` as CSV and return the path. With no records, dump
/// `payload` as indented JSON to the backup location and return `None`.
///
/// File names carry a second-precision local timestamp, so two runs in the
/// same second overwrite each other.
pub fn write(payload: &Value, records: &[Record], options: &OutputOptions) -> Result<Option<PathBuf>> {
    let stamp = timestamp();

    if !records.is_empty() {
        let table = Table::from_records(records, &options.default_value);
        let path = options.csv_path(&stamp);
        write_csv(&path, &table)?;
        info!(path = %path.display(), rows = table.len(), columns = table.columns.len(), "wrote CSV");
        println!("Saved {} jobs to {}", table.len(), path.display());
        return Ok(Some(path));
    }

    println!("No structured job data found to save to CSV");
    let path = options.backup_path(&stamp);
    write_backup(&path, payload)?;
    info!(path = %path.display(), "wrote raw payload backup");
    println!("Saved raw data to {}", path.display());
    Ok(None)
}

pub fn write_csv(path: &Path, table: &Table) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Pretty-print `payload` with a four-space indent, keys in source order.
pub fn write_backup(path: &Path, payload: &Value) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    out.write_all(to_pretty_json(payload)?.as_bytes())?;
    out.flush()?;
    Ok(())
}

pub fn to_pretty_json(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn in_dir(dir: Option<&Path>, name: String) -> PathBuf {
    match dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!(dir = %parent.display(), "creating output directory");
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tmp_dir(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("careers_scraper_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&p);
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn jobs_scenario_writes_default_in_missing_cell() {
        let dir = tmp_dir("scenario");
        let payload = json!({"jobs": [{"title": "A", "id": "1"}, {"title": "B"}]});
        let options = OutputOptions {
            destination: Some(dir.join("jobs.csv")),
            ..Default::default()
        };

        let path = save_payload(&payload, &options).unwrap().unwrap();
        assert_eq!(path, dir.join("jobs.csv"));
        assert_eq!(
            read_csv(&path),
            vec![vec!["title", "id"], vec!["A", "1"], vec!["B", "N/A"]]
        );
    }

    #[test]
    fn timestamped_name_under_new_output_dir() {
        let dir = tmp_dir("outdir").join("nested");
        let payload = json!({"data": [{"title": "X", "location": null}]});
        let options = OutputOptions {
            output_dir: Some(dir.clone()),
            default_value: "none".into(),
            ..Default::default()
        };

        let path = save_payload(&payload, &options).unwrap().unwrap();
        assert_eq!(path.parent(), Some(dir.as_path()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("jobs_") && name.ends_with(".csv"));
        // jobs_YYYYMMDD_HHMMSS.csv
        assert_eq!(name.len(), "jobs_".len() + 15 + ".csv".len());
        assert_eq!(read_csv(&path)[1], ["X", "none"]);
    }

    #[test]
    fn csv_quotes_embedded_delimiters() {
        let dir = tmp_dir("quoting");
        let payload = json!({"jobs": [{"title": "Engineer, Backend", "description": "line one\nline two"}]});
        let options = OutputOptions {
            destination: Some(dir.join("q.csv")),
            ..Default::default()
        };

        let path = save_payload(&payload, &options).unwrap().unwrap();
        assert_eq!(read_csv(&path)[1], ["Engineer, Backend", "line one\nline two"]);
    }

    #[test]
    fn unrecognized_payload_goes_to_backup() {
        let dir = tmp_dir("backup");
        let backup_dir = dir.join("raw");
        let payload = json!({"foo": "bar"});
        let options = OutputOptions {
            output_dir: Some(dir.join("csv")),
            backup_dir: Some(backup_dir.clone()),
            ..Default::default()
        };

        assert!(save_payload(&payload, &options).unwrap().is_none());
        assert!(!dir.join("csv").exists());

        let entries: Vec<_> = fs::read_dir(&backup_dir).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("raw_data_") && name.ends_with(".json"));

        let text = fs::read_to_string(&entries[0]).unwrap();
        assert_eq!(text, "{\n    \"foo\": \"bar\"\n}");
        let echoed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(echoed, payload);
    }

    #[test]
    fn backup_keeps_key_order() {
        let payload = json!({"zeta": 1, "alpha": {"b": [1, 2], "a": null}});
        let text = to_pretty_json(&payload).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        assert!(text.find("\"b\"").unwrap() < text.find("\"a\"").unwrap());
        assert!(text.contains("\n        \"b\": [\n            1,"));
    }

    #[test]
    fn options_follow_settings() {
        let settings = Settings {
            output_dir: Some(PathBuf::from("out")),
            backup_dir: Some(PathBuf::from("bak")),
            default_value: "?".into(),
            ..Settings::default()
        };
        let options = OutputOptions::from_settings(&settings);
        assert_eq!(options.csv_path("20240101_120000"), PathBuf::from("out/jobs_20240101_120000.csv"));
        assert_eq!(options.backup_path("20240101_120000"), PathBuf::from("bak/raw_data_20240101_120000.json"));
        assert_eq!(options.default_value, "?");
    }
}
