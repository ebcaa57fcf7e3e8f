//! Command execution.

use crate::{Commands, ConfigAction};
use chrono::DateTime;
use colored::Colorize;
use envlog_core::codec::decode_record;
use envlog_core::{
    max_samples_for_page, AppLog, CursorState, Element, Gap, LogConfig, OverflowPolicy,
    ReadState, RecoveryReport, RecoveryScanner,
};
use envlog_flash::{FileFlash, PageId, PageStore, ERASED_BYTE};
use envlog_node::settings::parse_fields;
use envlog_node::{LogSettings, Settings};
use serde::Serialize;
use std::path::Path;

type CmdResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub fn execute(settings: &Settings, cmd: Commands, json: bool) -> CmdResult {
    match cmd {
        Commands::Info => {
            let log = open_log(settings)?;
            let info = log.info();
            if json {
                return Ok(serde_json::to_string_pretty(&info)?);
            }

            let mut out = format!(
                "{}\n  Image: {}\n  Flash: {} pages x {} bytes\n  Samples per record: {}\n",
                "envlog".bold(),
                settings.storage.image_path().display(),
                info.geometry.page_count,
                info.geometry.page_size,
                info.max_samples
            );
            out.push_str(&format_config(&info.config));
            out.push_str(&format!(
                "\n  Committed: {} records, {} samples\n  Next sequence: {}",
                info.committed_pages, info.committed_samples, info.next_sequence
            ));
            if let (Some(oldest), Some(newest)) = (info.oldest, info.newest) {
                out.push_str(&format!(
                    "\n  Oldest: page {} (seq {}) from {}\n  Newest: page {} (seq {}) to {}",
                    oldest.page,
                    oldest.sequence,
                    format_time(oldest.start_timestamp_s),
                    newest.page,
                    newest.sequence,
                    format_time(newest.end_timestamp_s)
                ));
            }
            Ok(out)
        }

        Commands::Verify => {
            let mut flash = open_flash(settings)?;
            let report = RecoveryScanner::new(max_samples(settings)).scan(&mut flash)?;
            let output = if json {
                serde_json::to_string_pretty(&report)?
            } else {
                format_report(&report)
            };

            if report.corrupt_pages.is_empty() {
                Ok(output)
            } else {
                println!("{}", output);
                Err(format!("{} corrupt pages", report.corrupt_pages.len()).into())
            }
        }

        Commands::Read {
            cursor_file,
            max,
            all,
        } => {
            if max == 0 {
                return Err("--max must be at least 1".into());
            }
            let log = open_log(settings)?;
            let mut cursor = match &cursor_file {
                Some(path) => load_cursor(path)?,
                None => ReadState::new(),
            };

            let mut batch = ReadBatch::default();
            loop {
                let outcome = log.read(cursor, max)?;
                let progressed = !outcome.elements.is_empty();
                cursor = outcome.cursor;
                batch.elements.extend(outcome.elements);
                batch.gaps.extend(outcome.gap);
                batch.corrupt_pages.extend(outcome.corrupt_pages);
                batch.state = Some(outcome.state);
                if !all || !progressed || outcome.state != CursorState::Positioned {
                    break;
                }
            }
            batch.cursor = cursor;

            if let Some(path) = &cursor_file {
                save_cursor(path, &cursor)?;
            }

            if json {
                Ok(serde_json::to_string_pretty(&batch)?)
            } else {
                Ok(format_batch(&batch))
            }
        }

        Commands::Config { action } => {
            let log = open_log(settings)?;
            match action {
                ConfigAction::Get => {
                    let config = log.config_get();
                    if json {
                        Ok(serde_json::to_string_pretty(&config)?)
                    } else {
                        Ok(format_config(&config).trim_start().to_string())
                    }
                }
                ConfigAction::Set {
                    fields,
                    interval,
                    overflow,
                } => {
                    let changes = LogSettings {
                        fields: fields.as_deref().map(parse_fields_arg).transpose()?,
                        interval_secs: interval,
                        overflow: overflow.as_deref().map(parse_overflow).transpose()?,
                    };
                    if changes.is_empty() {
                        return Err("nothing to set (use --fields, --interval or --overflow)".into());
                    }

                    let config = changes.merge(log.config_get());
                    log.config_set(config)?;
                    Ok(format!(
                        "{} log configuration\n{}",
                        "Updated".green(),
                        format_config(&config).trim_start()
                    ))
                }
            }
        }

        Commands::Purge { yes } => {
            if !yes {
                return Err("purge erases all logged data; pass --yes to confirm".into());
            }
            let log = open_log(settings)?;
            let info = log.info();
            log.purge_flash()?;
            Ok(format!(
                "{} {} records ({} samples)",
                "Purged".green(),
                info.committed_pages,
                info.committed_samples
            ))
        }

        Commands::Dump { page, elements } => {
            let mut flash = open_flash(settings)?;
            let max = max_samples(settings);
            let report = RecoveryScanner::new(max).scan(&mut flash)?;
            let geometry = flash.geometry();

            let pages: Vec<PageId> = match page {
                Some(p) if p >= geometry.page_count => {
                    return Err(format!(
                        "page {} out of range (device has {} pages)",
                        p, geometry.page_count
                    )
                    .into());
                }
                Some(p) => vec![p],
                None => (0..geometry.page_count).collect(),
            };

            let mut buf = vec![0u8; geometry.page_size];
            let mut dumps = Vec::with_capacity(pages.len());
            for page in pages {
                flash.read(page, &mut buf)?;
                dumps.push(dump_page(page, &buf, max, &report, elements));
            }

            if json {
                Ok(serde_json::to_string_pretty(&dumps)?)
            } else {
                Ok(dumps
                    .iter()
                    .map(format_dump)
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
    }
}

fn open_log(settings: &Settings) -> Result<AppLog<FileFlash>, Box<dyn std::error::Error>> {
    require_image(settings)?;
    let log = envlog_node::open_log(&settings.storage)?;
    log.init()?;
    Ok(log)
}

fn open_flash(settings: &Settings) -> Result<FileFlash, Box<dyn std::error::Error>> {
    require_image(settings)?;
    Ok(FileFlash::open(
        settings.storage.image_path(),
        settings.storage.geometry(),
    )?)
}

fn require_image(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let path = settings.storage.image_path();
    if !path.exists() {
        return Err(format!("no flash image at {}", path.display()).into());
    }
    Ok(())
}

fn max_samples(settings: &Settings) -> u16 {
    settings.storage.max_samples.unwrap_or_else(|| {
        max_samples_for_page(settings.storage.page_size).min(u16::MAX as usize) as u16
    })
}

/// Loads a saved cursor, or a fresh one if the file does not exist yet.
fn load_cursor(path: &Path) -> Result<ReadState, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(ReadState::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_cursor(path: &Path, cursor: &ReadState) -> Result<(), Box<dyn std::error::Error>> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(cursor)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn parse_fields_arg(value: &str) -> Result<Vec<envlog_core::Field>, String> {
    match parse_fields(value) {
        Some(fields) if !fields.is_empty() => Ok(fields),
        _ => Err(format!("invalid field list: {}", value)),
    }
}

fn parse_overflow(value: &str) -> Result<OverflowPolicy, String> {
    match value.to_lowercase().as_str() {
        "wrap" => Ok(OverflowPolicy::Wrap),
        "stop" => Ok(OverflowPolicy::Stop),
        _ => Err(format!("invalid overflow policy: {} (expected wrap or stop)", value)),
    }
}

/// Samples collected over one or more reads.
#[derive(Debug, Default, Serialize)]
struct ReadBatch {
    elements: Vec<Element>,
    cursor: ReadState,
    state: Option<CursorState>,
    gaps: Vec<Gap>,
    corrupt_pages: Vec<PageId>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum PageDump {
    Erased {
        page: PageId,
    },
    Corrupt {
        page: PageId,
        reason: String,
    },
    Record {
        page: PageId,
        sequence: u32,
        in_window: bool,
        start_timestamp_s: u32,
        end_timestamp_s: u32,
        num_samples: u16,
        config: LogConfig,
        #[serde(skip_serializing_if = "Option::is_none")]
        elements: Option<Vec<Element>>,
    },
}

fn dump_page(
    page: PageId,
    bytes: &[u8],
    max_samples: u16,
    report: &RecoveryReport,
    with_elements: bool,
) -> PageDump {
    if bytes.iter().all(|&b| b == ERASED_BYTE) {
        return PageDump::Erased { page };
    }
    match decode_record(page, bytes, max_samples) {
        Ok(Some(record)) => PageDump::Record {
            page,
            sequence: record.sequence,
            in_window: report.window.iter().any(|p| p.page == page),
            start_timestamp_s: record.start_timestamp_s,
            end_timestamp_s: record.end_timestamp_s,
            num_samples: record.num_samples(),
            config: record.block_configuration,
            elements: with_elements.then_some(record.elements),
        },
        // Erased header over leftover bytes
        Ok(None) => PageDump::Corrupt {
            page,
            reason: "erased header on a programmed page".to_string(),
        },
        Err(e) => PageDump::Corrupt {
            page,
            reason: e.to_string(),
        },
    }
}

fn format_time(timestamp_s: u32) -> String {
    DateTime::from_timestamp(timestamp_s as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_s.to_string())
}

fn format_config(config: &LogConfig) -> String {
    format!(
        "  Fields: {}\n  Interval: {}s\n  Overflow: {}",
        config.fields.to_string().cyan(),
        config.interval_s,
        config.overflow.to_string().yellow()
    )
}

fn format_value(value: Option<f32>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn format_batch(batch: &ReadBatch) -> String {
    let mut out = String::new();

    for gap in &batch.gaps {
        out.push_str(&format!(
            "{}: data lost between {} and {}\n",
            "Gap".yellow(),
            format_time((gap.stale_from_ms / 1000) as u32),
            format_time((gap.resumed_at_ms / 1000) as u32)
        ));
    }
    for page in &batch.corrupt_pages {
        out.push_str(&format!("{}: skipped corrupt page {}\n", "Warning".yellow(), page));
    }

    if batch.elements.is_empty() {
        out.push_str(&"No samples".yellow().to_string());
    } else {
        out.push_str(&format!(
            "{:<20} {:>10} {:>10} {:>12}\n",
            "time".bold(),
            "temp (C)".bold(),
            "hum (%)".bold(),
            "press (Pa)".bold()
        ));
        for element in &batch.elements {
            out.push_str(&format!(
                "{:<20} {:>10} {:>10} {:>12}\n",
                format_time(element.timestamp_s),
                format_value(element.temperature_c, 2),
                format_value(element.humidity_rh, 1),
                format_value(element.pressure_pa, 0)
            ));
        }
        out.push_str(&format!("{} samples", batch.elements.len()));
    }

    let state = match batch.state {
        Some(CursorState::Positioned) => "more available".green(),
        Some(CursorState::EndOfLog) => "end of log".normal(),
        Some(CursorState::Empty) | None => "log empty".dimmed(),
    };
    out.push_str(&format!(
        "\nCursor: page {} element {} ({})",
        batch.cursor.page_idx, batch.cursor.element_idx, state
    ));
    out
}

fn format_report(report: &RecoveryReport) -> String {
    let status = if report.corrupt_pages.is_empty() {
        "OK".green()
    } else {
        "CORRUPT".red()
    };
    let mut out = format!(
        "{} {}\n  Pages scanned: {}\n  Valid records: {}\n  Erased pages: {}\n  Window: {} records, {} samples",
        "Verify".bold(),
        status,
        report.pages_scanned,
        report.valid_records,
        report.erased_pages,
        report.window.len(),
        report.samples()
    );
    if let Some(max) = report.max_sequence {
        out.push_str(&format!("\n  Highest sequence: {}", max));
    }
    if !report.corrupt_pages.is_empty() {
        out.push_str(&format!("\n  Corrupt pages: {:?}", report.corrupt_pages));
    }
    if !report.orphaned_pages.is_empty() {
        out.push_str(&format!("\n  Orphaned pages: {:?}", report.orphaned_pages));
    }
    out
}

fn format_dump(dump: &PageDump) -> String {
    match dump {
        PageDump::Erased { page } => format!("{:>4}  {}", page, "erased".dimmed()),
        PageDump::Corrupt { page, reason } => {
            format!("{:>4}  {} ({})", page, "corrupt".red(), reason)
        }
        PageDump::Record {
            page,
            sequence,
            in_window,
            start_timestamp_s,
            end_timestamp_s,
            num_samples,
            config,
            elements,
        } => {
            let marker = if *in_window {
                "record".green()
            } else {
                "orphan".yellow()
            };
            let mut out = format!(
                "{:>4}  {} seq={} {} .. {} samples={} fields={} interval={}s",
                page,
                marker,
                sequence,
                format_time(*start_timestamp_s),
                format_time(*end_timestamp_s),
                num_samples,
                config.fields,
                config.interval_s
            );
            for element in elements.iter().flatten() {
                out.push_str(&format!(
                    "\n        {}  {}  {}  {}",
                    format_time(element.timestamp_s),
                    format_value(element.temperature_c, 2),
                    format_value(element.humidity_rh, 1),
                    format_value(element.pressure_pa, 0)
                ));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;
    use envlog_core::{FieldMask, Reading, SensorError};
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.storage.data_dir = dir.path().to_path_buf();
        settings.storage.page_size = 128;
        settings.storage.page_count = 4;
        settings.storage.max_samples = Some(3);
        settings
    }

    /// Writes `count` samples, one every 10 seconds starting at t=0.
    fn populate(settings: &Settings, count: u32) {
        let (log, _) = envlog_node::start_log(settings).unwrap();
        log.config_set(LogConfig::default().with_interval(10)).unwrap();
        let mut sensor = |_: FieldMask| Ok::<_, SensorError>(Reading::new(21.5, 40.0, 101_325.0));
        for i in 0..count {
            log.process(i * 10, &mut sensor).unwrap();
        }
    }

    #[test]
    fn test_missing_image() {
        let dir = TempDir::new().unwrap();
        let err = execute(&settings(&dir), Commands::Info, false).unwrap_err();
        assert!(err.to_string().contains("no flash image"));
    }

    #[test]
    fn test_read_with_cursor_file() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        populate(&settings, 6);
        let cursor_file = dir.path().join("cursor.json");

        let read = |max| Commands::Read {
            cursor_file: Some(cursor_file.clone()),
            max,
            all: false,
        };

        let first: serde_json::Value =
            serde_json::from_str(&execute(&settings, read(4), true).unwrap()).unwrap();
        assert_eq!(first["elements"].as_array().unwrap().len(), 4);
        assert_eq!(first["state"], "positioned");
        assert!(cursor_file.exists());

        let second: serde_json::Value =
            serde_json::from_str(&execute(&settings, read(4), true).unwrap()).unwrap();
        let elements = second["elements"].as_array().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0]["timestamp_s"], 40);
        assert_eq!(second["state"], "end_of_log");
    }

    #[test]
    fn test_read_all_in_batches() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        populate(&settings, 6);

        let all = |max| Commands::Read {
            cursor_file: None,
            max,
            all: true,
        };

        let output: serde_json::Value =
            serde_json::from_str(&execute(&settings, all(1), true).unwrap()).unwrap();
        assert_eq!(output["elements"].as_array().unwrap().len(), 6);
        assert_eq!(output["state"], "end_of_log");

        let err = execute(&settings, all(0), true).unwrap_err();
        assert!(err.to_string().contains("--max"));
    }

    #[test]
    fn test_read_rejects_zero_max() {
        assert!(Cli::try_parse_from(["envlog-cli", "read", "--all", "--max", "0"]).is_err());
        assert!(Cli::try_parse_from(["envlog-cli", "read", "--all", "--max", "1"]).is_ok());
    }

    #[test]
    fn test_config_set_and_get() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        populate(&settings, 1);

        let set = Commands::Config {
            action: ConfigAction::Set {
                fields: Some("temperature,pressure".to_string()),
                interval: Some(60),
                overflow: Some("stop".to_string()),
            },
        };
        execute(&settings, set, false).unwrap();

        let get = Commands::Config {
            action: ConfigAction::Get,
        };
        let config: LogConfig =
            serde_json::from_str(&execute(&settings, get, true).unwrap()).unwrap();
        assert_eq!(config.fields, FieldMask::TEMPERATURE | FieldMask::PRESSURE);
        assert_eq!(config.interval_s, 60);
        assert_eq!(config.overflow, OverflowPolicy::Stop);
    }

    #[test]
    fn test_config_set_rejects_bad_values() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        populate(&settings, 1);

        let set = |overflow: &str| Commands::Config {
            action: ConfigAction::Set {
                fields: None,
                interval: None,
                overflow: Some(overflow.to_string()),
            },
        };
        assert!(execute(&settings, set("sideways"), false).is_err());

        let empty = Commands::Config {
            action: ConfigAction::Set {
                fields: None,
                interval: None,
                overflow: None,
            },
        };
        assert!(execute(&settings, empty, false).is_err());
    }

    #[test]
    fn test_purge_requires_confirmation() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        populate(&settings, 6);

        assert!(execute(&settings, Commands::Purge { yes: false }, false).is_err());
        execute(&settings, Commands::Purge { yes: true }, false).unwrap();

        let info: serde_json::Value =
            serde_json::from_str(&execute(&settings, Commands::Info, true).unwrap()).unwrap();
        assert_eq!(info["committed_pages"], 0);
    }

    #[test]
    fn test_verify_and_dump() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        populate(&settings, 6);

        let report: serde_json::Value =
            serde_json::from_str(&execute(&settings, Commands::Verify, true).unwrap()).unwrap();
        assert_eq!(report["valid_records"], 2);
        assert_eq!(report["erased_pages"], 2);

        let dump = Commands::Dump {
            page: None,
            elements: true,
        };
        let pages: serde_json::Value =
            serde_json::from_str(&execute(&settings, dump, true).unwrap()).unwrap();
        let pages = pages.as_array().unwrap();
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[0]["status"], "record");
        assert_eq!(pages[0]["elements"].as_array().unwrap().len(), 3);
        assert_eq!(pages[2]["status"], "erased");

        let out_of_range = Commands::Dump {
            page: Some(9),
            elements: false,
        };
        assert!(execute(&settings, out_of_range, false).is_err());
    }
}
