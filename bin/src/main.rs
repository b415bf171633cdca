//! CLI for fd-panel.
//!
//! Validates identifier crosswalk tables and summarizes persisted panels.

use clap::{Parser, Subcommand};
use fd_panel::{CrosswalkBuilder, IdentifierLink, Panel, PanelError, Result, persist};
use std::{fs::File, io::BufReader, path::Path, process::ExitCode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fd-panel")]
#[command(about = "Point-in-time monthly panels for cross-sectional research", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a JSON array of identifier links for overlapping primaries
    CheckLinks {
        /// Path to the links file
        links: std::path::PathBuf,
    },
    /// Summarize a persisted panel
    Describe {
        /// Path to the panel JSON file
        panel: std::path::PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::CheckLinks { links } => check_links(&links).map(|report| {
            print!("{report}");
            report.conflicts.is_empty()
        }),
        Commands::Describe { panel } => persist::read_json(&panel).map(|panel| {
            print!("{}", describe(&panel));
            true
        }),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Outcome of loading a links file.
#[derive(Debug, Default)]
struct LinkReport {
    accepted: usize,
    conflicts: Vec<String>,
}

impl std::fmt::Display for LinkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Accepted links: {}", self.accepted)?;
        writeln!(f, "Conflicts: {}", self.conflicts.len())?;
        for conflict in &self.conflicts {
            writeln!(f, "  - {conflict}")?;
        }
        Ok(())
    }
}

/// Register every link, collecting conflicts instead of stopping at the first.
fn check_links(path: &Path) -> Result<LinkReport> {
    let links: Vec<IdentifierLink> = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    tracing::info!(path = %path.display(), links = links.len(), "checking identifier links");

    let mut builder = CrosswalkBuilder::new();
    let mut report = LinkReport::default();
    for link in links {
        match builder.register_link(link) {
            Ok(()) => report.accepted += 1,
            Err(err @ (PanelError::OverlapConflict { .. } | PanelError::InvalidPeriod(_))) => {
                report.conflicts.push(err.to_string());
            }
            Err(err) => return Err(err),
        }
    }
    Ok(report)
}

/// Shape, coverage and per-field missing counts of a panel.
fn describe(panel: &Panel) -> String {
    let mut out = String::new();
    out.push_str(&format!("Rows: {}\n", panel.len()));
    out.push_str(&format!("Entities: {}\n", panel.entities().len()));
    match panel.month_range() {
        Some((first, last)) => out.push_str(&format!("Months: {first} to {last}\n")),
        None => out.push_str("Months: none\n"),
    }
    out.push_str("Fields:\n");
    for (field, column) in panel.schema().iter().zip(panel.columns()) {
        out.push_str(&format!("  {} ({}): {} missing\n", field.name, field.dtype, column.null_count()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fd_panel::{EntityId, FieldType, Namespace, PanelBuilder, Period, Schema, Value};

    fn ym(year: i32, month: u8) -> Period {
        Period::from_year_month(year, month).unwrap()
    }

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fd-panel-bin-{tag}-{}.json", std::process::id()))
    }

    #[test]
    fn test_check_links_reports_overlaps() {
        let links = vec![
            IdentifierLink::new(Namespace::Filing, "001690", EntityId(1), ym(2000, 1), Some(ym(2010, 1)), true),
            IdentifierLink::new(Namespace::Filing, "001690", EntityId(2), ym(2005, 1), None, true),
            IdentifierLink::new(Namespace::Filing, "001690", EntityId(2), ym(2010, 1), None, false),
        ];
        let path = temp_path("links");
        std::fs::write(&path, serde_json::to_string(&links).unwrap()).unwrap();
        let report = check_links(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].contains("001690"));
    }

    #[test]
    fn test_check_links_missing_file() {
        let err = check_links(Path::new("/nonexistent/links.json"));
        assert!(matches!(err, Err(PanelError::Io(_))));
    }

    #[test]
    fn test_describe_counts_missing() {
        let mut builder = PanelBuilder::new(Schema::new().with("me", FieldType::Numeric));
        builder
            .push_row(EntityId(1), ym(2020, 1), [("me", Value::from(1.0))])
            .unwrap();
        builder
            .push_row(EntityId(2), ym(2020, 3), Vec::<(&str, Value)>::new())
            .unwrap();
        let summary = describe(&builder.build().unwrap());

        assert!(summary.contains("Rows: 2"));
        assert!(summary.contains("Entities: 2"));
        assert!(summary.contains("Months: 2020-01 to 2020-03"));
        assert!(summary.contains("me (numeric): 1 missing"));
    }
}
