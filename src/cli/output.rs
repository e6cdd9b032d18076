//! Output formatting utilities

use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::cli::OutputFormat;

/// Determine the effective output format based on context
pub fn effective_format(format: OutputFormat, is_list: bool) -> OutputFormat {
    match format {
        OutputFormat::Auto => {
            if is_list {
                OutputFormat::Table
            } else {
                OutputFormat::Yaml
            }
        }
        other => other,
    }
}

/// Serialize a record as YAML or JSON
pub fn print_record<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
        }
        _ => {
            print!("{}", serde_yml::to_string(value).into_diagnostic()?);
        }
    }
    Ok(())
}

/// Print rows as a rounded table, or serialized when a data format is asked for
pub fn print_rows<R, T>(records: &[T], format: OutputFormat, to_row: impl Fn(&T) -> R) -> Result<()>
where
    R: Tabled,
    T: Serialize,
{
    match effective_format(format, true) {
        OutputFormat::Json | OutputFormat::Yaml => print_record(&records, format),
        _ => {
            let rows: Vec<R> = records.iter().map(to_row).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
            Ok(())
        }
    }
}
