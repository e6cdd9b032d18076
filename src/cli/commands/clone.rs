//! `tbom clone` command - copy a part's BOM lines onto another part

use console::style;
use miette::Result;

use crate::cli::helpers::{open_engine, resolve_part};
use crate::cli::output::print_record;
use crate::cli::{GlobalOpts, OutputFormat};

#[derive(clap::Args, Debug)]
pub struct CloneArgs {
    /// Part whose active lines are copied (id or SKU)
    pub source: String,

    /// Part receiving the lines (id or SKU)
    pub target: String,
}

/// Run the clone command
pub fn run(args: CloneArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let source = resolve_part(&engine, &args.source)?;
    let target = resolve_part(&engine, &args.target)?;

    let report = engine.clone_subtree(&source.id, &target.id)?;

    match global.output {
        OutputFormat::Json | OutputFormat::Yaml => print_record(&report, global.output)?,
        _ => {
            println!(
                "{} Cloned {} line(s) from {} onto {}",
                style("✓").green(),
                style(report.cloned_lines).cyan(),
                style(&source.sku).yellow(),
                style(&target.sku).yellow()
            );
            if report.reused_lines > 0 {
                println!(
                    "   {} existing line(s) kept",
                    style(report.reused_lines).dim()
                );
            }
            println!(
                "   {} part(s) in the source subtree",
                style(report.subtree_parts).dim()
            );
        }
    }
    Ok(())
}
