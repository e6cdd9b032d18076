//! `tbom line` command - BOM line management

use clap::Subcommand;
use console::style;
use miette::Result;
use rust_decimal::Decimal;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::cli::helpers::{open_engine, parse_decimal, parse_line_id, resolve_part, truncate_str};
use crate::cli::output::{effective_format, print_record};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::PartId;
use crate::engine::BomEngine;
use crate::entities::line::{BomLine, LinePatch, NewLine};

#[derive(Subcommand, Debug)]
pub enum LineCommands {
    /// Add a child part under a parent
    Add(AddArgs),

    /// Change quantity, scrap, unit, position or notes of a line
    Update(UpdateArgs),

    /// Move a line to another parent
    Move(MoveArgs),

    /// Deactivate a line (kept for history)
    Rm(RmArgs),

    /// List the lines under a part
    List(ListArgs),
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Parent part (id or SKU)
    pub parent: String,

    /// Child part (id or SKU)
    pub child: String,

    /// Quantity of child per one parent
    #[arg(long, short = 'q', value_parser = parse_decimal, default_value = "1")]
    pub qty: Decimal,

    /// Expected scrap in percent, 0 to below 100
    #[arg(long, value_parser = parse_decimal, default_value = "0")]
    pub scrap: Decimal,

    /// Unit of the quantity (defaults to the child's usage unit)
    #[arg(long)]
    pub uom: Option<String>,

    /// Position among the parent's lines
    #[arg(long)]
    pub sort_order: Option<i64>,

    #[arg(long)]
    pub notes: Option<String>,

    /// Allow an OBSOLETE or DISCONTINUED child, recording this reason on the line
    #[arg(long, value_name = "REASON")]
    pub allow_obsolete: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct UpdateArgs {
    /// Line id (LINE-...)
    pub line: String,

    #[arg(long, short = 'q', value_parser = parse_decimal)]
    pub qty: Option<Decimal>,

    #[arg(long, value_parser = parse_decimal)]
    pub scrap: Option<Decimal>,

    #[arg(long)]
    pub uom: Option<String>,

    #[arg(long)]
    pub sort_order: Option<i64>,

    #[arg(long, conflicts_with = "clear_notes")]
    pub notes: Option<String>,

    /// Remove the notes
    #[arg(long)]
    pub clear_notes: bool,
}

#[derive(clap::Args, Debug)]
pub struct MoveArgs {
    /// Line id (LINE-...)
    pub line: String,

    /// New parent part (id or SKU)
    pub parent: String,
}

#[derive(clap::Args, Debug)]
pub struct RmArgs {
    /// Line id (LINE-...)
    pub line: String,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Parent part (id or SKU)
    pub part: String,

    /// Include deactivated lines
    #[arg(long)]
    pub all: bool,

    /// List the lines that use the part instead of the lines under it
    #[arg(long)]
    pub parents: bool,
}

/// Run a line subcommand
pub fn run(cmd: LineCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        LineCommands::Add(args) => run_add(args, global),
        LineCommands::Update(args) => run_update(args, global),
        LineCommands::Move(args) => run_move(args, global),
        LineCommands::Rm(args) => run_rm(args, global),
        LineCommands::List(args) => run_list(args, global),
    }
}

#[derive(Tabled)]
struct LineRow {
    #[tabled(rename = "#")]
    sort_order: i64,
    #[tabled(rename = "PARENT")]
    parent: String,
    #[tabled(rename = "CHILD")]
    child: String,
    #[tabled(rename = "QTY")]
    qty: String,
    #[tabled(rename = "UOM")]
    uom: String,
    #[tabled(rename = "SCRAP %")]
    scrap: String,
    #[tabled(rename = "ACTIVE")]
    active: String,
    #[tabled(rename = "NOTES")]
    notes: String,
    #[tabled(rename = "ID")]
    id: String,
}

/// Lines shown with SKUs instead of part ids
fn line_rows(engine: &BomEngine, lines: &[BomLine]) -> Result<Vec<LineRow>> {
    let sku = |id: &PartId| -> Result<String> { Ok(engine.get_part(id)?.sku.to_string()) };
    lines
        .iter()
        .map(|line| {
            Ok(LineRow {
                sort_order: line.sort_order,
                parent: sku(&line.parent_part_id)?,
                child: sku(&line.child_part_id)?,
                qty: line.qty_per.to_string(),
                uom: line.uom.clone(),
                scrap: line.scrap_pct.to_string(),
                active: if line.is_active { "yes" } else { "no" }.to_string(),
                notes: truncate_str(line.notes.as_deref().unwrap_or_default(), 30),
                id: line.id.to_string(),
            })
        })
        .collect()
}

fn announce(verb: &str, line: &BomLine, global: &GlobalOpts) -> Result<()> {
    match global.output {
        OutputFormat::Json | OutputFormat::Yaml => print_record(line, global.output),
        OutputFormat::Id => {
            println!("{}", line.id);
            Ok(())
        }
        _ => {
            println!(
                "{} {} line {} (qty {} {}, scrap {}%)",
                style("✓").green(),
                verb,
                style(&line.id).cyan(),
                line.qty_per,
                line.uom,
                line.scrap_pct
            );
            Ok(())
        }
    }
}

fn run_add(args: AddArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let parent = resolve_part(&engine, &args.parent)?;
    let child = resolve_part(&engine, &args.child)?;
    let uom = args.uom.unwrap_or_else(|| child.uom.clone());

    let mut new = NewLine::new(parent.id, child.id, args.qty, args.scrap, uom);
    if let Some(order) = args.sort_order {
        new = new.with_sort_order(order);
    }
    if let Some(notes) = args.notes {
        new = new.with_notes(notes);
    }
    if let Some(reason) = args.allow_obsolete {
        new = new.allow_obsolete(reason);
    }

    let line = engine.add_line(new)?;
    announce(
        &format!("Added {} → {} as", parent.sku, child.sku),
        &line,
        global,
    )
}

fn run_update(args: UpdateArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let id = parse_line_id(&args.line)?;
    let patch = LinePatch {
        qty_per: args.qty,
        scrap_pct: args.scrap,
        uom: args.uom,
        sort_order: args.sort_order,
        notes: if args.clear_notes {
            Some(None)
        } else {
            args.notes.map(Some)
        },
    };
    if patch.is_empty() {
        println!("Nothing to change.");
        return Ok(());
    }

    let line = engine.update_line(&id, patch)?;
    announce("Updated", &line, global)
}

fn run_move(args: MoveArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let id = parse_line_id(&args.line)?;
    let parent = resolve_part(&engine, &args.parent)?;

    let line = engine.move_line(&id, &parent.id)?;
    announce(&format!("Moved under {}:", parent.sku), &line, global)
}

fn run_rm(args: RmArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let id = parse_line_id(&args.line)?;
    engine.deactivate_line(&id)?;

    if global.output != OutputFormat::Id {
        println!(
            "{} Deactivated line {}",
            style("✓").green(),
            style(&id).cyan()
        );
    }
    Ok(())
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let part = resolve_part(&engine, &args.part)?;
    let lines = if args.parents {
        engine.parents_of(&part.id)?
    } else {
        engine.children_of(&part.id, args.all)?
    };

    if global.output == OutputFormat::Id {
        for line in &lines {
            println!("{}", line.id);
        }
        return Ok(());
    }
    let format = effective_format(global.output, true);
    if format != OutputFormat::Table {
        return print_record(&lines, format);
    }
    if lines.is_empty() {
        println!("{} has no lines.", part.sku);
        return Ok(());
    }

    let rows = line_rows(&engine, &lines)?;
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{} line(s)", style(lines.len()).cyan());
    Ok(())
}
