//! `tbom part` command - Part management

use chrono::{DateTime, Utc};
use clap::Subcommand;
use console::style;
use miette::Result;
use rust_decimal::Decimal;
use tabled::Tabled;

use crate::cli::helpers::{open_engine, or_dash, parse_datetime, parse_decimal, resolve_part, truncate_str};
use crate::cli::output::{effective_format, print_record, print_rows};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::engine::PartFilter;
use crate::entities::history::{CostHistoryEntry, LifecycleChange};
use crate::entities::part::{LifecycleStatus, NewPart, Part, PartPatch, PartType};

#[derive(Subcommand, Debug)]
pub enum PartCommands {
    /// Create a new part
    New(NewArgs),

    /// Show a part's details
    Show(ShowArgs),

    /// List parts with filtering
    List(ListArgs),

    /// Change part fields
    Edit(EditArgs),

    /// Set the standard cost (recorded in cost history)
    Cost(CostArgs),

    /// Move a part along its lifecycle
    Lifecycle(LifecycleArgs),

    /// Show cost or lifecycle history
    History(HistoryArgs),

    /// List every assembly that uses a part, directly or transitively
    #[command(name = "where-used")]
    WhereUsed(WhereUsedArgs),
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// SKU (uppercase letters, digits, '_' and '-')
    pub sku: String,

    /// Descriptive name
    #[arg(long, short = 'n')]
    pub name: String,

    /// Part type: purchased, manufactured or phantom
    #[arg(long = "type", short = 't', default_value = "purchased")]
    pub part_type: PartType,

    /// Usage unit of measure
    #[arg(long, default_value = "EA")]
    pub uom: String,

    /// Purchase unit of measure (defaults to the usage unit)
    #[arg(long)]
    pub purchase_uom: Option<String>,

    /// Usage units per purchase unit
    #[arg(long, value_parser = parse_decimal, default_value = "1")]
    pub factor: Decimal,

    /// Standard cost per usage unit
    #[arg(long, value_parser = parse_decimal)]
    pub cost: Option<Decimal>,

    /// Decimal places kept on quantities of this part (0-6)
    #[arg(long, default_value_t = 0)]
    pub precision: u32,

    /// Smallest quantity a BOM line may use
    #[arg(long, value_parser = parse_decimal)]
    pub min: Option<Decimal>,

    /// Largest quantity a BOM line may use
    #[arg(long, value_parser = parse_decimal)]
    pub max: Option<Decimal>,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Part id or SKU
    pub part: String,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Filter by part type
    #[arg(long = "type", short = 't')]
    pub part_type: Option<PartType>,

    /// Filter by lifecycle status
    #[arg(long, short = 's')]
    pub status: Option<LifecycleStatus>,

    /// Case-insensitive match on SKU or name
    #[arg(long)]
    pub search: Option<String>,

    /// Limit number of results
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,

    /// Show count only
    #[arg(long)]
    pub count: bool,
}

#[derive(clap::Args, Debug)]
pub struct EditArgs {
    /// Part id or SKU
    pub part: String,

    /// New SKU (only while no BOM line references the part)
    #[arg(long)]
    pub sku: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long = "type")]
    pub part_type: Option<PartType>,

    #[arg(long)]
    pub uom: Option<String>,

    #[arg(long)]
    pub purchase_uom: Option<String>,

    #[arg(long, value_parser = parse_decimal)]
    pub factor: Option<Decimal>,

    /// New standard cost (requires --reason)
    #[arg(long, value_parser = parse_decimal)]
    pub cost: Option<Decimal>,

    #[arg(long)]
    pub precision: Option<u32>,

    #[arg(long, value_parser = parse_decimal, conflicts_with = "clear_min")]
    pub min: Option<Decimal>,

    #[arg(long, value_parser = parse_decimal, conflicts_with = "clear_max")]
    pub max: Option<Decimal>,

    /// Remove the minimum quantity bound
    #[arg(long)]
    pub clear_min: bool,

    /// Remove the maximum quantity bound
    #[arg(long)]
    pub clear_max: bool,

    /// Forward lifecycle move (requires --reason)
    #[arg(long)]
    pub status: Option<LifecycleStatus>,

    /// Reason recorded for cost or lifecycle changes
    #[arg(long, short = 'r', default_value = "")]
    pub reason: String,
}

#[derive(clap::Args, Debug)]
pub struct CostArgs {
    /// Part id or SKU
    pub part: String,

    /// New standard cost per usage unit
    #[arg(value_parser = parse_decimal)]
    pub cost: Decimal,

    /// Why the cost changed
    #[arg(long, short = 'r')]
    pub reason: String,

    /// When the cost takes effect (YYYY-MM-DD or RFC 3339; default now)
    #[arg(long, value_parser = parse_datetime)]
    pub effective: Option<DateTime<Utc>>,
}

#[derive(clap::Args, Debug)]
pub struct LifecycleArgs {
    /// Part id or SKU
    pub part: String,

    /// Target status: active, phase-out, obsolete or discontinued
    pub status: LifecycleStatus,

    /// Why the status changed
    #[arg(long, short = 'r')]
    pub reason: String,

    /// Allow a backwards move, recording this justification
    #[arg(long = "override")]
    pub override_reason: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct HistoryArgs {
    /// Part id or SKU
    pub part: String,

    /// Show lifecycle changes instead of cost changes
    #[arg(long)]
    pub lifecycle: bool,

    /// Limit number of entries
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct WhereUsedArgs {
    /// Part id or SKU
    pub part: String,
}

/// Run a part subcommand
pub fn run(cmd: PartCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        PartCommands::New(args) => run_new(args, global),
        PartCommands::Show(args) => run_show(args, global),
        PartCommands::List(args) => run_list(args, global),
        PartCommands::Edit(args) => run_edit(args, global),
        PartCommands::Cost(args) => run_cost(args, global),
        PartCommands::Lifecycle(args) => run_lifecycle(args, global),
        PartCommands::History(args) => run_history(args, global),
        PartCommands::WhereUsed(args) => run_where_used(args, global),
    }
}

#[derive(Tabled)]
struct PartRow {
    #[tabled(rename = "SKU")]
    sku: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    part_type: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "UOM")]
    uom: String,
    #[tabled(rename = "STD COST")]
    cost: String,
    #[tabled(rename = "ID")]
    id: String,
}

fn part_row(part: &Part) -> PartRow {
    PartRow {
        sku: part.sku.to_string(),
        name: truncate_str(&part.name, 32),
        part_type: part.part_type.to_string(),
        status: part.lifecycle_status.to_string(),
        uom: part.uom.clone(),
        cost: or_dash(part.std_cost),
        id: part.id.to_string(),
    }
}

fn announce(verb: &str, part: &Part, global: &GlobalOpts) -> Result<()> {
    match global.output {
        OutputFormat::Json | OutputFormat::Yaml => print_record(part, global.output),
        OutputFormat::Id => {
            println!("{}", part.id);
            Ok(())
        }
        _ => {
            println!(
                "{} {} part {} ({})",
                style("✓").green(),
                verb,
                style(&part.sku).yellow(),
                style(&part.id).cyan()
            );
            Ok(())
        }
    }
}

fn run_new(args: NewArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let mut new = NewPart::new(args.sku, args.name, args.part_type)
        .with_uom(args.uom)
        .with_precision(args.precision)
        .with_bounds(args.min, args.max)
        .with_author(engine.config().author());
    let purchase_uom = args.purchase_uom.unwrap_or_else(|| new.uom.clone());
    new = new.with_purchase_uom(purchase_uom, args.factor);
    if let Some(cost) = args.cost {
        new = new.with_cost(cost);
    }

    let part = engine.create_part(new)?;
    announce("Created", &part, global)
}

fn run_show(args: ShowArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let part = resolve_part(&engine, &args.part)?;
    match global.output {
        OutputFormat::Id => {
            println!("{}", part.id);
            Ok(())
        }
        OutputFormat::Table => print_rows(&[part], global.output, part_row),
        _ => print_record(&part, effective_format(global.output, false)),
    }
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let parts = engine.list_parts(&PartFilter {
        part_type: args.part_type,
        lifecycle: args.status,
        search: args.search,
        limit: args.limit,
    })?;

    if args.count {
        println!("{}", parts.len());
        return Ok(());
    }
    if global.output == OutputFormat::Id {
        for part in &parts {
            println!("{}", part.id);
        }
        return Ok(());
    }
    if parts.is_empty() && effective_format(global.output, true) == OutputFormat::Table {
        println!("No parts found.");
        return Ok(());
    }
    print_rows(&parts, global.output, part_row)
}

fn run_edit(args: EditArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let part = resolve_part(&engine, &args.part)?;

    let patch = PartPatch {
        sku: args.sku,
        name: args.name,
        part_type: args.part_type,
        uom: args.uom,
        purchase_uom: args.purchase_uom,
        conversion_factor: args.factor,
        std_cost: args.cost,
        decimal_precision: args.precision,
        min_quantity: if args.clear_min { Some(None) } else { args.min.map(Some) },
        max_quantity: if args.clear_max { Some(None) } else { args.max.map(Some) },
        lifecycle_status: args.status,
    };
    if patch.is_empty() {
        println!("Nothing to change.");
        return Ok(());
    }

    let updated = engine.update_part(&part.id, patch, &args.reason)?;
    announce("Updated", &updated, global)
}

fn run_cost(args: CostArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let part = resolve_part(&engine, &args.part)?;
    let previous = part.std_cost;

    let updated = match args.effective {
        Some(date) => engine.set_part_cost_at(&part.id, args.cost, &args.reason, date)?,
        None => engine.set_part_cost(&part.id, args.cost, &args.reason)?,
    };

    match global.output {
        OutputFormat::Json | OutputFormat::Yaml => print_record(&updated, global.output),
        _ => {
            println!(
                "{} {} cost {} → {}",
                style("✓").green(),
                style(&updated.sku).yellow(),
                style(or_dash(previous)).dim(),
                style(args.cost).cyan()
            );
            Ok(())
        }
    }
}

fn run_lifecycle(args: LifecycleArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let part = resolve_part(&engine, &args.part)?;
    let from = part.lifecycle_status;

    let updated = match &args.override_reason {
        Some(justification) => {
            engine.set_lifecycle_with_override(&part.id, args.status, &args.reason, justification)?
        }
        None => engine.set_lifecycle(&part.id, args.status, &args.reason)?,
    };

    match global.output {
        OutputFormat::Json | OutputFormat::Yaml => print_record(&updated, global.output),
        _ => {
            println!(
                "{} {} {} → {}",
                style("✓").green(),
                style(&updated.sku).yellow(),
                from,
                style(updated.lifecycle_status).cyan()
            );
            Ok(())
        }
    }
}

#[derive(Tabled)]
struct CostRow {
    #[tabled(rename = "EFFECTIVE")]
    effective: String,
    #[tabled(rename = "OLD")]
    old: String,
    #[tabled(rename = "NEW")]
    new: String,
    #[tabled(rename = "REASON")]
    reason: String,
    #[tabled(rename = "AUTHOR")]
    author: String,
}

fn cost_row(entry: &CostHistoryEntry) -> CostRow {
    CostRow {
        effective: entry.effective_date.format("%Y-%m-%d %H:%M").to_string(),
        old: or_dash(entry.old_cost),
        new: entry.new_cost.to_string(),
        reason: truncate_str(&entry.change_reason, 40),
        author: entry.author.clone(),
    }
}

#[derive(Tabled)]
struct LifecycleRow {
    #[tabled(rename = "CHANGED")]
    changed: String,
    #[tabled(rename = "FROM")]
    from: String,
    #[tabled(rename = "TO")]
    to: String,
    #[tabled(rename = "OVERRIDE")]
    overridden: String,
    #[tabled(rename = "REASON")]
    reason: String,
}

fn lifecycle_row(change: &LifecycleChange) -> LifecycleRow {
    LifecycleRow {
        changed: change.changed.format("%Y-%m-%d %H:%M").to_string(),
        from: change.from.to_string(),
        to: change.to.to_string(),
        overridden: if change.overridden { "yes" } else { "" }.to_string(),
        reason: truncate_str(&change.reason, 48),
    }
}

fn run_history(args: HistoryArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let part = resolve_part(&engine, &args.part)?;

    if args.lifecycle {
        let changes = engine.lifecycle_history(&part.id, args.limit)?;
        if changes.is_empty() && effective_format(global.output, true) == OutputFormat::Table {
            println!("No lifecycle changes for {}.", part.sku);
            return Ok(());
        }
        return print_rows(&changes, global.output, lifecycle_row);
    }

    let entries = engine.cost_history(&part.id, args.limit)?;
    if entries.is_empty() && effective_format(global.output, true) == OutputFormat::Table {
        println!("No cost changes for {}.", part.sku);
        return Ok(());
    }
    print_rows(&entries, global.output, cost_row)
}

fn run_where_used(args: WhereUsedArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let part = resolve_part(&engine, &args.part)?;
    let users = engine.where_used(&part.id)?;

    if global.output == OutputFormat::Id {
        for user in &users {
            println!("{}", user.id);
        }
        return Ok(());
    }
    if users.is_empty() && effective_format(global.output, true) == OutputFormat::Table {
        println!("{} is not used by any assembly.", part.sku);
        return Ok(());
    }
    print_rows(&users, global.output, part_row)
}
