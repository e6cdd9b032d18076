//! `tbom tree` command - costed BOM tree

use chrono::{DateTime, Utc};
use console::style;
use miette::Result;

use crate::cli::helpers::{open_engine, parse_datetime, resolve_part};
use crate::cli::output::print_record;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::entities::tree::{BomTree, TreeLine};

#[derive(clap::Args, Debug)]
pub struct TreeArgs {
    /// Root part (id or SKU)
    pub part: String,

    /// Include deactivated lines
    #[arg(long)]
    pub all: bool,

    /// Cost the tree with the standard costs in effect at this date
    #[arg(long, value_parser = parse_datetime)]
    pub as_of: Option<DateTime<Utc>>,

    /// Print only the total cost
    #[arg(long)]
    pub total: bool,
}

/// Run the tree command
pub fn run(args: TreeArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let root = resolve_part(&engine, &args.part)?;

    if args.total {
        println!("{}", engine.total_cost(&root.id, args.all, args.as_of)?);
        return Ok(());
    }

    let tree = match args.as_of {
        Some(date) => engine.get_tree_as_of(&root.id, args.all, date)?,
        None => engine.get_tree(&root.id, args.all)?,
    };

    match global.output {
        OutputFormat::Json | OutputFormat::Yaml => print_record(&tree, global.output),
        OutputFormat::Id => {
            print_line_ids(&tree.children);
            Ok(())
        }
        OutputFormat::Auto | OutputFormat::Table => {
            print_tree(&tree);
            Ok(())
        }
    }
}

fn print_line_ids(lines: &[TreeLine]) {
    for tl in lines {
        println!("{}", tl.line.id);
        print_line_ids(&tl.children);
    }
}

fn print_tree(tree: &BomTree) {
    if let Some(as_of) = tree.as_of {
        println!(
            "{}",
            style(format!("Costs as of {}", as_of.format("%Y-%m-%d %H:%M UTC"))).dim()
        );
    }
    print!("{}", tree.render());
    println!(
        "\n{} line(s), total {}",
        style(tree.line_count()).cyan(),
        style(tree.total_cost).green().bold()
    );
}
