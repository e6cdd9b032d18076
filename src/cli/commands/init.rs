//! `tbom init` command - create the database

use console::style;
use miette::Result;

use crate::cli::helpers::open_engine;
use crate::cli::GlobalOpts;

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Only print the database path
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

/// Run the init command
pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    // Opening creates the file and schema when missing
    let engine = open_engine(global)?;
    let path = engine.config().database.display().to_string();

    if args.quiet {
        println!("{}", path);
    } else {
        println!(
            "{} BOM database ready at {}",
            style("✓").green(),
            style(&path).cyan()
        );
    }
    Ok(())
}
