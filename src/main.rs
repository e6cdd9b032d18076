use clap::Parser;
use miette::Result;
use tbom::cli::{Cli, Commands};
use tbom::core::logging;

fn main() -> Result<()> {
    // Install miette's fancy error handler for beautiful diagnostics
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    match cli.command {
        Commands::Init(args) => tbom::cli::commands::init::run(args, &cli.global),
        Commands::Part(cmd) => tbom::cli::commands::part::run(cmd, &cli.global),
        Commands::Line(cmd) => tbom::cli::commands::line::run(cmd, &cli.global),
        Commands::Tree(args) => tbom::cli::commands::tree::run(args, &cli.global),
        Commands::Clone(args) => tbom::cli::commands::clone::run(args, &cli.global),
    }
}
