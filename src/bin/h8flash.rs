use std::path::PathBuf;

use clap::Parser;
use h8flash::{
    cli::{config::Config, flash, list_target, ConnectArgs, FlashArgs},
    logging::initialize_logger,
};
use log::{debug, LevelFilter};
use miette::Result;

/// Write images to the on-chip flash of Renesas H8, SH and RX devices in
/// boot mode
#[derive(Debug, Parser)]
#[command(about, version, disable_version_flag = true)]
struct Cli {
    /// Image to write: ELF, S-record or raw binary
    #[arg(required_unless_present = "list")]
    image: Option<PathBuf>,

    /// Print the target configuration and exit without writing
    #[arg(short = 'l', long)]
    list: bool,

    /// Log every protocol step
    #[arg(short = 'V', long)]
    verbose: bool,

    /// Print version
    #[arg(long, action = clap::ArgAction::Version)]
    version: Option<bool>,

    #[command(flatten)]
    connect_args: ConnectArgs,
    #[command(flatten)]
    flash_args: FlashArgs,
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let args = Cli::parse();
    initialize_logger(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    debug!("{:#?}", args);

    // Load any user configuration, if present.
    let config = Config::load()?;

    match args.image {
        Some(image) if !args.list => {
            flash(&args.connect_args, &args.flash_args, &config, &image)?;
            println!("done");
            Ok(())
        }
        _ => list_target(&args.connect_args, &config),
    }
}
