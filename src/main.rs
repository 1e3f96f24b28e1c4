use clap::Parser;

use fleetbump::{cli, command};

fn initialize_logger(debug: bool) -> fleetbump::Result<()> {
    let filter = if debug {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let config = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("fleetbump")
        .build();

    simplelog::TermLogger::init(
        filter,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    Ok(())
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli_args = cli::Args::parse();

    initialize_logger(cli_args.debug)?;

    let config = cli_args.load_config()?;
    let forge = command::create_forge(&cli_args, &config)?;

    match &cli_args.command {
        cli::Command::Update(_) => {
            let report = command::update::execute(&config, forge)?;
            if report.failed > 0 {
                log::warn!("{} repositories failed", report.failed);
            }
        }
        cli::Command::Status => {
            command::status::execute(&config, &forge)?;
        }
    }

    Ok(())
}
