mod campaign;
mod contact;
mod log;
mod template;

mod util;

use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use prospekt::{config, mock, Config, Database};
use tokio_util::sync::CancellationToken;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // If executed in a context where config file is available then settings
    // such as the database path and smtp credentials are picked up from it.
    // Otherwise defaults are used, and a config file path can still be
    // provided through the `--config` argument.
    let mut config: Config = config::load().unwrap_or_default();

    let matches = cmd().get_matches();

    // Load the proper config if proper argument is provided.
    if let Some(config_path) = matches.get_one::<String>("config") {
        config = config::load_from(config_path)?;
    }

    if let Some(verbosity) = matches.get_one::<String>("verbosity") {
        config.tracing.level = verbosity.as_str().into();
    }
    if config.tracing.enabled {
        prospekt::tracing::init(&config)?;
    }

    match matches.subcommand() {
        Some(("contact", m)) => contact::run(m, &config, cancel.clone()).await?,
        Some(("template", m)) => template::run(m, &config, cancel.clone()).await?,
        Some(("campaign", m)) => campaign::run(m, &config, cancel.clone()).await?,
        Some(("log", m)) => log::run(m, &config, cancel.clone()).await?,
        Some(("mock", m)) => {
            config.dev.mock_regen |= m.get_flag("regen");

            let db = Database::open(&config.database.path)?;
            mock::generate(&config, &db)?;
            println!("Generated mock contacts, template and campaigns");
            cancel.cancel();
        }
        _ => unimplemented!(),
    }

    // Wait for either ctrl_c signal or message from within the sweep task
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Initiating graceful shutdown...");
            cancel.cancel();
        },
        _ = cancel.cancelled() => {},
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    Ok(())
}

pub fn cmd() -> Command {
    Command::new("prospekt")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .infer_subcommands(true)
        .version(VERSION)
        .about(
            "Keep track of people you meet and follow up with them\n\
            on a schedule.",
        )
        .subcommand(contact::cmd())
        .subcommand(template::cmd())
        .subcommand(campaign::cmd())
        .subcommand(log::cmd())
        .subcommand(
            Command::new("mock")
                .display_order(50)
                .about("Generate mock data for development")
                .arg(
                    Arg::new("regen")
                        .long("regen")
                        .action(ArgAction::SetTrue)
                        .help("Wipe and regenerate mock data that is already present"),
                ),
        )
        .arg(Arg::new("config").long("config").value_name("PATH"))
        .arg(
            Arg::new("verbosity")
                .long("verbosity")
                .short('v')
                .display_order(100)
                .value_name("level")
                .value_parser(["trace", "debug", "normal", "support", "critical", "off"])
                .global(true)
                .help("Set the verbosity of the log output"),
        )
}
