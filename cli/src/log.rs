use std::str::FromStr;

use anyhow::Result;
use clap::{value_parser, Arg, ArgMatches};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use prospekt::{delivery, Config, Contact, Database, DeliveryStatus, EmailLog};

use crate::util;

pub fn cmd() -> clap::Command {
    clap::Command::new("log")
        .subcommand_required(true)
        .display_order(40)
        .about("Inspect the email send log")
        .subcommand(
            clap::Command::new("list")
                .about("Lists log entries, newest first")
                .arg(
                    Arg::new("status")
                        .long("status")
                        .value_parser(util::status_values())
                        .help("Only entries with this delivery status"),
                )
                .arg(
                    Arg::new("campaign")
                        .long("campaign")
                        .value_name("id")
                        .help("Only entries from this campaign"),
                )
                .arg(
                    Arg::new("contact")
                        .long("contact")
                        .value_name("id")
                        .help("Only entries addressed to this contact"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_parser(value_parser!(usize))
                        .default_value("50")
                        .help("How many entries to show"),
                ),
        )
        .subcommand(clap::Command::new("stats").about("Per-status counts across the whole log"))
}

pub async fn run(sub_matches: &ArgMatches, config: &Config, cancel: CancellationToken) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match sub_matches.subcommand().unwrap_or(("list", sub_matches)) {
        ("list", sub_matches) => {
            let mut logs = if let Some(status) = sub_matches.get_one::<String>("status") {
                delivery::find_by_status(&db, DeliveryStatus::from_str(status)?)?
            } else if let Some(campaign) = sub_matches.get_one::<String>("campaign") {
                delivery::find_by_campaign(&db, Uuid::from_str(campaign)?)?
            } else if let Some(contact) = sub_matches.get_one::<String>("contact") {
                delivery::find_by_contact(&db, Uuid::from_str(contact)?)?
            } else {
                delivery::find_all(&db)?
            };

            let limit = *sub_matches.get_one::<usize>("limit").unwrap();
            let total = logs.len();
            logs.truncate(limit);

            println!("Showing {} of {} log entr(ies):", logs.len(), total);
            for log in &logs {
                print_row(&db, log);
            }
        }
        ("stats", _) => {
            let stats = delivery::statistics(&db)?;
            println!(
                "{} total: {} sent, {} failed, {} bounced, {} pending",
                stats.total, stats.sent, stats.failed, stats.bounced, stats.pending
            );
        }
        _ => unimplemented!(),
    }

    cancel.cancel();

    Ok(())
}

fn print_row(db: &Database, log: &EmailLog) {
    // Addresses read better than contact ids, fall back if the contact is
    // gone.
    let to = db
        .try_get::<Contact>(log.contact)
        .ok()
        .flatten()
        .map(|contact| contact.email)
        .unwrap_or_else(|| log.contact.to_string());

    let detail = match (&log.subject, &log.error) {
        (_, Some(error)) => format!("error: {error}"),
        (Some(subject), None) => subject.clone(),
        (None, None) => "".to_string(),
    };

    println!(
        "{}  {:<8} {:<32} {}",
        log.created_at.format("%Y-%m-%d %H:%M:%S"),
        log.status,
        to,
        detail
    );
}
