use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{arg, value_parser, Arg, ArgAction, ArgMatches};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use prospekt::{
    campaign, delivery, Campaign, CampaignExecutor, Category, Config, Database, Schedule,
    SmtpMailer,
};

use crate::util;

pub fn cmd() -> clap::Command {
    clap::Command::new("campaign")
        .subcommand_required(true)
        .display_order(30)
        .about("Inspect, manipulate and run campaigns")
        .subcommand(
            clap::Command::new("add")
                .arg_required_else_help(true)
                .about("Adds new campaign")
                .arg(arg!(<name> "Campaign name"))
                .arg(
                    Arg::new("template")
                        .long("template")
                        .short('t')
                        .required(true)
                        .value_name("id")
                        .help("Template sent by this campaign"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .action(ArgAction::Append)
                        .required(true)
                        .value_parser(util::category_values())
                        .help("Category to send to, repeat for multiple"),
                )
                .arg(
                    Arg::new("schedule")
                        .long("schedule")
                        .short('s')
                        .default_value("weekly")
                        .value_parser(["daily", "weekly", "monthly", "custom"])
                        .help("How often the campaign fires"),
                )
                .arg(arg!(--at [datetime] "Anchor as YYYY-MM-DD HH:MM, defaults to now")),
        )
        .subcommand(clap::Command::new("list").about("Lists campaigns, newest first"))
        .subcommand(
            clap::Command::new("get")
                .arg_required_else_help(true)
                .about("Gets a single campaign with its send statistics")
                .arg(arg!(<id> "Campaign id")),
        )
        .subcommand(
            clap::Command::new("enable")
                .arg_required_else_help(true)
                .about("Resumes a paused campaign")
                .arg(arg!(<id> "Campaign id")),
        )
        .subcommand(
            clap::Command::new("disable")
                .arg_required_else_help(true)
                .about("Pauses a campaign without losing its schedule")
                .arg(arg!(<id> "Campaign id")),
        )
        .subcommand(
            clap::Command::new("run")
                .arg_required_else_help(true)
                .about("Runs a campaign right now, regardless of its schedule")
                .arg(arg!(<id> "Campaign id"))
                .arg(
                    Arg::new("contact")
                        .long("contact")
                        .action(ArgAction::Append)
                        .value_name("id")
                        .help("Send only to this contact, repeat for multiple"),
                ),
        )
        .subcommand(
            clap::Command::new("run-due")
                .about("Executes every campaign whose next run is due")
                .arg(
                    Arg::new("every")
                        .long("every")
                        .value_name("seconds")
                        .value_parser(value_parser!(u64))
                        .help("Keep sweeping at this interval instead of once"),
                ),
        )
        .subcommand(
            clap::Command::new("rm")
                .arg_required_else_help(true)
                .about("Removes selected campaign")
                .arg(arg!(<id> "Campaign id")),
        )
}

pub async fn run(sub_matches: &ArgMatches, config: &Config, cancel: CancellationToken) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match sub_matches.subcommand().unwrap_or(("list", sub_matches)) {
        ("add", sub_matches) => {
            let template = Uuid::from_str(sub_matches.get_one::<String>("template").unwrap())?;
            let targets = sub_matches
                .get_many::<String>("target")
                .unwrap_or_default()
                .map(|target| Category::from_str(target))
                .collect::<Result<BTreeSet<_>, _>>()?;
            let anchor = match sub_matches.get_one::<String>("at") {
                Some(at) => util::parse_datetime(at)?,
                None => Utc::now(),
            };
            let schedule = match sub_matches.get_one::<String>("schedule").unwrap().as_str() {
                "daily" => Schedule::Daily { anchor },
                "weekly" => Schedule::Weekly { anchor },
                "monthly" => Schedule::Monthly { anchor },
                "custom" => Schedule::Custom { at: anchor },
                _ => unreachable!(),
            };

            let campaign = Campaign {
                name: sub_matches.get_one::<String>("name").cloned().unwrap(),
                template,
                targets,
                schedule,
                ..Default::default()
            };

            let campaign = campaign::create(&db, campaign)?;
            println!(
                "Added campaign {} ({}), first run at {}",
                campaign.name,
                campaign.id,
                campaign.next_run.format("%Y-%m-%d %H:%M")
            );
        }
        ("list", _) => {
            let campaigns = campaign::find_all(&db)?;

            println!("Found {} campaign(s):", campaigns.len());
            for campaign in &campaigns {
                print_row(campaign);
            }
        }
        ("get", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let campaign = campaign::find(&db, id)?;
            let stats = delivery::campaign_statistics(&db, id)?;

            print_row(&campaign);
            println!("    template:  {}", campaign.template);
            if let Some(last_run) = campaign.last_run {
                println!("    last run:  {}", last_run.format("%Y-%m-%d %H:%M"));
            }
            println!(
                "    log:       {} total, {} sent, {} failed, {} bounced",
                stats.total, stats.sent, stats.failed, stats.bounced
            );
        }
        ("enable", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let campaign = campaign::toggle_active(&db, id, true)?;
            println!(
                "Enabled campaign {}, next run at {}",
                campaign.name,
                campaign.next_run.format("%Y-%m-%d %H:%M")
            );
        }
        ("disable", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let campaign = campaign::toggle_active(&db, id, false)?;
            println!("Disabled campaign {}", campaign.name);
        }
        ("run", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let contacts = sub_matches
                .get_many::<String>("contact")
                .unwrap_or_default()
                .map(|contact| Uuid::from_str(contact))
                .collect::<Result<Vec<_>, _>>()?;

            let executor = executor(config, &db)?;
            match executor.execute_manual(id, &contacts, Utc::now()).await {
                Ok(report) => println!("{report}"),
                Err(e) => println!("Run failed: {}", e.kind),
            }
        }
        ("run-due", sub_matches) => {
            let executor = executor(config, &db)?;

            if let Some(&secs) = sub_matches.get_one::<u64>("every") {
                println!("Sweeping due campaigns every {secs}s, ctrl-c to stop");
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_secs(secs));
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                for report in executor.run_due(Utc::now()).await {
                                    println!("{report}");
                                }
                            }
                            _ = cancel.cancelled() => break,
                        }
                    }
                });

                // The sweep task keeps going until ctrl_c.
                return Ok(());
            }

            let reports = executor.run_due(Utc::now()).await;
            if reports.is_empty() {
                println!("No campaigns due");
            }
            for report in reports {
                println!("{report}");
            }
        }
        ("rm", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let campaign = campaign::find(&db, id)?;
            campaign::delete(&db, id)?;
            println!("Removed campaign {}", campaign.name);
        }
        _ => unimplemented!(),
    }

    cancel.cancel();

    Ok(())
}

fn executor(config: &Config, db: &Database) -> Result<CampaignExecutor> {
    let mailer = Arc::new(SmtpMailer::new(config)?);
    Ok(CampaignExecutor::new(config, db.clone(), mailer)?)
}

fn print_row(campaign: &Campaign) {
    let state = if campaign.is_active { "active" } else { "paused" };
    let targets = campaign
        .targets
        .iter()
        .map(|target| target.to_string())
        .collect::<Vec<_>>()
        .join(",");
    println!(
        "{}  {:<30} {:<8} next {}  [{}]  {}",
        campaign.id,
        campaign.name,
        campaign.schedule,
        campaign.next_run.format("%Y-%m-%d %H:%M"),
        targets,
        state
    );
}
