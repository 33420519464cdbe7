use std::str::FromStr;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{arg, Arg, ArgAction, ArgMatches};
use tokio_util::sync::CancellationToken;

use prospekt::{contact, Category, Config, Contact, Database};

use crate::util;

pub fn cmd() -> clap::Command {
    clap::Command::new("contact")
        .subcommand_required(true)
        .display_order(10)
        .about("Inspect and manipulate contacts")
        .subcommand(
            clap::Command::new("add")
                .arg_required_else_help(true)
                .about("Adds new contact")
                .arg(arg!(<first_name> "Contact first name"))
                .arg(arg!(<last_name> "Contact last name"))
                .arg(arg!(<email> "Contact email"))
                .arg(
                    Arg::new("category")
                        .short('c')
                        .long("category")
                        .value_parser(util::category_values())
                        .default_value("firmware")
                        .help("Audience category the contact belongs to"),
                )
                .arg(arg!(--company [company] "Company the contact works for"))
                .arg(arg!(--phone [phone] "Contact phone number"))
                .arg(arg!(--context [context] "What the conversation was about"))
                .arg(arg!(--location [location] "Where the meeting took place"))
                .arg(arg!(--date [date] "Meeting date as YYYY-MM-DD")),
        )
        .subcommand(
            clap::Command::new("get")
                .about("Gets a single contact with all its details")
                .arg(arg!(-e --email [email] "Contact email"))
                .arg(Arg::new("id").help("Contact id")),
        )
        .subcommand(
            clap::Command::new("list")
                .about("Lists contacts, newest first")
                .arg(
                    Arg::new("category")
                        .short('c')
                        .long("category")
                        .value_parser(util::category_values())
                        .help("Only list contacts from this category"),
                )
                .arg(
                    Arg::new("subscribed")
                        .long("subscribed")
                        .action(ArgAction::SetTrue)
                        .help("Only list contacts that can still be mailed"),
                ),
        )
        .subcommand(
            clap::Command::new("search")
                .arg_required_else_help(true)
                .about("Searches contacts by name, email or company")
                .arg(arg!(<term> "Search term")),
        )
        .subcommand(
            clap::Command::new("unsubscribe")
                .about("Marks selected contact as unsubscribed")
                .arg(arg!(-e --email [email] "Contact email"))
                .arg(Arg::new("id").help("Contact id")),
        )
        .subcommand(
            clap::Command::new("rm")
                .about("Removes selected contact")
                .arg(arg!(-e --email [email] "Contact email"))
                .arg(Arg::new("id").help("Contact id")),
        )
}

pub async fn run(sub_matches: &ArgMatches, config: &Config, cancel: CancellationToken) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match sub_matches.subcommand().unwrap_or(("list", sub_matches)) {
        ("add", sub_matches) => {
            let category = sub_matches.get_one::<String>("category").cloned().unwrap();
            let meeting_date = sub_matches
                .get_one::<String>("date")
                .map(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d"))
                .transpose()?;

            let contact = Contact {
                first_name: sub_matches.get_one::<String>("first_name").cloned().unwrap(),
                last_name: sub_matches.get_one::<String>("last_name").cloned().unwrap(),
                email: sub_matches.get_one::<String>("email").cloned().unwrap(),
                category: Category::from_str(&category)?,
                company: sub_matches
                    .get_one::<String>("company")
                    .cloned()
                    .unwrap_or_default(),
                phone: sub_matches
                    .get_one::<String>("phone")
                    .cloned()
                    .unwrap_or_default(),
                context: sub_matches
                    .get_one::<String>("context")
                    .cloned()
                    .unwrap_or_default(),
                meeting_location: sub_matches
                    .get_one::<String>("location")
                    .cloned()
                    .unwrap_or_default(),
                meeting_date,
                ..Default::default()
            };

            let contact = contact::create(&db, contact)?;
            println!(
                "Added contact {} <{}> ({})",
                contact.full_name(),
                contact.email,
                contact.id
            );
        }
        ("get", sub_matches) => {
            let contact = util::select_contact(&db, sub_matches)?;
            print_details(&contact);
        }
        ("list", sub_matches) => {
            let subscribed_only = sub_matches.get_flag("subscribed");
            let contacts = match sub_matches.get_one::<String>("category") {
                Some(category) => {
                    contact::find_by_category(&db, Category::from_str(category)?, subscribed_only)?
                }
                None => {
                    let mut contacts = contact::find_all(&db)?;
                    if subscribed_only {
                        contacts.retain(|contact| contact.is_subscribed);
                    }
                    contacts
                }
            };

            println!("Found {} contact(s):", contacts.len());
            for contact in &contacts {
                print_row(contact);
            }
        }
        ("search", sub_matches) => {
            let term = sub_matches.get_one::<String>("term").cloned().unwrap();
            let contacts = contact::search(&db, &term)?;

            println!("Found {} contact(s):", contacts.len());
            for contact in &contacts {
                print_row(contact);
            }
        }
        ("unsubscribe", sub_matches) => {
            let contact = util::select_contact(&db, sub_matches)?;
            let contact = contact::unsubscribe(&db, contact.id)?;
            println!("Unsubscribed {} <{}>", contact.full_name(), contact.email);
        }
        ("rm", sub_matches) => {
            let contact = util::select_contact(&db, sub_matches)?;
            contact::delete(&db, contact.id)?;
            println!("Removed contact {} <{}>", contact.full_name(), contact.email);
        }
        _ => unimplemented!(),
    }

    cancel.cancel();

    Ok(())
}

fn print_row(contact: &Contact) {
    let state = if contact.is_subscribed {
        "subscribed"
    } else {
        "unsubscribed"
    };
    println!(
        "{}  {:<26} {:<32} {:<12} {}",
        contact.id,
        contact.full_name(),
        contact.email,
        contact.category,
        state
    );
}

fn print_details(contact: &Contact) {
    print_row(contact);
    if !contact.company.is_empty() {
        println!("    company:  {}", contact.company);
    }
    if !contact.phone.is_empty() {
        println!("    phone:    {}", contact.phone);
    }
    if let Some(date) = &contact.meeting_date {
        println!("    met on:   {date}");
    }
    if !contact.meeting_location.is_empty() {
        println!("    met at:   {}", contact.meeting_location);
    }
    if !contact.context.is_empty() {
        println!("    context:  {}", contact.context);
    }
    println!("    added:    {}", contact.created_at.format("%Y-%m-%d %H:%M"));
}
