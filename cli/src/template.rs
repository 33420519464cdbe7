use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use clap::{arg, Arg, ArgMatches};
use tokio_util::sync::CancellationToken;

use prospekt::{
    contact, template, Category, Config, Database, Delivery, EmailTemplate, LinkSigner, SmtpMailer,
};

use crate::util;

pub fn cmd() -> clap::Command {
    clap::Command::new("template")
        .subcommand_required(true)
        .display_order(20)
        .about("Inspect and manipulate email templates")
        .subcommand(
            clap::Command::new("add")
                .arg_required_else_help(true)
                .about("Adds new email template")
                .arg(arg!(<name> "Template name"))
                .arg(arg!(<subject> "Email subject line, may use {placeholders}"))
                .arg(arg!(--content [html] "HTML body inline"))
                .arg(arg!(--file [path] "Read the HTML body from a file"))
                .arg(
                    Arg::new("audience")
                        .long("audience")
                        .value_parser(util::category_values())
                        .help("Category this template is written for"),
                ),
        )
        .subcommand(clap::Command::new("list").about("Lists templates, newest first"))
        .subcommand(
            clap::Command::new("get")
                .arg_required_else_help(true)
                .about("Gets a single template with body and placeholders")
                .arg(arg!(<id> "Template id")),
        )
        .subcommand(
            clap::Command::new("test")
                .arg_required_else_help(true)
                .about("Sends a test email rendered for an existing contact")
                .arg(arg!(<id> "Template id"))
                .arg(arg!(<email> "Email of the contact to render for and send to")),
        )
        .subcommand(
            clap::Command::new("rm")
                .arg_required_else_help(true)
                .about("Removes selected template")
                .arg(arg!(<id> "Template id")),
        )
}

pub async fn run(sub_matches: &ArgMatches, config: &Config, cancel: CancellationToken) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match sub_matches.subcommand().unwrap_or(("list", sub_matches)) {
        ("add", sub_matches) => {
            let content = match (
                sub_matches.get_one::<String>("content"),
                sub_matches.get_one::<String>("file"),
            ) {
                (Some(content), _) => content.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => {
                    return Err(anyhow::Error::msg(
                        "provide the body with either --content or --file",
                    ))
                }
            };
            let audience = sub_matches
                .get_one::<String>("audience")
                .map(|audience| Category::from_str(audience))
                .transpose()?;

            let template = EmailTemplate {
                name: sub_matches.get_one::<String>("name").cloned().unwrap(),
                subject: sub_matches.get_one::<String>("subject").cloned().unwrap(),
                content,
                audience,
                ..Default::default()
            };

            let template = template::create(&db, template)?;
            println!("Added template {} ({})", template.name, template.id);
        }
        ("list", _) => {
            let templates = template::find_all(&db)?;

            println!("Found {} template(s):", templates.len());
            for template in &templates {
                print_row(template);
            }
        }
        ("get", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let template = template::find(&db, id)?;

            print_row(&template);
            println!("    subject: {}", template.subject);
            println!("    placeholders:");
            for (placeholder, description) in template.available_variables() {
                println!("        {placeholder}  {description}");
            }
            println!("---");
            println!("{}", template.content);
        }
        ("test", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let email = sub_matches.get_one::<String>("email").cloned().unwrap();

            let template = template::find(&db, id)?;
            let contact = contact::find_by_email(&db, &email)?
                .ok_or_else(|| anyhow::Error::msg(format!("no contact with email {email}")))?;

            let mailer = SmtpMailer::new(config)?;
            let signer = LinkSigner::new(config)?;
            let delivery = Delivery::new(&db, &mailer, &signer);

            if delivery.send_test(&template, &contact, Utc::now()).await? {
                println!("Test email sent to {}", contact.email);
            } else {
                println!("Test email to {} failed, see the log", contact.email);
            }
        }
        ("rm", sub_matches) => {
            let id = util::parse_uuid(sub_matches, "id")?;
            let template = template::find(&db, id)?;
            template::delete(&db, id)?;
            println!("Removed template {}", template.name);
        }
        _ => unimplemented!(),
    }

    cancel.cancel();

    Ok(())
}

fn print_row(template: &EmailTemplate) {
    let audience = template
        .audience
        .map(|category| category.to_string())
        .unwrap_or_else(|| "all".to_string());
    println!("{}  {:<30} {}", template.id, template.name, audience);
}
