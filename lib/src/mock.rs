//! Module tasked with generating mock data to populate the application.

use chrono::{Duration, Utc};

use crate::campaign::{self, Campaign, Schedule};
use crate::contact::{self, Category, Contact};
use crate::delivery::EmailLog;
use crate::executor::CampaignRun;
use crate::template::{self, EmailTemplate};
use crate::{Config, Database, ErrorKind, Result};

/// Generates and saves mock data: a handful of contacts across the
/// categories, a template and two campaigns ready to run.
pub fn generate(config: &Config, db: &Database) -> Result<()> {
    if contact::count(db)? > 0 {
        if !config.dev.mock_regen {
            return Err(ErrorKind::Other(
                "mock data already present, enable dev.mock_regen to overwrite".to_string(),
            )
            .into());
        }
        db.clear::<Contact>()?;
        db.clear::<EmailTemplate>()?;
        db.clear::<Campaign>()?;
        db.clear::<EmailLog>()?;
        db.clear::<CampaignRun>()?;
    }

    let today = Utc::now().date_naive();
    let entries = [
        (
            "Ada",
            "Lovelace",
            "ada.lovelace@example.com",
            "Analytical Engines",
            "+44 20 7946 0958",
            Category::Scientific,
            "SciComp Lyon",
            "wants the numerical simulation whitepaper",
            true,
        ),
        (
            "Grace",
            "Hopper",
            "grace.hopper@example.com",
            "Eckert-Mauchly",
            "+1 212 555 0142",
            Category::It,
            "DevOpsDays Ghent",
            "interested in the build pipeline audit",
            true,
        ),
        (
            "Claude",
            "Shannon",
            "claude.shannon@example.com",
            "Bell Labs",
            "",
            Category::Firmware,
            "Embedded World",
            "asked about low-power radio firmware",
            true,
        ),
        (
            "Hedy",
            "Lamarr",
            "hedy.lamarr@example.com",
            "Frequency Hopping Inc",
            "+43 1 515 550",
            Category::Firmware,
            "Embedded World",
            "follow up after the spread-spectrum demo",
            true,
        ),
        (
            "George",
            "Boole",
            "george.boole@example.com",
            "Boole & Sons",
            "",
            Category::It,
            "FOSDEM",
            "unsubscribed at the booth, keep for records",
            false,
        ),
    ];

    for (n, (first, last, email, company, phone, category, location, context, subscribed)) in
        entries.into_iter().enumerate()
    {
        contact::create(
            db,
            Contact {
                first_name: first.to_string(),
                last_name: last.to_string(),
                email: email.to_string(),
                company: company.to_string(),
                phone: phone.to_string(),
                category,
                context: context.to_string(),
                meeting_location: location.to_string(),
                meeting_date: Some(today - Duration::days(7 + 3 * n as i64)),
                is_subscribed: subscribed,
                ..Default::default()
            },
        )?;
    }

    let template = template::create(
        db,
        EmailTemplate {
            name: "Conference follow-up".to_string(),
            subject: "Good to meet you, {first_name}!".to_string(),
            content: "<h1>Hello {first_name},</h1>\
                <p>Thanks for stopping by our booth. We would love to hear how \
                things are going at {company}.</p>\
                <p><a href=\"{unsubscribe_link}\">Unsubscribe</a></p>"
                .to_string(),
            ..Default::default()
        },
    )?;

    campaign::create(
        db,
        Campaign {
            name: "Weekly firmware digest".to_string(),
            template: template.id,
            targets: [Category::Firmware].into_iter().collect(),
            schedule: Schedule::Weekly {
                anchor: Utc::now() - Duration::days(30),
            },
            ..Default::default()
        },
    )?;
    campaign::create(
        db,
        Campaign {
            name: "Post-conference thank you".to_string(),
            template: template.id,
            targets: [Category::Scientific, Category::It].into_iter().collect(),
            schedule: Schedule::Custom {
                at: Utc::now() + Duration::days(1),
            },
            ..Default::default()
        },
    )?;

    Ok(())
}
