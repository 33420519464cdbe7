use std::str::FromStr;

use anyhow::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use clap::builder::PossibleValue;
use clap::ArgMatches;
use strum::IntoEnumIterator;
use uuid::Uuid;

use prospekt::{contact, Category, Contact, Database, DeliveryStatus};

pub fn category_values() -> Vec<PossibleValue> {
    Category::iter()
        .map(|category| PossibleValue::new(category.to_string()))
        .collect()
}

pub fn status_values() -> Vec<PossibleValue> {
    DeliveryStatus::iter()
        .map(|status| PossibleValue::new(status.to_string()))
        .collect()
}

/// Parses the named argument as a uuid.
pub fn parse_uuid(matches: &ArgMatches, name: &str) -> Result<Uuid> {
    let value = matches
        .get_one::<String>(name)
        .ok_or_else(|| Error::msg(format!("missing {name}")))?;
    Ok(Uuid::from_str(value)?)
}

/// Parses `YYYY-MM-DD HH:MM`, or a bare `YYYY-MM-DD` taken as midnight, as
/// UTC.
pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M") {
        return Ok(datetime.and_utc());
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| Error::msg(format!("expected YYYY-MM-DD HH:MM or YYYY-MM-DD, got {input}")))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

/// Picks a contact by the `id` positional or the `--email` flag, whichever
/// was given.
pub fn select_contact(db: &Database, matches: &ArgMatches) -> Result<Contact> {
    if let Some(id) = matches.get_one::<String>("id") {
        return Ok(contact::find(db, Uuid::from_str(id)?)?);
    }
    if let Some(email) = matches.get_one::<String>("email") {
        return contact::find_by_email(db, email)?
            .ok_or_else(|| Error::msg(format!("no contact with email {email}")));
    }
    Err(Error::msg("select a contact by id or --email"))
}
