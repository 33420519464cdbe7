//! Contact and email campaign engine.
//!
//! `prospekt` keeps track of people met out in the field, sorts them into
//! audience categories and mails them on a schedule. Campaigns pair an HTML
//! template with a set of target categories and a recurrence; the executor
//! finds due campaigns, renders the template per contact, hands the result to
//! an SMTP transport and records every attempt in a delivery log.
//!
//! The library is the whole product. Binaries (see the `cli` member crate)
//! only ever call public functions from here.

#[macro_use]
extern crate serde_derive;

pub mod campaign;
pub mod config;
pub mod contact;
pub mod db;
pub mod delivery;
pub mod email;
pub mod error;
pub mod executor;
pub mod mock;
pub mod template;
pub mod tracing;
pub mod validate;

pub use campaign::{Campaign, CampaignId, Schedule};
pub use config::Config;
pub use contact::{Category, Contact, ContactId};
pub use db::Database;
pub use delivery::{Delivery, DeliveryStatus, EmailLog};
pub use email::unsubscribe::LinkSigner;
pub use email::{Mailer, SmtpMailer};
pub use error::{Error, ErrorKind, Result};
pub use executor::{CampaignExecutor, RunReport};
pub use template::{EmailTemplate, TemplateId};
