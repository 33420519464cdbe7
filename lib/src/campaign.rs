use std::collections::BTreeSet;

use chrono::{DateTime, Months, Utc};
use uuid::Uuid;

use crate::contact::Category;
use crate::db::{Collectable, Database, Identifiable};
use crate::error::{ErrorKind, Result};
use crate::template::EmailTemplate;
use crate::validate::{self, FieldErrors};

pub type CampaignId = Uuid;

/// When a campaign fires.
///
/// Recurring schedules carry an anchor datetime; occurrences repeat from it,
/// keeping its time of day (and day of week or month). `Custom` is a single
/// shot at a fixed datetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "snake_case", tag = "kind")]
#[strum(serialize_all = "snake_case")]
pub enum Schedule {
    Daily { anchor: DateTime<Utc> },
    Weekly { anchor: DateTime<Utc> },
    Monthly { anchor: DateTime<Utc> },
    Custom { at: DateTime<Utc> },
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Daily { anchor: Utc::now() }
    }
}

impl Schedule {
    pub fn anchor(&self) -> DateTime<Utc> {
        match self {
            Self::Daily { anchor } | Self::Weekly { anchor } | Self::Monthly { anchor } => *anchor,
            Self::Custom { at } => *at,
        }
    }

    /// First occurrence after `now`.
    ///
    /// A future anchor is returned verbatim. A past anchor is rolled forward
    /// one period at a time until it lands past `now`, so the anchor's phase
    /// (time of day, day of week or month) is preserved. `Custom` returns its
    /// datetime unchanged even when it already passed; whether that still
    /// runs is the caller's `is_active` business.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Custom { at } => *at,
            Self::Daily { anchor } | Self::Weekly { anchor } | Self::Monthly { anchor } => {
                let mut next = *anchor;
                while next <= now {
                    match self.advance(next) {
                        Some(n) => next = n,
                        None => break,
                    }
                }
                next
            }
        }
    }

    /// The slot one period after `next_run`. `None` for `Custom`, which has
    /// no next slot. Month arithmetic clamps to the last day of shorter
    /// months (Jan 31 + 1 month = Feb 28/29), and a clamped date stays
    /// clamped on further advances.
    pub fn advance(&self, next_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Daily { .. } => next_run.checked_add_signed(chrono::Duration::days(1)),
            Self::Weekly { .. } => next_run.checked_add_signed(chrono::Duration::days(7)),
            Self::Monthly { .. } => next_run.checked_add_months(Months::new(1)),
            Self::Custom { .. } => None,
        }
    }
}

/// A scheduled bulk send: one template, one or more target categories, a
/// recurrence.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Campaign {
    pub id: CampaignId,

    pub name: String,

    /// Template used for every send. Soft reference: the executor reports a
    /// failure when it no longer resolves.
    pub template: Uuid,

    /// Categories this campaign goes out to. Never empty.
    pub targets: BTreeSet<Category>,

    pub schedule: Schedule,

    /// The upcoming occurrence. Computed from the schedule at save time and
    /// advanced by the executor after each run.
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Campaign {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "".to_string(),
            template: Uuid::nil(),
            targets: BTreeSet::new(),
            schedule: Schedule::default(),
            next_run: Utc::now(),
            last_run: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Collectable for Campaign {
    fn get_collection_name() -> &'static str {
        "campaign"
    }
}

impl Identifiable for Campaign {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Campaign {
    /// Checks field rules. The template reference must resolve at save time;
    /// it is not re-checked at execution.
    pub fn validate(&self, db: &Database) -> Result<()> {
        let mut errors = FieldErrors::new();

        validate::require_min_len(&mut errors, "name", &self.name, 3);
        if self.targets.is_empty() {
            errors.push("targets", "select at least one category");
        }
        if db.try_get::<EmailTemplate>(self.template)?.is_none() {
            errors.push("template", "does not exist");
        }

        errors.into_result()
    }
}

/// Validates and stores a new campaign, computing its first `next_run` from
/// the schedule.
pub fn create(db: &Database, mut campaign: Campaign) -> Result<Campaign> {
    campaign.validate(db)?;

    let now = Utc::now();
    campaign.next_run = campaign.schedule.next_occurrence(now);
    campaign.created_at = now;
    campaign.updated_at = now;
    db.set(&campaign)?;

    Ok(campaign)
}

/// Validates and stores changes to an existing campaign. `next_run` is
/// recomputed from the (possibly changed) schedule.
pub fn update(db: &Database, mut campaign: Campaign) -> Result<Campaign> {
    campaign.validate(db)?;
    if db.try_get::<Campaign>(campaign.id)?.is_none() {
        return Err(ErrorKind::NotFound(format!("campaign {}", campaign.id)).into());
    }

    let now = Utc::now();
    campaign.next_run = campaign.schedule.next_occurrence(now);
    campaign.updated_at = now;
    db.set(&campaign)?;

    Ok(campaign)
}

pub fn find(db: &Database, id: CampaignId) -> Result<Campaign> {
    db.try_get(id)?
        .ok_or_else(|| ErrorKind::NotFound(format!("campaign {}", id)).into())
}

/// All campaigns, newest first.
pub fn find_all(db: &Database) -> Result<Vec<Campaign>> {
    let mut campaigns = db.get_collection::<Campaign>()?;
    campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(campaigns)
}

/// Newest-first page of the campaign list.
pub fn find_page(db: &Database, limit: usize, offset: usize) -> Result<Vec<Campaign>> {
    Ok(find_all(db)?.into_iter().skip(offset).take(limit).collect())
}

pub fn find_active(db: &Database) -> Result<Vec<Campaign>> {
    let mut campaigns = find_all(db)?;
    campaigns.retain(|c| c.is_active);
    Ok(campaigns)
}

/// Active campaigns whose `next_run` has come, most overdue first.
pub fn find_due(db: &Database, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
    let mut campaigns = db.get_collection::<Campaign>()?;
    campaigns.retain(|c| c.is_active && c.next_run <= now);
    campaigns.sort_by(|a, b| a.next_run.cmp(&b.next_run));
    Ok(campaigns)
}

pub fn count(db: &Database) -> Result<usize> {
    db.len::<Campaign>()
}

pub fn toggle_active(db: &Database, id: CampaignId, active: bool) -> Result<Campaign> {
    let mut campaign = find(db, id)?;
    campaign.is_active = active;
    campaign.updated_at = Utc::now();
    db.set(&campaign)?;
    Ok(campaign)
}

pub fn delete(db: &Database, id: CampaignId) -> Result<()> {
    let campaign = find(db, id)?;
    db.remove(&campaign)
}
