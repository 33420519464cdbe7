//! Campaign execution.
//!
//! The executor is the outer boundary of the engine. An external trigger
//! (cron calling the CLI, or the CLI's own watch loop) invokes
//! [`CampaignExecutor::run_due`] at a coarse interval; recipient selection,
//! rendering, transport, logging and the schedule advance all happen below
//! it. Per-campaign and per-recipient failures are converted into log rows
//! and report counters. A sweep itself never errors out.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::campaign::{self, Campaign, CampaignId};
use crate::contact::{self, Contact, ContactId};
use crate::db::{Collectable, Database, Identifiable};
use crate::delivery::Delivery;
use crate::email::unsubscribe::LinkSigner;
use crate::email::Mailer;
use crate::error::{ErrorKind, Result};
use crate::template::EmailTemplate;
use crate::Config;

/// Outcome of one campaign execution, aggregated for the operator.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub campaign: CampaignId,
    pub name: String,
    pub executed_at: DateTime<Utc>,
    /// Recipients the run was addressed to.
    pub contacts: usize,
    pub sent: usize,
    pub failed: usize,
    /// Set when the run was skipped, resumed or failed outright.
    pub message: Option<String>,
}

impl RunReport {
    fn new(campaign: &Campaign, now: DateTime<Utc>) -> Self {
        Self {
            campaign: campaign.id,
            name: campaign.name.clone(),
            executed_at: now,
            contacts: 0,
            sent: 0,
            failed: 0,
            message: None,
        }
    }

    fn skipped(campaign: &Campaign, now: DateTime<Utc>, message: impl Into<String>) -> Self {
        let mut report = Self::new(campaign, now);
        report.message = Some(message.into());
        report
    }

    fn failure(campaign: CampaignId, name: String, now: DateTime<Utc>, message: String) -> Self {
        Self {
            campaign,
            name,
            executed_at: now,
            contacts: 0,
            sent: 0,
            failed: 0,
            message: Some(message),
        }
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} contacts, {} sent, {} failed",
            self.name, self.contacts, self.sent, self.failed
        )?;
        if let Some(message) = &self.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}

/// Run marker for one `(campaign, next_run)` slot.
///
/// The executor starts a marker before the first delivery and completes it
/// after the last one, recording every contact given their log row along the
/// way. A sweep retried after a crash finds the marker, skips the contacts
/// it lists and, when the marker is already complete, goes straight to the
/// schedule advance. Once the campaign advances, `scheduled_for` no longer
/// matches `next_run` and the marker is inert history.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CampaignRun {
    pub id: Uuid,

    pub campaign: CampaignId,
    /// The `next_run` slot this run consumes.
    pub scheduled_for: DateTime<Utc>,

    pub started_at: DateTime<Utc>,
    /// Set once the delivery loop went through every eligible contact.
    pub completed_at: Option<DateTime<Utc>>,

    /// Contacts already given their one log row within this slot.
    pub attempted: Vec<ContactId>,
    pub sent: usize,
    pub failed: usize,
}

impl Default for CampaignRun {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign: Uuid::nil(),
            scheduled_for: Utc::now(),
            started_at: Utc::now(),
            completed_at: None,
            attempted: Vec::new(),
            sent: 0,
            failed: 0,
        }
    }
}

impl Collectable for CampaignRun {
    fn get_collection_name() -> &'static str {
        "campaign_run"
    }
}

impl Identifiable for CampaignRun {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl CampaignRun {
    fn begin(campaign: &Campaign, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign: campaign.id,
            scheduled_for: campaign.next_run,
            started_at: now,
            ..Default::default()
        }
    }
}

/// Marker for the given campaign and slot, if a run already started on it.
fn find_run(
    db: &Database,
    campaign: CampaignId,
    slot: DateTime<Utc>,
) -> Result<Option<CampaignRun>> {
    for run in db.get_collection::<CampaignRun>()? {
        if run.campaign == campaign && run.scheduled_for == slot {
            return Ok(Some(run));
        }
    }
    Ok(None)
}

/// Recipients a campaign goes out to right now: the subscribed contacts of
/// every target category, deduplicated by id. Categories come in set order
/// and contacts in collection order, so the result is stable for a fixed
/// snapshot. An empty list is a normal outcome, not an error.
pub fn eligible_contacts(db: &Database, campaign: &Campaign) -> Result<Vec<Contact>> {
    let mut seen = HashSet::new();
    let mut eligible = Vec::new();
    for category in &campaign.targets {
        for contact in contact::find_by_category(db, *category, true)? {
            if seen.insert(contact.id) {
                eligible.push(contact);
            }
        }
    }
    Ok(eligible)
}

fn lock(set: &Mutex<HashSet<CampaignId>>) -> MutexGuard<'_, HashSet<CampaignId>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Membership in the executor's running set, removed again on drop. Keeps a
/// campaign from executing twice at once within the process.
struct RunPermit<'a> {
    running: &'a Mutex<HashSet<CampaignId>>,
    campaign: CampaignId,
}

impl<'a> RunPermit<'a> {
    fn acquire(running: &'a Mutex<HashSet<CampaignId>>, campaign: CampaignId) -> Option<Self> {
        lock(running)
            .insert(campaign)
            .then(|| Self { running, campaign })
    }
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(&self.campaign);
    }
}

/// Drives due campaigns end to end: selection, rendering, delivery, logging
/// and the schedule advance. One instance serves the whole process.
pub struct CampaignExecutor {
    db: Database,
    mailer: Arc<dyn Mailer>,
    signer: LinkSigner,
    /// Pause between consecutive sends within one campaign, the outbound
    /// throttle. Zero disables pacing.
    pace: Duration,
    /// Campaigns currently mid-run in this process.
    running: Mutex<HashSet<CampaignId>>,
}

impl CampaignExecutor {
    pub fn new(config: &Config, db: Database, mailer: Arc<dyn Mailer>) -> Result<Self> {
        Ok(Self {
            db,
            mailer,
            signer: LinkSigner::new(config)?,
            pace: Duration::from_millis(config.sending.pace_ms),
            running: Mutex::new(HashSet::new()),
        })
    }

    /// Executes every active campaign whose `next_run` has come, most
    /// overdue first. Campaigns run independently: one blowing up is
    /// reported in its own entry and the sweep moves on.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Vec<RunReport> {
        let due = match campaign::find_due(&self.db, now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e.kind, "due campaign query failed");
                return Vec::new();
            }
        };
        debug!(count = due.len(), "due campaign sweep");

        let mut reports = Vec::with_capacity(due.len());
        for campaign in due {
            let (id, name) = (campaign.id, campaign.name.clone());
            match self.execute(campaign, now).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(campaign = %id, error = %e.kind, "campaign run failed");
                    reports.push(RunReport::failure(id, name, now, e.kind.to_string()));
                }
            }
        }
        reports
    }

    /// Runs one campaign through the whole select, deliver, advance cycle.
    ///
    /// The schedule advances (or the campaign deactivates, for one-shots)
    /// even when nobody was eligible: a due slot is consumed by being due,
    /// not by sending. The advance is the last step: anything failing before
    /// it leaves `next_run` untouched, and the run marker picks the retry up
    /// without duplicating log rows.
    pub async fn execute(&self, mut campaign: Campaign, now: DateTime<Utc>) -> Result<RunReport> {
        let _permit = match RunPermit::acquire(&self.running, campaign.id) {
            Some(permit) => permit,
            None => {
                warn!(campaign = %campaign.id, name = %campaign.name, "already running, skipped");
                return Ok(RunReport::skipped(&campaign, now, "run already in progress"));
            }
        };

        let mut report = RunReport::new(&campaign, now);
        let mut run = match find_run(&self.db, campaign.id, campaign.next_run)? {
            Some(run) => run,
            None => {
                let run = CampaignRun::begin(&campaign, now);
                self.db.set(&run)?;
                run
            }
        };

        if run.completed_at.is_none() {
            let template = self.db.try_get::<EmailTemplate>(campaign.template)?;
            let contacts = eligible_contacts(&self.db, &campaign)?;
            report.contacts = contacts.len();

            let delivery = Delivery::new(&self.db, self.mailer.as_ref(), &self.signer);
            let mut delivered = 0;
            for contact in &contacts {
                if run.attempted.contains(&contact.id) {
                    continue;
                }
                if delivered > 0 && !self.pace.is_zero() {
                    tokio::time::sleep(self.pace).await;
                }
                let ok = delivery
                    .deliver(Some(&campaign), template.as_ref(), contact, now)
                    .await?;
                delivered += 1;
                run.attempted.push(contact.id);
                if ok {
                    run.sent += 1;
                } else {
                    run.failed += 1;
                }
                self.db.set(&run)?;
            }
            if delivered < contacts.len() {
                report.message = Some(format!(
                    "resumed, {} contacts attempted earlier",
                    contacts.len() - delivered
                ));
            }

            run.completed_at = Some(now);
            self.db.set(&run)?;
        } else {
            // Crash window: the delivery loop finished earlier but the
            // advance below never ran. Nothing left to send.
            debug!(campaign = %campaign.id, "slot already delivered, advancing only");
            report.contacts = run.attempted.len();
            report.message = Some("slot already delivered, advanced schedule".to_string());
        }

        report.sent = run.sent;
        report.failed = run.failed;

        match campaign.schedule.advance(campaign.next_run) {
            Some(next) => campaign.next_run = next,
            None => campaign.is_active = false,
        }
        campaign.last_run = Some(now);
        campaign.updated_at = now;
        self.db.set(&campaign)?;

        info!(
            campaign = %campaign.id,
            name = %campaign.name,
            contacts = report.contacts,
            sent = report.sent,
            failed = report.failed,
            "campaign executed"
        );
        Ok(report)
    }

    /// Sends a campaign outside its schedule, the operator's "send now".
    ///
    /// With explicit `contact_ids` only those contacts are addressed, after
    /// dropping unknown and unsubscribed ones; otherwise the usual category
    /// eligibility applies. The schedule is left alone: manual sends never
    /// consume the recurring slot or deactivate a one-shot, and they write
    /// no run marker. An unknown campaign or an empty recipient list is an
    /// error for the caller to render.
    pub async fn execute_manual(
        &self,
        campaign_id: CampaignId,
        contact_ids: &[ContactId],
        now: DateTime<Utc>,
    ) -> Result<RunReport> {
        let campaign = campaign::find(&self.db, campaign_id)?;

        let contacts = if contact_ids.is_empty() {
            eligible_contacts(&self.db, &campaign)?
        } else {
            let mut picked = Vec::with_capacity(contact_ids.len());
            for id in contact_ids {
                match self.db.try_get::<Contact>(*id)? {
                    Some(contact) if contact.is_subscribed => picked.push(contact),
                    Some(_) => debug!(contact = %id, "unsubscribed, dropped from manual send"),
                    None => warn!(contact = %id, "no such contact, dropped from manual send"),
                }
            }
            picked
        };
        if contacts.is_empty() {
            return Err(ErrorKind::NoRecipients(campaign.name).into());
        }

        let template = self.db.try_get::<EmailTemplate>(campaign.template)?;
        let delivery = Delivery::new(&self.db, self.mailer.as_ref(), &self.signer);

        let mut report = RunReport::new(&campaign, now);
        report.contacts = contacts.len();
        for (n, contact) in contacts.iter().enumerate() {
            if n > 0 && !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
            if delivery
                .deliver(Some(&campaign), template.as_ref(), contact, now)
                .await?
            {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }
        report.message = Some("manual send".to_string());

        info!(
            campaign = %campaign.id,
            name = %campaign.name,
            contacts = report.contacts,
            sent = report.sent,
            failed = report.failed,
            "manual campaign send"
        );
        Ok(report)
    }
}
