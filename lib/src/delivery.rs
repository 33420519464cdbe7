use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignId};
use crate::contact::{Contact, ContactId};
use crate::db::{Collectable, Database, Identifiable};
use crate::email::unsubscribe::LinkSigner;
use crate::email::Mailer;
use crate::error::Result;
use crate::template::{EmailTemplate, RenderedEmail, TemplateId};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Sent,
    Failed,
    Bounced,
}

/// One delivery attempt. Append-only: rows are written once with their final
/// status and never touched again.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailLog {
    pub id: Uuid,

    pub contact: ContactId,
    /// `None` for test sends.
    pub campaign: Option<CampaignId>,
    pub template: Option<TemplateId>,

    /// Rendered subject, when rendering happened at all.
    pub subject: Option<String>,

    pub status: DeliveryStatus,
    pub error: Option<String>,

    /// Set only when the transport accepted the message.
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Default for EmailLog {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            contact: Uuid::nil(),
            campaign: None,
            template: None,
            subject: None,
            status: DeliveryStatus::default(),
            error: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }
}

impl Collectable for EmailLog {
    fn get_collection_name() -> &'static str {
        "email_log"
    }
}

impl Identifiable for EmailLog {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

/// Renders and sends campaign email to one contact at a time, leaving
/// exactly one log row per attempt.
pub struct Delivery<'a> {
    db: &'a Database,
    mailer: &'a dyn Mailer,
    signer: &'a LinkSigner,
}

impl<'a> Delivery<'a> {
    pub fn new(db: &'a Database, mailer: &'a dyn Mailer, signer: &'a LinkSigner) -> Self {
        Self { db, mailer, signer }
    }

    /// Sends one campaign email. Returns whether the send went through;
    /// per-recipient problems (unsubscribed, missing template, transport
    /// refusal) become `Failed` log rows rather than errors.
    pub async fn deliver(
        &self,
        campaign: Option<&Campaign>,
        template: Option<&EmailTemplate>,
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let campaign = campaign.map(|c| c.id);
        let template_id = template.map(|t| t.id);

        if !contact.is_subscribed {
            self.log_failure(campaign, template_id, contact, "contact is unsubscribed", now)?;
            return Ok(false);
        }
        let template = match template {
            Some(template) => template,
            None => {
                self.log_failure(campaign, template_id, contact, "template not found", now)?;
                return Ok(false);
            }
        };

        let url = self.signer.unsubscribe_url(contact)?;
        let rendered = template.render(contact, url.as_str());

        self.send_and_log(campaign, template_id, contact, rendered, now)
            .await
    }

    /// Manual test send: same rendering path, subject prefixed with
    /// `[TEST] `, logged without a campaign. Goes out even to unsubscribed
    /// contacts since it is an operator action, not a campaign.
    pub async fn send_test(
        &self,
        template: &EmailTemplate,
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let url = self.signer.unsubscribe_url(contact)?;
        let mut rendered = template.render(contact, url.as_str());
        rendered.subject = format!("[TEST] {}", rendered.subject);

        self.send_and_log(None, Some(template.id), contact, rendered, now)
            .await
    }

    async fn send_and_log(
        &self,
        campaign: Option<CampaignId>,
        template: Option<TemplateId>,
        contact: &Contact,
        rendered: RenderedEmail,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut log = EmailLog {
            id: Uuid::new_v4(),
            contact: contact.id,
            campaign,
            template,
            subject: Some(rendered.subject.clone()),
            status: DeliveryStatus::Failed,
            error: None,
            sent_at: None,
            created_at: now,
        };

        match self
            .mailer
            .send_html(&contact.email, &rendered.subject, &rendered.html_body)
            .await
        {
            Ok(()) => {
                log.status = DeliveryStatus::Sent;
                log.sent_at = Some(now);
                self.db.set(&log)?;
                debug!(to = %contact.email, subject = %rendered.subject, "email sent");
                Ok(true)
            }
            Err(e) => {
                log.error = Some(e.kind.to_string());
                self.db.set(&log)?;
                warn!(to = %contact.email, error = %e.kind, "email failed");
                Ok(false)
            }
        }
    }

    fn log_failure(
        &self,
        campaign: Option<CampaignId>,
        template: Option<TemplateId>,
        contact: &Contact,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let log = EmailLog {
            id: Uuid::new_v4(),
            contact: contact.id,
            campaign,
            template,
            subject: None,
            status: DeliveryStatus::Failed,
            error: Some(reason.to_string()),
            sent_at: None,
            created_at: now,
        };
        self.db.set(&log)?;
        warn!(to = %contact.email, reason, "email skipped");
        Ok(())
    }
}

/// All log rows, newest first.
pub fn find_all(db: &Database) -> Result<Vec<EmailLog>> {
    let mut logs = db.get_collection::<EmailLog>()?;
    logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(logs)
}

/// Newest-first page of the whole log.
pub fn find_page(db: &Database, limit: usize, offset: usize) -> Result<Vec<EmailLog>> {
    Ok(find_all(db)?.into_iter().skip(offset).take(limit).collect())
}

pub fn find_by_campaign(db: &Database, campaign: CampaignId) -> Result<Vec<EmailLog>> {
    let mut logs = find_all(db)?;
    logs.retain(|l| l.campaign == Some(campaign));
    Ok(logs)
}

pub fn find_by_contact(db: &Database, contact: ContactId) -> Result<Vec<EmailLog>> {
    let mut logs = find_all(db)?;
    logs.retain(|l| l.contact == contact);
    Ok(logs)
}

pub fn find_by_status(db: &Database, status: DeliveryStatus) -> Result<Vec<EmailLog>> {
    let mut logs = find_all(db)?;
    logs.retain(|l| l.status == status);
    Ok(logs)
}

/// Per-status counts over a set of log rows.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct LogStatistics {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
    pub bounced: usize,
    pub total: usize,
}

impl LogStatistics {
    fn add(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Pending => self.pending += 1,
            DeliveryStatus::Sent => self.sent += 1,
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Bounced => self.bounced += 1,
        }
        self.total += 1;
    }
}

/// Counts across the whole log.
pub fn statistics(db: &Database) -> Result<LogStatistics> {
    let mut stats = LogStatistics::default();
    for log in db.get_collection::<EmailLog>()? {
        stats.add(log.status);
    }
    Ok(stats)
}

/// Counts across one campaign's log rows.
pub fn campaign_statistics(db: &Database, campaign: CampaignId) -> Result<LogStatistics> {
    let mut stats = LogStatistics::default();
    for log in db.get_collection::<EmailLog>()? {
        if log.campaign == Some(campaign) {
            stats.add(log.status);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Error, ErrorKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records outgoing mail; refuses addresses listed in `reject`.
    struct StubMailer {
        sent: Mutex<Vec<(String, String, String)>>,
        reject: Vec<String>,
    }

    impl StubMailer {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                reject: Vec::new(),
            }
        }

        fn rejecting(addr: &str) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                reject: vec![addr.to_string()],
            }
        }

        fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for StubMailer {
        async fn send_html(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
            if self.reject.iter().any(|r| r == to) {
                return Err(Error::new(ErrorKind::EmailBadResponse("550".to_string())));
            }
            self.sent.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                html_body.to_string(),
            ));
            Ok(())
        }
    }

    fn signer() -> LinkSigner {
        let mut config = Config::default();
        config.unsubscribe.secret = "test-secret".to_string();
        LinkSigner::new(&config).unwrap()
    }

    fn contact(email: &str) -> Contact {
        Contact {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    fn template() -> EmailTemplate {
        EmailTemplate {
            name: "Outreach".to_string(),
            subject: "Hello {first_name}".to_string(),
            content: "<p>Hi {first_name}, unsubscribe: {unsubscribe_link}</p>".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_send_leaves_sent_log() {
        let db = Database::temporary().unwrap();
        let mailer = StubMailer::new();
        let signer = signer();
        let delivery = Delivery::new(&db, &mailer, &signer);
        let now = Utc::now();

        let contact = contact("ada@example.com");
        let template = template();
        let sent = delivery
            .deliver(None, Some(&template), &contact, now)
            .await
            .unwrap();
        assert!(sent);

        let outbox = mailer.sent();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].1, "Hello Ada");
        assert!(outbox[0].2.contains("token="));

        let logs = find_all(&db).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Sent);
        assert_eq!(logs[0].sent_at, Some(now));
        assert_eq!(logs[0].subject.as_deref(), Some("Hello Ada"));
        assert_eq!(logs[0].template, Some(template.id));
    }

    #[tokio::test]
    async fn unsubscribed_contact_is_not_mailed_but_logged() {
        let db = Database::temporary().unwrap();
        let mailer = StubMailer::new();
        let signer = signer();
        let delivery = Delivery::new(&db, &mailer, &signer);

        let mut contact = contact("ada@example.com");
        contact.is_subscribed = false;
        let template = template();
        let sent = delivery
            .deliver(None, Some(&template), &contact, Utc::now())
            .await
            .unwrap();
        assert!(!sent);
        assert!(mailer.sent().is_empty());

        let logs = find_all(&db).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(logs[0].error.as_deref(), Some("contact is unsubscribed"));
        assert_eq!(logs[0].sent_at, None);
    }

    #[tokio::test]
    async fn missing_template_fails_the_attempt() {
        let db = Database::temporary().unwrap();
        let mailer = StubMailer::new();
        let signer = signer();
        let delivery = Delivery::new(&db, &mailer, &signer);

        let contact = contact("ada@example.com");
        let sent = delivery
            .deliver(None, None, &contact, Utc::now())
            .await
            .unwrap();
        assert!(!sent);

        let logs = find_all(&db).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error.as_deref(), Some("template not found"));
        assert_eq!(logs[0].subject, None);
    }

    #[tokio::test]
    async fn transport_refusal_is_recorded() {
        let db = Database::temporary().unwrap();
        let mailer = StubMailer::rejecting("ada@example.com");
        let signer = signer();
        let delivery = Delivery::new(&db, &mailer, &signer);

        let contact = contact("ada@example.com");
        let template = template();
        let sent = delivery
            .deliver(None, Some(&template), &contact, Utc::now())
            .await
            .unwrap();
        assert!(!sent);

        let logs = find_all(&db).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert!(logs[0].error.as_deref().unwrap().contains("550"));
        // the subject made it to rendering before the refusal
        assert_eq!(logs[0].subject.as_deref(), Some("Hello Ada"));
    }

    #[tokio::test]
    async fn test_sends_are_prefixed_and_campaignless() {
        let db = Database::temporary().unwrap();
        let mailer = StubMailer::new();
        let signer = signer();
        let delivery = Delivery::new(&db, &mailer, &signer);

        let mut contact = contact("ada@example.com");
        contact.is_subscribed = false;
        let template = template();
        let sent = delivery
            .send_test(&template, &contact, Utc::now())
            .await
            .unwrap();
        assert!(sent, "test sends ignore the subscription flag");

        let outbox = mailer.sent();
        assert_eq!(outbox[0].1, "[TEST] Hello Ada");

        let logs = find_all(&db).unwrap();
        assert_eq!(logs[0].campaign, None);
        assert_eq!(logs[0].subject.as_deref(), Some("[TEST] Hello Ada"));
    }

    #[tokio::test]
    async fn statistics_count_by_status() {
        let db = Database::temporary().unwrap();
        let campaign_id = Uuid::new_v4();

        for (status, in_campaign) in [
            (DeliveryStatus::Sent, true),
            (DeliveryStatus::Sent, false),
            (DeliveryStatus::Failed, true),
            (DeliveryStatus::Bounced, false),
        ] {
            let log = EmailLog {
                status,
                campaign: in_campaign.then_some(campaign_id),
                ..Default::default()
            };
            db.set(&log).unwrap();
        }

        let all = statistics(&db).unwrap();
        assert_eq!(all.sent, 2);
        assert_eq!(all.failed, 1);
        assert_eq!(all.bounced, 1);
        assert_eq!(all.pending, 0);
        assert_eq!(all.total, 4);

        let per_campaign = campaign_statistics(&db, campaign_id).unwrap();
        assert_eq!(per_campaign.sent, 1);
        assert_eq!(per_campaign.failed, 1);
        assert_eq!(per_campaign.total, 2);
    }
}
