use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use prospekt::config::Sending;
use prospekt::email::unsubscribe;
use prospekt::{
    campaign, contact, delivery, template, Campaign, CampaignExecutor, Category, Config, Contact,
    Database, DeliveryStatus, EmailTemplate, LinkSigner, Mailer, Result, Schedule,
};

/// Captures outgoing mail instead of talking to an smtp server.
#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send_html(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

impl CapturingMailer {
    fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

/// Walks the whole pipeline through the public api: create contacts, a
/// template and a recurring campaign, run the due sweep, follow the
/// unsubscribe link from a delivered email, then run again and check the
/// unsubscribed contact dropped out.
#[tokio::test]
async fn campaign_cycle_with_unsubscribe() -> anyhow::Result<()> {
    let config = Config {
        sending: Sending { pace_ms: 0 },
        ..Default::default()
    };
    let db = Database::temporary()?;

    let ada = contact::create(
        &db,
        Contact {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            category: Category::Scientific,
            ..Default::default()
        },
    )?;
    let grace = contact::create(
        &db,
        Contact {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: "grace@example.com".to_string(),
            category: Category::Scientific,
            ..Default::default()
        },
    )?;

    let template = template::create(
        &db,
        EmailTemplate {
            name: "Follow up".to_string(),
            subject: "Hello {first_name}".to_string(),
            content: "<p>Good meeting you, {full_name}.</p>\
                <p><a href=\"{unsubscribe_link}\">unsubscribe</a></p>"
                .to_string(),
            ..Default::default()
        },
    )?;

    let campaign = campaign::create(
        &db,
        Campaign {
            name: "Conference follow up".to_string(),
            template: template.id,
            targets: [Category::Scientific].into(),
            schedule: Schedule::Daily {
                anchor: Utc::now() - Duration::days(3),
            },
            ..Default::default()
        },
    )?;

    let mailer = Arc::new(CapturingMailer::default());
    let executor = CampaignExecutor::new(&config, db.clone(), mailer.clone())?;

    // Sweep at the exact moment the campaign comes due.
    let first_slot = campaign.next_run;
    let reports = executor.run_due(first_slot).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].contacts, 2);
    assert_eq!(reports[0].sent, 2);
    assert_eq!(reports[0].failed, 0);

    let after_first = campaign::find(&db, campaign.id)?;
    assert_eq!(after_first.next_run, first_slot + Duration::days(1));
    assert_eq!(after_first.last_run, Some(first_slot));

    let sent = mailer.sent();
    assert_eq!(sent.len(), 2);
    let (_, subject, body) = sent
        .iter()
        .find(|(to, _, _)| to == &ada.email)
        .expect("ada got mail");
    assert_eq!(subject, "Hello Ada");
    assert!(body.contains("Good meeting you, Ada Lovelace."));

    // Every delivered email carries a working unsubscribe link; pull the
    // token out of ada's copy and use it.
    let token_start = body.find("token=").expect("unsubscribe link present") + "token=".len();
    let token: String = body[token_start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();

    let signer = LinkSigner::new(&config)?;
    assert!(unsubscribe::unsubscribe(&db, &signer, grace.id, &token).is_err());
    let ada = unsubscribe::unsubscribe(&db, &signer, ada.id, &token)?;
    assert!(!ada.is_subscribed);

    // Next day's sweep only reaches grace.
    let second_slot = after_first.next_run;
    let reports = executor.run_due(second_slot).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].contacts, 1);
    assert_eq!(reports[0].sent, 1);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].0, grace.email);

    let logs = delivery::find_by_campaign(&db, campaign.id)?;
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|log| log.status == DeliveryStatus::Sent));

    Ok(())
}
