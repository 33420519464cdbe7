use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::{Collectable, Database, Identifiable};
use crate::error::{ErrorKind, Result};
use crate::validate::{self, FieldErrors};

pub type ContactId = Uuid;

/// Audience segment a contact belongs to. Campaigns target one or more of
/// these.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    #[default]
    Firmware,
    Scientific,
    It,
}

/// A person met out in the field. The email address is the identity that
/// matters for sending; it is unique across the collection.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Contact {
    pub id: ContactId,

    pub first_name: String,
    pub last_name: String,

    pub email: String,
    pub phone: String,
    pub company: String,

    pub category: Category,

    /// What the conversation was about.
    pub context: String,
    /// Conference, meetup, client office...
    pub meeting_location: String,
    pub meeting_date: Option<NaiveDate>,

    /// Campaigns only ever go out to subscribed contacts.
    pub is_subscribed: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),

            first_name: "".to_string(),
            last_name: "".to_string(),

            email: "".to_string(),
            phone: "".to_string(),
            company: "".to_string(),

            category: Category::default(),

            context: "".to_string(),
            meeting_location: "".to_string(),
            meeting_date: None,

            is_subscribed: true,

            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Collectable for Contact {
    fn get_collection_name() -> &'static str {
        "contact"
    }
}

impl Identifiable for Contact {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Contact {
    /// Full name as used in rendered emails.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Checks field rules, reporting every violation at once. Email
    /// uniqueness is checked separately on create/update since it needs
    /// database access.
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();

        validate::require_min_len(&mut errors, "first_name", &self.first_name, 2);
        validate::require_min_len(&mut errors, "last_name", &self.last_name, 2);
        validate::require_email(&mut errors, "email", &self.email);
        validate::check_phone(&mut errors, "phone", &self.phone);

        errors.into_result()
    }
}

/// Validates and stores a new contact. The email address must not be in use
/// by another contact.
pub fn create(db: &Database, mut contact: Contact) -> Result<Contact> {
    contact.validate()?;
    if find_by_email(db, &contact.email)?.is_some() {
        let mut errors = FieldErrors::new();
        errors.push("email", "is already used by another contact");
        return Err(errors.into());
    }

    let now = Utc::now();
    contact.created_at = now;
    contact.updated_at = now;
    db.set(&contact)?;

    Ok(contact)
}

/// Validates and stores changes to an existing contact.
pub fn update(db: &Database, mut contact: Contact) -> Result<Contact> {
    contact.validate()?;
    if db.try_get::<Contact>(contact.id)?.is_none() {
        return Err(ErrorKind::NotFound(format!("contact {}", contact.id)).into());
    }
    if let Some(other) = find_by_email(db, &contact.email)? {
        if other.id != contact.id {
            let mut errors = FieldErrors::new();
            errors.push("email", "is already used by another contact");
            return Err(errors.into());
        }
    }

    contact.updated_at = Utc::now();
    db.set(&contact)?;

    Ok(contact)
}

pub fn find(db: &Database, id: ContactId) -> Result<Contact> {
    db.try_get(id)?
        .ok_or_else(|| ErrorKind::NotFound(format!("contact {}", id)).into())
}

pub fn find_by_email(db: &Database, email: &str) -> Result<Option<Contact>> {
    for contact in db.get_collection::<Contact>()? {
        if contact.email == email {
            return Ok(Some(contact));
        }
    }
    Ok(None)
}

/// All contacts, newest first.
pub fn find_all(db: &Database) -> Result<Vec<Contact>> {
    let mut contacts = db.get_collection::<Contact>()?;
    contacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(contacts)
}

/// Newest-first page of the contact list.
pub fn find_page(db: &Database, limit: usize, offset: usize) -> Result<Vec<Contact>> {
    Ok(find_all(db)?.into_iter().skip(offset).take(limit).collect())
}

/// Contacts in the given category, in collection order. With
/// `subscribed_only` the unsubscribed are skipped.
pub fn find_by_category(
    db: &Database,
    category: Category,
    subscribed_only: bool,
) -> Result<Vec<Contact>> {
    let mut out = Vec::new();
    for contact in db.get_collection::<Contact>()? {
        if contact.category != category {
            continue;
        }
        if subscribed_only && !contact.is_subscribed {
            continue;
        }
        out.push(contact);
    }
    Ok(out)
}

/// Case-insensitive substring search across names, email and company.
pub fn search(db: &Database, query: &str) -> Result<Vec<Contact>> {
    let query = query.to_lowercase();
    let mut out = Vec::new();
    for contact in find_all(db)? {
        let haystack = format!(
            "{} {} {} {}",
            contact.first_name, contact.last_name, contact.email, contact.company
        )
        .to_lowercase();
        if haystack.contains(&query) {
            out.push(contact);
        }
    }
    Ok(out)
}

pub fn count(db: &Database) -> Result<usize> {
    db.len::<Contact>()
}

/// Flips the subscription flag off. Idempotent.
pub fn unsubscribe(db: &Database, id: ContactId) -> Result<Contact> {
    let mut contact = find(db, id)?;
    contact.is_subscribed = false;
    contact.updated_at = Utc::now();
    db.set(&contact)?;
    Ok(contact)
}

pub fn delete(db: &Database, id: ContactId) -> Result<()> {
    let contact = find(db, id)?;
    db.remove(&contact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_contact(email: &str) -> Contact {
        Contact {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            category: Category::Scientific,
            ..Default::default()
        }
    }

    #[test]
    fn validation_collects_all_problems() {
        let contact = Contact {
            first_name: "A".to_string(),
            last_name: "".to_string(),
            email: "nope".to_string(),
            phone: "123".to_string(),
            ..Default::default()
        };
        let err = contact.validate().unwrap_err();
        match err.kind {
            crate::ErrorKind::Validation(errors) => {
                assert!(errors.contains("first_name"));
                assert!(errors.contains("last_name"));
                assert!(errors.contains("email"));
                assert!(errors.contains("phone"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn create_rejects_duplicate_email() {
        let db = Database::temporary().unwrap();
        create(&db, valid_contact("ada@example.com")).unwrap();

        let err = create(&db, valid_contact("ada@example.com")).unwrap_err();
        assert!(err.to_string().contains("email"));
        assert_eq!(count(&db).unwrap(), 1);
    }

    #[test]
    fn find_page_walks_newest_first() {
        let db = Database::temporary().unwrap();
        let base = Utc::now();
        for i in 0..5i64 {
            let mut contact = valid_contact(&format!("c{i}@example.com"));
            contact.created_at = base + chrono::Duration::seconds(i);
            db.set(&contact).unwrap();
        }

        let newest = find_page(&db, 2, 0).unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].email, "c4@example.com");
        assert_eq!(newest[1].email, "c3@example.com");

        let tail = find_page(&db, 2, 4).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].email, "c0@example.com");
    }

    #[test]
    fn update_keeps_own_email_but_rejects_taken_one() {
        let db = Database::temporary().unwrap();
        let mut ada = create(&db, valid_contact("ada@example.com")).unwrap();
        create(&db, valid_contact("grace@example.com")).unwrap();

        ada.company = "Analytical Engines".to_string();
        update(&db, ada.clone()).unwrap();

        ada.email = "grace@example.com".to_string();
        assert!(update(&db, ada).is_err());
    }

    #[test]
    fn unsubscribe_flips_flag() {
        let db = Database::temporary().unwrap();
        let contact = create(&db, valid_contact("ada@example.com")).unwrap();
        assert!(contact.is_subscribed);

        let contact = unsubscribe(&db, contact.id).unwrap();
        assert!(!contact.is_subscribed);

        // calling again is fine
        let contact = unsubscribe(&db, contact.id).unwrap();
        assert!(!contact.is_subscribed);
    }

    #[test]
    fn category_round_trips_through_strings() {
        use std::str::FromStr;

        assert_eq!(Category::It.to_string(), "it");
        assert_eq!(Category::from_str("firmware").unwrap(), Category::Firmware);
        assert!(Category::from_str("marketing").is_err());
    }

    #[test]
    fn search_matches_name_email_and_company() {
        let db = Database::temporary().unwrap();
        let mut contact = valid_contact("ada@example.com");
        contact.company = "Analytical Engines".to_string();
        create(&db, contact).unwrap();
        create(&db, valid_contact("grace@example.com")).unwrap();

        assert_eq!(search(&db, "lovelace").unwrap().len(), 2);
        assert_eq!(search(&db, "analytical").unwrap().len(), 1);
        assert_eq!(search(&db, "grace@").unwrap().len(), 1);
        assert!(search(&db, "babbage").unwrap().is_empty());
    }

    #[test]
    fn full_name_is_trimmed() {
        let mut contact = valid_contact("ada@example.com");
        assert_eq!(contact.full_name(), "Ada Lovelace");

        contact.last_name = "".to_string();
        assert_eq!(contact.full_name(), "Ada");
    }
}
