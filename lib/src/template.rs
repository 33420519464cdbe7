use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::contact::{Category, Contact};
use crate::db::{Collectable, Database, Identifiable};
use crate::error::{ErrorKind, Result};
use crate::validate::{self, FieldErrors};

pub type TemplateId = Uuid;

/// Tags an email body may use. Anything else fails template validation;
/// content is never silently rewritten.
pub const ALLOWED_TAGS: &[&str] = &[
    "a", "br", "p", "strong", "b", "em", "i", "u", "h1", "h2", "h3", "ul", "ol", "li", "div",
    "span", "img", "table", "tr", "td", "th",
];

/// Reusable HTML email with `{placeholder}` variables filled in per contact
/// at send time.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailTemplate {
    pub id: TemplateId,

    pub name: String,
    pub subject: String,
    /// HTML body. Restricted to [`ALLOWED_TAGS`].
    pub content: String,

    /// Audience hint: the category this template is written for. `None`
    /// means it suits every category.
    pub audience: Option<Category>,

    /// Optional custom placeholder table (placeholder -> description),
    /// overriding the built-in one for display purposes.
    pub variables: Option<BTreeMap<String, String>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for EmailTemplate {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "".to_string(),
            subject: "".to_string(),
            content: "".to_string(),
            audience: None,
            variables: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Collectable for EmailTemplate {
    fn get_collection_name() -> &'static str {
        "email_template"
    }
}

impl Identifiable for EmailTemplate {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

/// Subject and body of one rendered email, ready for the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

impl EmailTemplate {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();

        validate::require_min_len(&mut errors, "name", &self.name, 3);
        validate::require_min_len(&mut errors, "subject", &self.subject, 5);
        validate::require_min_len(&mut errors, "content", &self.content, 20);

        if let Some(tag) = find_disallowed_tag(&self.content) {
            errors.push("content", format!("html tag <{}> is not allowed", tag));
        }

        errors.into_result()
    }

    /// The placeholder table shown to template authors: the custom one when
    /// set, the built-in six otherwise.
    pub fn available_variables(&self) -> BTreeMap<String, String> {
        match &self.variables {
            Some(vars) if !vars.is_empty() => vars.clone(),
            _ => default_variables(),
        }
    }

    /// Fills the placeholders with the contact's values. Contact-derived
    /// values are HTML-escaped in the body but inserted as-is in the subject,
    /// which is plain text. The unsubscribe url goes in raw on both sides so
    /// it stays clickable. Unknown `{placeholders}` are left alone.
    pub fn render(&self, contact: &Contact, unsubscribe_url: &str) -> RenderedEmail {
        let values = [
            ("{first_name}", contact.first_name.clone()),
            ("{last_name}", contact.last_name.clone()),
            ("{full_name}", contact.full_name()),
            ("{company}", contact.company.clone()),
            ("{email}", contact.email.clone()),
        ];

        let mut subject = self.subject.clone();
        let mut html_body = self.content.clone();
        for (placeholder, value) in &values {
            subject = subject.replace(placeholder, value);
            html_body = html_body.replace(placeholder, &html_escape(value));
        }
        subject = subject.replace("{unsubscribe_link}", unsubscribe_url);
        html_body = html_body.replace("{unsubscribe_link}", unsubscribe_url);

        RenderedEmail { subject, html_body }
    }
}

fn default_variables() -> BTreeMap<String, String> {
    [
        ("{first_name}", "Contact first name"),
        ("{last_name}", "Contact last name"),
        ("{full_name}", "Contact full name"),
        ("{company}", "Company"),
        ("{email}", "Email address"),
        ("{unsubscribe_link}", "Unsubscribe link"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Escapes the five HTML-significant characters.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Scans for the first tag name outside [`ALLOWED_TAGS`]. Only looks at
/// `<name` and `</name` shapes; stray `<` characters that don't open a tag
/// name are ignored.
fn find_disallowed_tag(content: &str) -> Option<String> {
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '<' {
            continue;
        }
        if chars.peek() == Some(&'/') {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() {
                name.push(c.to_ascii_lowercase());
                chars.next();
            } else {
                break;
            }
        }
        if !name.is_empty() && !ALLOWED_TAGS.contains(&name.as_str()) {
            return Some(name);
        }
    }
    None
}

/// Validates and stores a new template.
pub fn create(db: &Database, mut template: EmailTemplate) -> Result<EmailTemplate> {
    template.validate()?;

    let now = Utc::now();
    template.created_at = now;
    template.updated_at = now;
    db.set(&template)?;

    Ok(template)
}

/// Validates and stores changes to an existing template.
pub fn update(db: &Database, mut template: EmailTemplate) -> Result<EmailTemplate> {
    template.validate()?;
    if db.try_get::<EmailTemplate>(template.id)?.is_none() {
        return Err(ErrorKind::NotFound(format!("template {}", template.id)).into());
    }

    template.updated_at = Utc::now();
    db.set(&template)?;

    Ok(template)
}

pub fn find(db: &Database, id: TemplateId) -> Result<EmailTemplate> {
    db.try_get(id)?
        .ok_or_else(|| ErrorKind::NotFound(format!("template {}", id)).into())
}

/// All templates, newest first.
pub fn find_all(db: &Database) -> Result<Vec<EmailTemplate>> {
    let mut templates = db.get_collection::<EmailTemplate>()?;
    templates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(templates)
}

/// Newest-first page of the template list.
pub fn find_page(db: &Database, limit: usize, offset: usize) -> Result<Vec<EmailTemplate>> {
    Ok(find_all(db)?.into_iter().skip(offset).take(limit).collect())
}

pub fn count(db: &Database) -> Result<usize> {
    db.len::<EmailTemplate>()
}

pub fn delete(db: &Database, id: TemplateId) -> Result<()> {
    let template = find(db, id)?;
    db.remove(&template)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            company: "R&D <Labs>".to_string(),
            ..Default::default()
        }
    }

    fn template(subject: &str, content: &str) -> EmailTemplate {
        EmailTemplate {
            name: "October outreach".to_string(),
            subject: subject.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn render_fills_full_name() {
        let template = template("Hello {full_name}", "<p>Dear {full_name},</p>");
        let rendered = template.render(&contact(), "");
        assert_eq!(rendered.subject, "Hello Ada Lovelace");
        assert_eq!(rendered.html_body, "<p>Dear Ada Lovelace,</p>");
    }

    #[test]
    fn body_is_escaped_subject_is_not() {
        let template = template("News from {company}", "<p>News from {company}</p>");
        let rendered = template.render(&contact(), "");
        assert_eq!(rendered.subject, "News from R&D <Labs>");
        assert_eq!(
            rendered.html_body,
            "<p>News from R&amp;D &lt;Labs&gt;</p>"
        );
    }

    #[test]
    fn unsubscribe_link_is_raw_everywhere() {
        let url = "https://example.com/unsubscribe?contact=1&token=a";
        let template = template("Bye {unsubscribe_link}", "<a>{unsubscribe_link}</a>");
        let rendered = template.render(&contact(), url);
        assert!(rendered.subject.contains(url));
        assert!(rendered.html_body.contains(url));
    }

    #[test]
    fn unknown_placeholders_stay_verbatim() {
        let template = template("Hi {nickname}", "<p>{coupon} for {first_name}</p>");
        let rendered = template.render(&contact(), "");
        assert_eq!(rendered.subject, "Hi {nickname}");
        assert_eq!(rendered.html_body, "<p>{coupon} for Ada</p>");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<b>"quotes" & 'apostrophes'</b>"#),
            "&lt;b&gt;&quot;quotes&quot; &amp; &#39;apostrophes&#39;&lt;/b&gt;"
        );
        assert_eq!(html_escape("plain"), "plain");
    }

    #[test]
    fn validation_checks_lengths() {
        let err = template("Hi", "too short").validate().unwrap_err();
        match err.kind {
            crate::ErrorKind::Validation(errors) => {
                assert!(errors.contains("subject"));
                assert!(errors.contains("content"));
                assert!(!errors.contains("name"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn validation_rejects_disallowed_tags() {
        let bad = template(
            "Monthly update",
            "<p>fine</p><script>alert('x')</script> and some padding",
        );
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("script"));

        let good = template(
            "Monthly update",
            "<h1>Title</h1><p>Body with <strong>bold</strong> text, a < b.</p>",
        );
        good.validate().unwrap();
    }

    #[test]
    fn available_variables_falls_back_to_builtin() {
        let mut template = template("Monthly update", "<p>long enough content here</p>");
        assert_eq!(template.available_variables().len(), 6);
        assert!(template
            .available_variables()
            .contains_key("{unsubscribe_link}"));

        let mut custom = BTreeMap::new();
        custom.insert("{first_name}".to_string(), "First name".to_string());
        template.variables = Some(custom);
        assert_eq!(template.available_variables().len(), 1);
    }
}
