//! Outgoing email.
//!
//! Everything above this module talks to the [`Mailer`] trait; the only
//! production implementation is [`SmtpMailer`] on lettre's tokio transport.
//! Tests substitute scripted mailers to run the full pipeline offline.

pub mod unsubscribe;

use async_trait::async_trait;
use lettre::{
    address::AddressError, message::SinglePart, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{Error, ErrorKind, Result};

/// The transport seam between campaign execution and the outside world.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends a single HTML message. `Ok` means the transport accepted it,
    /// nothing more.
    async fn send_html(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Smtp transport configured from [`crate::Config`]: STARTTLS relay,
/// credentials, a fixed from address and a `noreply` reply-to.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    reply_to: String,
}

impl SmtpMailer {
    pub fn new(config: &crate::Config) -> Result<Self> {
        let creds = Credentials::new(
            config.email.smtp_user.clone(),
            config.email.smtp_password.clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(
            &config.email.smtp_server,
        )
        .map_err(|e| Error::new(ErrorKind::Other(e.to_string())))?
        .port(config.email.smtp_port)
        .credentials(creds)
        .build();

        Ok(Self {
            transport,
            from: format!("{} <{}>", config.name, config.email.address),
            reply_to: format!("noreply <noreply@{}>", config.domain),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_html(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e: AddressError| Error::new(ErrorKind::EmailParseError(e.to_string())))?,
            )
            .reply_to(
                self.reply_to
                    .parse()
                    .map_err(|e: AddressError| Error::new(ErrorKind::EmailParseError(e.to_string())))?,
            )
            .to(to
                .parse()
                .map_err(|e: AddressError| Error::new(ErrorKind::EmailParseError(e.to_string())))?)
            .subject(subject)
            .singlepart(SinglePart::html(html_body.to_string()))?;

        let response = self.transport.send(message).await?;
        if response.is_positive() {
            Ok(())
        } else {
            Err(ErrorKind::EmailBadResponse(response.code().to_string()).into())
        }
    }
}
