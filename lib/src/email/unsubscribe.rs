//! Signed unsubscribe links.
//!
//! Every outgoing email carries a personal unsubscribe url. The token in it
//! is an HMAC over the contact's id and email, so a link works only for the
//! contact it was issued to and dies if their address changes. Verification
//! is constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::contact::{self, Contact, ContactId};
use crate::error::{ErrorKind, Result};
use crate::Database;

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks unsubscribe tokens with a process-wide secret.
#[derive(Clone)]
pub struct LinkSigner {
    secret: Vec<u8>,
    base_url: Url,
}

impl LinkSigner {
    pub fn new(config: &crate::Config) -> Result<Self> {
        Ok(Self {
            secret: config.unsubscribe.secret.clone().into_bytes(),
            base_url: Url::parse(&config.unsubscribe.base_url)?,
        })
    }

    fn mac(&self, contact: &Contact) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| crate::Error::new(ErrorKind::Other(e.to_string())))?;
        mac.update(contact.id.as_bytes());
        mac.update(contact.email.as_bytes());
        Ok(mac)
    }

    /// Hex token tied to the contact's id and current email address.
    pub fn token(&self, contact: &Contact) -> Result<String> {
        Ok(hex::encode(self.mac(contact)?.finalize().into_bytes()))
    }

    /// Constant-time token check.
    pub fn verify(&self, contact: &Contact, token: &str) -> bool {
        let presented = match hex::decode(token) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        match self.mac(contact) {
            Ok(mac) => mac.verify_slice(&presented).is_ok(),
            Err(_) => false,
        }
    }

    /// Full unsubscribe url for the contact, carrying their id and token as
    /// query parameters.
    pub fn unsubscribe_url(&self, contact: &Contact) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("contact", &contact.id.to_string())
            .append_pair("token", &self.token(contact)?);
        Ok(url)
    }
}

/// The unsubscribe action behind the public link: checks the token, then
/// flips the contact's subscription flag.
pub fn unsubscribe(
    db: &Database,
    signer: &LinkSigner,
    id: ContactId,
    token: &str,
) -> Result<Contact> {
    let contact = contact::find(db, id)?;
    if !signer.verify(&contact, token) {
        return Err(ErrorKind::InvalidToken.into());
    }
    contact::unsubscribe(db, id)
}
