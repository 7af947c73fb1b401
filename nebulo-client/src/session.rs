//! Session Context
//!
//! Created by a successful login and dropped on logout. Everything that
//! needs "who is logged in" takes a session explicitly: the user profile,
//! the private key, the authenticated API client and the channel cache all
//! live here.
//!
//! Logout closes the session: the private key is released and every later
//! operation fails with [`ClientError::NotAuthenticated`], including on
//! handles obtained before the logout.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nebulo_keys::{envelope, IdentityKey, RecipientKey, SecureEnvelope, X509Certificate};
use tokio::sync::RwLock;

use crate::api::{ApiClient, Transport};
use crate::error::{ClientError, RecipientFailure, Result};
use crate::models::contact::add_contact;
use crate::models::{Channel, Contact, MessageCreateRequest, OutgoingMessage, ReadMessage, User};

/// Envelopes for every member that could be sealed, plus the members that
/// could not
#[derive(Debug)]
pub struct SealedMessage {
    pub request: MessageCreateRequest,
    pub failures: Vec<RecipientFailure>,
}

impl SealedMessage {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Session<T> {
    user: User,
    fingerprint: String,
    own_key_b64: String,
    identity: ArcSwapOption<IdentityKey>,
    certificate: X509Certificate,
    api: ApiClient<T>,
    contacts: RwLock<Vec<Contact>>,
    contacts_file: Option<PathBuf>,
    channels: DashMap<String, Channel>,
}

impl<T: Transport> Session<T> {
    pub fn new(
        user: User,
        identity: IdentityKey,
        certificate: X509Certificate,
        api: ApiClient<T>,
        contacts: Vec<Contact>,
        contacts_file: Option<PathBuf>,
    ) -> Self {
        let fingerprint = identity.public_key().fingerprint();
        let own_key_b64 = identity.public_key().to_base64();
        Self {
            user,
            fingerprint,
            own_key_b64,
            identity: ArcSwapOption::from_pointee(identity),
            certificate,
            api,
            contacts: RwLock::new(contacts),
            contacts_file,
            channels: DashMap::new(),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Fingerprint of the logged-in identity key
    pub fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.identity.load().is_none()
    }

    /// Release the private key and the channel cache. Called by the
    /// identity manager on logout and when a new login replaces this session.
    pub(crate) fn close(&self) {
        if self.identity.swap(None).is_some() {
            self.channels.clear();
            log::debug!("session of {} closed", self.fingerprint);
        }
    }

    fn identity(&self) -> Result<Arc<IdentityKey>> {
        self.identity.load_full().ok_or(ClientError::NotAuthenticated)
    }

    pub fn certificate(&self) -> &X509Certificate {
        &self.certificate
    }

    pub fn api(&self) -> Result<&ApiClient<T>> {
        self.identity()?;
        Ok(&self.api)
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.contacts.read().await.clone()
    }

    /// Add a contact and save the contact file when one is configured
    pub async fn add_contact(&self, name: &str, public_key_b64: &str) -> Result<()> {
        self.identity()?;
        let mut contacts = self.contacts.write().await;
        match &self.contacts_file {
            Some(path) => *contacts = add_contact(path, name, public_key_b64)?,
            None => {
                RecipientKey::from_base64(public_key_b64)?;
                contacts.push(Contact {
                    name: name.to_string(),
                    public_key_b64: public_key_b64.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Reload the channel cache from the server
    pub async fn refresh_channels(&self) -> Result<Vec<String>> {
        let channels = self.api()?.channel_list().await?;
        // A logout may have happened while the request was in flight
        self.identity()?;
        self.channels.clear();
        for (name, mut channel) in channels {
            if channel.name.is_empty() {
                channel.name = name.clone();
            }
            self.channels.insert(name, channel);
        }
        log::debug!("{} channel(s) cached", self.channels.len());
        Ok(self.channel_names())
    }

    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).map(|c| c.value().clone())
    }

    /// Cached channel names, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Create a channel; the own key is added to the members when missing
    pub async fn create_channel(&self, name: &str, members_public_key: &[String]) -> Result<Channel> {
        let own = &self.own_key_b64;
        let mut members = members_public_key.to_vec();
        if !members.contains(own) {
            members.push(own.clone());
        }

        let mut channel = self.api()?.channel_create(name, &members).await?;
        if channel.name.is_empty() {
            channel.name = name.to_string();
        }
        log::info!("channel {name:?} created with {} member(s)", members.len());
        self.channels.insert(channel.name.clone(), channel.clone());
        Ok(channel)
    }

    /// Seal `plaintext` once per member of a cached channel.
    ///
    /// Members whose key cannot be used are reported in `failures`; they are
    /// never silently left out.
    pub fn seal_for_channel(&self, channel_name: &str, plaintext: &str) -> Result<SealedMessage> {
        self.identity()?;
        let channel = self
            .channel(channel_name)
            .ok_or_else(|| ClientError::UnknownChannel(channel_name.to_string()))?;

        let mut messages = Vec::with_capacity(channel.members.len());
        let mut failures = Vec::new();
        for member in &channel.members {
            let sealed = member.recipient_key().and_then(|key| {
                envelope::encrypt(plaintext.as_bytes(), &key).map_err(ClientError::from)
            });
            match sealed {
                Ok(message) => messages.push(OutgoingMessage {
                    message,
                    receiver_pkey: member.public_key_der_b64.clone(),
                }),
                Err(e) => {
                    log::warn!("unable to encrypt for {}: {e}", member.label());
                    failures.push(RecipientFailure {
                        recipient: member.public_key_der_b64.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(SealedMessage {
            request: MessageCreateRequest {
                channel_name: channel.name,
                messages,
            },
            failures,
        })
    }

    /// Seal and post a message. Nothing is sent when any member failed.
    pub async fn send_message(&self, channel_name: &str, plaintext: &str) -> Result<usize> {
        let sealed = self.seal_for_channel(channel_name, plaintext)?;
        if !sealed.is_complete() {
            return Err(ClientError::RecipientEncryption(sealed.failures));
        }
        let count = sealed.request.messages.len();
        self.api()?.message_create(&sealed.request).await?;
        log::debug!("message posted to {channel_name:?} for {count} recipient(s)");
        Ok(count)
    }

    /// Open one listed envelope with the own key
    pub fn open(&self, sealed: &SecureEnvelope) -> Result<String> {
        open_with(&*self.identity()?, sealed)
    }

    /// Messages of a channel posted after `last_read`, each with its own
    /// decrypt result
    pub async fn read_messages(
        &self,
        channel_name: &str,
        last_read: DateTime<Utc>,
    ) -> Result<Vec<ReadMessage>> {
        let listed = self.api()?.message_list(channel_name, last_read).await?;
        let identity = self.identity()?;
        Ok(listed
            .into_iter()
            .map(|incoming| {
                let plaintext = open_with(&identity, &incoming.envelope);
                if let Err(e) = &plaintext {
                    log::warn!(
                        "unable to open message from {} posted {}: {e}",
                        incoming.sender.label(),
                        incoming.posted
                    );
                }
                ReadMessage {
                    sender: incoming.sender,
                    posted: incoming.posted,
                    plaintext,
                }
            })
            .collect())
    }
}

fn open_with(identity: &IdentityKey, sealed: &SecureEnvelope) -> Result<String> {
    let plaintext = envelope::decrypt(sealed, identity)?;
    String::from_utf8(plaintext)
        .map_err(|_| ClientError::MalformedEnvelope("plaintext is not valid UTF-8".to_string()))
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user.label())
            .field("fingerprint", &self.fingerprint)
            .field("closed", &self.identity.load().is_none())
            .finish()
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        log::debug!("session of {} dropped", self.fingerprint);
    }
}
