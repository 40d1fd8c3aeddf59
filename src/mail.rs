//! Mail-sync collaborator.
//!
//! The Gmail fetch happens in the host process. The core only asks for a
//! sync and never waits for it; the host later hands the fetched messages
//! back with `sync_emails`, and the core classifies them into tracker
//! updates (see [`crate::agent::inbox`]).

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MailSyncError;

/// One message fetched by the host. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailMessage {
    pub from: String,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    /// Raw `Received` header; the classifier converts it to UTC.
    pub date_time: String,
}

/// Starts an out-of-band mail sync. Must return without waiting for it.
pub trait MailSync: Send + Sync {
    fn trigger_sync(&self) -> Result<(), MailSyncError>;
}

/// Forwards sync requests to the host through `notify`.
///
/// The host reports the Gmail connection through [`HostMailSync::set_status`];
/// while the credential is expired every request fails with
/// [`MailSyncError::AuthorizationExpired`] until the host reconnects.
pub struct HostMailSync {
    connected: AtomicBool,
    expired: AtomicBool,
    notify: Box<dyn Fn() + Send + Sync>,
}

impl HostMailSync {
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            connected: AtomicBool::new(true),
            expired: AtomicBool::new(false),
            notify: Box::new(notify),
        }
    }

    pub fn set_status(&self, connected: bool, expired: bool) {
        info!(connected, expired, "Mail connection status updated");
        self.connected.store(connected, Ordering::Release);
        self.expired.store(expired, Ordering::Release);
    }
}

impl MailSync for HostMailSync {
    fn trigger_sync(&self) -> Result<(), MailSyncError> {
        if self.expired.load(Ordering::Acquire) {
            return Err(MailSyncError::AuthorizationExpired);
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(MailSyncError::Unavailable("Gmail is not connected".into()));
        }
        (self.notify)();
        Ok(())
    }
}
