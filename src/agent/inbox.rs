//! Turns fetched mail into tracker updates.
//!
//! The host fetches messages after a `mail_sync_requested` event and sends
//! them back. One classification request goes to the text model with the
//! tool declarations attached; the function calls it returns run through the
//! same dispatcher the live session uses.

use anyhow::Context;
use tracing::{debug, info};

use super::TextChat;
use crate::config::Settings;
use crate::jobs::JobApplication;
use crate::mail::MailMessage;
use crate::tools::{ToolDispatcher, ToolInvocation, SAVE_JOB_APPLICATION, UPDATE_JOB_STATUS};

/// Only these calls are honoured during a sync. A delete or a nested sync
/// request from the classifier is dropped.
const SYNC_TOOLS: [&str; 2] = [SAVE_JOB_APPLICATION, UPDATE_JOB_STATUS];

/// Build the classification request for a batch of messages.
pub fn classification_prompt(
    emails: &[MailMessage],
    jobs: &[JobApplication],
) -> serde_json::Result<String> {
    Ok(format!(
        "Review these emails and record job application news with your tools: \
         '{save}' for a new application, '{update}' when an existing one moved on.\n\
         \n\
         Tracker as it stands:\n{jobs}\n\
         \n\
         Emails:\n{emails}\n\
         \n\
         Rules:\n\
         - Only act on applications the user actually submitted. Job alerts and \
         \"X is hiring\" suggestions are not applications, even for a company already tracked.\n\
         - The dateTime field is a raw Received header, often in Pacific time. \
         Convert it to UTC for dateApplied and timeApplied.\n\
         - When two emails describe the same application keep the newer one.\n\
         - Read the subject and the body before deciding.",
        save = SAVE_JOB_APPLICATION,
        update = UPDATE_JOB_STATUS,
        jobs = serde_json::to_string(jobs)?,
        emails = serde_json::to_string(emails)?,
    ))
}

/// Classify `emails` and apply the resulting tracker updates.
///
/// Returns how many tool calls ran.
pub async fn sync_emails(
    chat: &TextChat,
    dispatcher: &ToolDispatcher,
    emails: &[MailMessage],
) -> anyhow::Result<usize> {
    if emails.is_empty() {
        return Ok(0);
    }

    let jobs = dispatcher
        .jobs()
        .list()
        .context("reading tracker before mail sync")?;
    let prompt = classification_prompt(emails, &jobs)?;
    let reply = chat.generate(&prompt).await?;

    let (calls, dropped): (Vec<ToolInvocation>, Vec<ToolInvocation>) = reply
        .function_calls
        .into_iter()
        .partition(|call| SYNC_TOOLS.contains(&call.name.as_str()));
    for call in &dropped {
        debug!(tool = %call.name, "Ignoring tool call during mail sync");
    }

    let results = dispatcher.dispatch_all(&calls);
    for result in &results {
        info!(tool = %result.name, "Mail sync: {}", result.text);
    }
    Ok(results.len())
}

/// One sync with a chat built from the current settings.
pub async fn sync_with_settings(
    settings: &Settings,
    dispatcher: &ToolDispatcher,
    emails: &[MailMessage],
) -> anyhow::Result<usize> {
    let chat = TextChat::from_settings(settings)?;
    sync_emails(&chat, dispatcher, emails).await
}
