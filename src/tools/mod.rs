//! Tool-call dispatch.
//!
//! The agent invokes local operations by name; each invocation produces
//! exactly one textual result keyed by the invocation id. Logical misses
//! ("not found") and contract violations (bad arguments, unknown tool) are
//! both rendered as text. Nothing here fails.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{MailSyncError, ToolError};
use crate::jobs::{summarize, JobApplication, JobStatus, JobStore};
use crate::mail::MailSync;

// ── Tool names ──────────────────────────────────────────────────────

pub const SAVE_JOB_APPLICATION: &str = "save_job_application";
pub const LIST_JOB_APPLICATIONS: &str = "list_job_applications";
pub const UPDATE_JOB_STATUS: &str = "update_job_status";
pub const DELETE_JOB_APPLICATION: &str = "delete_job_application";
pub const SYNC_GMAIL_EMAILS: &str = "sync_gmail_emails";

/// Sent in place of an empty result so every invocation is acknowledged.
pub const EMPTY_RESULT: &str = "Done.";

/// One request from the agent to run a local operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolInvocation {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, rename = "args")]
    pub arguments: Map<String, Value>,
}

/// The answer to one [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub text: String,
}

/// Executes tool invocations against the job store and mail collaborator.
///
/// Both collaborators are consulted at call time; the dispatcher holds no
/// snapshot of their state.
#[derive(Clone)]
pub struct ToolDispatcher {
    jobs: Arc<dyn JobStore>,
    mail: Arc<dyn MailSync>,
}

impl ToolDispatcher {
    pub fn new(jobs: Arc<dyn JobStore>, mail: Arc<dyn MailSync>) -> Self {
        Self { jobs, mail }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Run one invocation. Always returns a result with the invocation's id.
    pub fn dispatch(&self, invocation: &ToolInvocation) -> ToolResult {
        let text = match self.run(invocation) {
            Ok(text) if text.trim().is_empty() => EMPTY_RESULT.to_string(),
            Ok(text) => text,
            Err(e) => {
                warn!(tool = %invocation.name, id = %invocation.id, "Tool call rejected: {}", e);
                format!("Error: {}", e)
            }
        };
        info!(tool = %invocation.name, id = %invocation.id, "Tool call handled");
        ToolResult {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            text,
        }
    }

    /// Run several invocations in arrival order, one result each.
    pub fn dispatch_all(&self, invocations: &[ToolInvocation]) -> Vec<ToolResult> {
        invocations.iter().map(|inv| self.dispatch(inv)).collect()
    }

    fn run(&self, invocation: &ToolInvocation) -> Result<String, ToolError> {
        let args = &invocation.arguments;
        match invocation.name.as_str() {
            SAVE_JOB_APPLICATION => {
                let job = JobApplication {
                    id: None,
                    company: required_str(args, "company")?,
                    role: required_str(args, "role")?,
                    source: optional_str(args, "source"),
                    date_applied: optional_str(args, "dateApplied"),
                    time_applied: optional_str(args, "timeApplied"),
                    status: optional_status(args)?.unwrap_or_default(),
                };
                Ok(match self.jobs.save(job) {
                    Ok(outcome) => outcome.message(),
                    Err(e) => store_failure(e),
                })
            }
            LIST_JOB_APPLICATIONS => Ok(match self.jobs.list() {
                Ok(jobs) => summarize(&jobs),
                Err(e) => store_failure(e),
            }),
            UPDATE_JOB_STATUS => {
                let company = required_str(args, "company")?;
                let status = optional_status(args)?.ok_or(ToolError::MissingArgument("status"))?;
                Ok(match self.set_status(&company, status) {
                    Ok(Some(job)) => {
                        format!("I've updated your status for {} to {}.", job.company, status)
                    }
                    Ok(None) => format!(
                        "I couldn't find an application for \"{}\" in your tracker.",
                        company
                    ),
                    Err(e) => store_failure(e),
                })
            }
            DELETE_JOB_APPLICATION => {
                let company = required_str(args, "company")?;
                Ok(match self.jobs.delete(&company) {
                    Ok(Some(job)) => {
                        format!("Removed the application for {} from your list.", job.company)
                    }
                    Ok(None) => format!("Could not find a job for {}.", company),
                    Err(e) => store_failure(e),
                })
            }
            SYNC_GMAIL_EMAILS => Ok(match self.mail.trigger_sync() {
                Ok(()) => {
                    "Syncing your Gmail inbox now. I'll update your tracker with anything new."
                        .to_string()
                }
                Err(MailSyncError::AuthorizationExpired) => {
                    MailSyncError::AuthorizationExpired.to_string()
                }
                Err(e) => format!("I couldn't start a Gmail sync: {}.", e),
            }),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

impl ToolDispatcher {
    /// Update only when the status actually changes; a repeated update
    /// (common when the same email is classified twice) leaves the store
    /// untouched.
    fn set_status(
        &self,
        company: &str,
        status: JobStatus,
    ) -> Result<Option<JobApplication>, crate::error::StoreError> {
        match self.jobs.find_by_company(company)? {
            None => Ok(None),
            Some(job) if job.status == status => Ok(Some(job)),
            Some(_) => self.jobs.update_status(company, status),
        }
    }
}

fn store_failure(e: crate::error::StoreError) -> String {
    warn!("Job store operation failed: {}", e);
    format!("Error: I couldn't update your tracker ({}).", e)
}

fn required_str(args: &Map<String, Value>, name: &'static str) -> Result<String, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Err(ToolError::MissingArgument(name)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ToolError::MissingArgument(name)),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(ToolError::InvalidArgument {
            name,
            reason: format!("expected a string, got {}", other),
        }),
    }
}

fn optional_str(args: &Map<String, Value>, name: &str) -> String {
    match args.get(name) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn optional_status(args: &Map<String, Value>) -> Result<Option<JobStatus>, ToolError> {
    match args.get("status") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s
            .parse::<JobStatus>()
            .map(Some)
            .map_err(|reason| ToolError::InvalidArgument {
                name: "status",
                reason,
            }),
        Some(other) => Err(ToolError::InvalidArgument {
            name: "status",
            reason: format!("expected a string, got {}", other),
        }),
    }
}

/// Function declarations advertised to the agent.
pub fn declarations() -> Value {
    let statuses: Vec<&str> = JobStatus::ALL.iter().map(|s| s.as_str()).collect();
    json!([
        {
            "name": SAVE_JOB_APPLICATION,
            "description": "Saves a new job application or updates an existing one in the tracker.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "company": { "type": "STRING", "description": "Name of the company" },
                    "role": { "type": "STRING", "description": "Job title or role" },
                    "source": { "type": "STRING", "description": "Source (e.g., LinkedIn, Referral, Gmail)" },
                    "dateApplied": { "type": "STRING", "description": "Date applied (YYYY-MM-DD)" },
                    "timeApplied": { "type": "STRING", "description": "Time applied (HH:MM) in 24-hour format, UTC" },
                    "status": { "type": "STRING", "description": "Status", "enum": statuses }
                },
                "required": ["company", "role", "source", "dateApplied", "timeApplied", "status"]
            }
        },
        {
            "name": LIST_JOB_APPLICATIONS,
            "description": "Provides a summary of all job applications currently in the user tracker.",
            "parameters": { "type": "OBJECT", "properties": {} }
        },
        {
            "name": UPDATE_JOB_STATUS,
            "description": "Updates the status of a specific job application by company name.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "company": { "type": "STRING", "description": "The company name" },
                    "status": { "type": "STRING", "description": "The new status", "enum": statuses }
                },
                "required": ["company", "status"]
            }
        },
        {
            "name": DELETE_JOB_APPLICATION,
            "description": "Removes a job application from the tracker.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "company": { "type": "STRING", "description": "The company name to remove" }
                },
                "required": ["company"]
            }
        },
        {
            "name": SYNC_GMAIL_EMAILS,
            "description": "Triggers a synchronization with Gmail to check for new job application emails.",
            "parameters": { "type": "OBJECT", "properties": {} }
        }
    ])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::jobs::MemoryJobStore;
    use crate::mail::HostMailSync;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn invocation(id: &str, name: &str, args: Value) -> ToolInvocation {
        ToolInvocation {
            id: id.into(),
            name: name.into(),
            arguments: args.as_object().cloned().unwrap_or_default(),
        }
    }

    fn dispatcher() -> (ToolDispatcher, Arc<MemoryJobStore>, Arc<AtomicUsize>) {
        let store = Arc::new(MemoryJobStore::new());
        let syncs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&syncs);
        let mail = HostMailSync::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (
            ToolDispatcher::new(store.clone(), Arc::new(mail)),
            store,
            syncs,
        )
    }

    fn save_args() -> Value {
        json!({
            "company": "Acme",
            "role": "Engineer",
            "source": "LinkedIn",
            "dateApplied": "2024-05-01",
            "timeApplied": "09:15",
            "status": "Applied"
        })
    }

    #[test]
    fn test_list_on_empty_store() {
        let (d, _, _) = dispatcher();
        let result = d.dispatch(&invocation("1", LIST_JOB_APPLICATIONS, json!({})));
        assert_eq!(result.id, "1");
        assert_eq!(result.text, "You haven't added any job applications yet.");
    }

    #[test]
    fn test_save_then_list() {
        let (d, store, _) = dispatcher();
        let saved = d.dispatch(&invocation("a", SAVE_JOB_APPLICATION, save_args()));
        assert_eq!(saved.text, "Successfully added Engineer at Acme to your tracker.");
        let again = d.dispatch(&invocation("b", SAVE_JOB_APPLICATION, save_args()));
        assert_eq!(again.text, "Updated existing application for Engineer at Acme.");
        assert_eq!(store.list().unwrap().len(), 1);

        let listed = d.dispatch(&invocation("c", LIST_JOB_APPLICATIONS, json!({})));
        assert_eq!(
            listed.text,
            "You have 1 applications in your tracker:\n1. Acme - Engineer (Applied)"
        );
    }

    #[test]
    fn test_update_missing_company_is_not_fatal() {
        let (d, _, _) = dispatcher();
        let result = d.dispatch(&invocation(
            "9",
            UPDATE_JOB_STATUS,
            json!({ "company": "Nonexistent Co", "status": "Offer" }),
        ));
        assert_eq!(
            result.text,
            "I couldn't find an application for \"Nonexistent Co\" in your tracker."
        );
    }

    #[test]
    fn test_update_and_delete() {
        let (d, store, _) = dispatcher();
        d.dispatch(&invocation("1", SAVE_JOB_APPLICATION, save_args()));
        let updated = d.dispatch(&invocation(
            "2",
            UPDATE_JOB_STATUS,
            json!({ "company": "acme", "status": "Interviewing" }),
        ));
        assert_eq!(updated.text, "I've updated your status for Acme to Interviewing.");

        let deleted = d.dispatch(&invocation("3", DELETE_JOB_APPLICATION, json!({ "company": "Acme" })));
        assert_eq!(deleted.text, "Removed the application for Acme from your list.");
        assert!(store.list().unwrap().is_empty());

        let missing = d.dispatch(&invocation("4", DELETE_JOB_APPLICATION, json!({ "company": "Acme" })));
        assert_eq!(missing.text, "Could not find a job for Acme.");
    }

    /// Counts `update_status` calls so tests can see when the store is written.
    struct CountingStore {
        inner: MemoryJobStore,
        updates: AtomicUsize,
    }

    impl JobStore for CountingStore {
        fn save(&self, job: JobApplication) -> Result<crate::jobs::SaveOutcome, crate::error::StoreError> {
            self.inner.save(job)
        }
        fn update_status(
            &self,
            company: &str,
            status: JobStatus,
        ) -> Result<Option<JobApplication>, crate::error::StoreError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update_status(company, status)
        }
        fn delete(&self, company: &str) -> Result<Option<JobApplication>, crate::error::StoreError> {
            self.inner.delete(company)
        }
        fn clear(&self) -> Result<usize, crate::error::StoreError> {
            self.inner.clear()
        }
        fn list(&self) -> Result<Vec<JobApplication>, crate::error::StoreError> {
            self.inner.list()
        }
        fn find_by_company(&self, company: &str) -> Result<Option<JobApplication>, crate::error::StoreError> {
            self.inner.find_by_company(company)
        }
    }

    #[test]
    fn test_update_only_writes_when_status_changes() {
        let store = Arc::new(CountingStore {
            inner: MemoryJobStore::new(),
            updates: AtomicUsize::new(0),
        });
        let d = ToolDispatcher::new(store.clone(), Arc::new(HostMailSync::new(|| {})));
        d.dispatch(&invocation("1", SAVE_JOB_APPLICATION, save_args()));

        let same = d.dispatch(&invocation(
            "2",
            UPDATE_JOB_STATUS,
            json!({ "company": "Acme", "status": "Applied" }),
        ));
        assert_eq!(same.text, "I've updated your status for Acme to Applied.");
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);

        let missing = d.dispatch(&invocation(
            "3",
            UPDATE_JOB_STATUS,
            json!({ "company": "Globex", "status": "Offer" }),
        ));
        assert!(missing.text.starts_with("I couldn't find an application"));
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);

        let changed = d.dispatch(&invocation(
            "4",
            UPDATE_JOB_STATUS,
            json!({ "company": "acme", "status": "Offer" }),
        ));
        assert_eq!(changed.text, "I've updated your status for Acme to Offer.");
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
        assert_eq!(store.list().unwrap()[0].status, JobStatus::Offer);
    }

    #[test]
    fn test_bad_arguments_become_error_text() {
        let (d, store, _) = dispatcher();
        let missing = d.dispatch(&invocation("1", SAVE_JOB_APPLICATION, json!({ "role": "Engineer" })));
        assert_eq!(missing.text, "Error: missing required argument 'company'");

        let bad_status = d.dispatch(&invocation(
            "2",
            UPDATE_JOB_STATUS,
            json!({ "company": "Acme", "status": "Hired" }),
        ));
        assert!(bad_status.text.starts_with("Error: invalid value for 'status'"));

        let wrong_type = d.dispatch(&invocation("3", DELETE_JOB_APPLICATION, json!({ "company": 42 })));
        assert!(wrong_type.text.starts_with("Error: invalid value for 'company'"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tool() {
        let (d, _, _) = dispatcher();
        let result = d.dispatch(&invocation("x", "launch_rockets", json!({})));
        assert_eq!(result.id, "x");
        assert_eq!(result.text, "Error: unknown tool 'launch_rockets'");
    }

    #[test]
    fn test_sync_acknowledges_without_waiting() {
        let (d, _, syncs) = dispatcher();
        let result = d.dispatch(&invocation("s", SYNC_GMAIL_EMAILS, json!({})));
        assert_eq!(
            result.text,
            "Syncing your Gmail inbox now. I'll update your tracker with anything new."
        );
        assert_eq!(syncs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_reports_expired_session() {
        let store = Arc::new(MemoryJobStore::new());
        let mail = Arc::new(HostMailSync::new(|| {}));
        mail.set_status(true, true);
        let d = ToolDispatcher::new(store, mail);
        let result = d.dispatch(&invocation("s", SYNC_GMAIL_EMAILS, json!({})));
        assert_eq!(result.text, "Gmail session expired. Please reconnect in Settings.");
    }

    #[test]
    fn test_dispatch_all_keeps_ids_and_order() {
        let (d, _, _) = dispatcher();
        let results = d.dispatch_all(&[
            invocation("1", SAVE_JOB_APPLICATION, save_args()),
            invocation("2", LIST_JOB_APPLICATIONS, json!({})),
        ]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "1");
        assert_eq!(results[1].id, "2");
        assert!(results[1].text.contains("1. Acme - Engineer"));
    }

    #[test]
    fn test_declarations_cover_every_tool() {
        let decls = declarations();
        let names: Vec<&str> = decls
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                SAVE_JOB_APPLICATION,
                LIST_JOB_APPLICATIONS,
                UPDATE_JOB_STATUS,
                DELETE_JOB_APPLICATION,
                SYNC_GMAIL_EMAILS
            ]
        );
        assert_eq!(
            decls[2]["parameters"]["properties"]["status"]["enum"],
            json!(["Applied", "Interviewing", "Rejected", "Offer", "Ghosted"])
        );
    }

    #[test]
    fn test_invocation_parses_wire_shape() {
        let inv: ToolInvocation = serde_json::from_value(json!({
            "id": "fc-1",
            "name": "delete_job_application",
            "args": { "company": "Acme" }
        }))
        .unwrap();
        assert_eq!(inv.arguments["company"], "Acme");
    }
}
