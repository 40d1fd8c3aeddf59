//! Job application tracker.
//!
//! Records are kept newest first. The store is read at call time by every
//! tool invocation, never snapshotted, so a save followed by a list inside
//! one agent turn sees the new record.

pub mod file;

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use file::JsonFileJobStore;

/// Pipeline stage of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Applied,
    Interviewing,
    Rejected,
    Offer,
    Ghosted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Applied,
        JobStatus::Interviewing,
        JobStatus::Rejected,
        JobStatus::Offer,
        JobStatus::Ghosted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "Applied",
            Self::Interviewing => "Interviewing",
            Self::Rejected => "Rejected",
            Self::Offer => "Offer",
            Self::Ghosted => "Ghosted",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    /// Case-insensitive; the agent occasionally lowercases enum values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "expected one of {}",
                    Self::ALL.map(JobStatus::as_str).join(", ")
                )
            })
    }
}

/// One tracked application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobApplication {
    #[serde(default)]
    pub id: Option<String>,
    pub company: String,
    pub role: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date_applied: String,
    #[serde(default)]
    pub time_applied: String,
    #[serde(default)]
    pub status: JobStatus,
}

impl JobApplication {
    /// Whether `other` describes the same application.
    ///
    /// Company and role compare case-insensitively; date, time and status
    /// must match exactly. Source is not part of the key.
    pub fn same_application(&self, other: &JobApplication) -> bool {
        self.company.to_lowercase() == other.company.to_lowercase()
            && self.role.to_lowercase() == other.role.to_lowercase()
            && self.date_applied == other.date_applied
            && self.time_applied == other.time_applied
            && self.status == other.status
    }

    fn company_contains(&self, needle: &str) -> bool {
        self.company.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// What a save did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new record was prepended.
    Added(JobApplication),
    /// An existing record matched on the dedup key and was overwritten.
    Merged(JobApplication),
    /// The record's explicit id identified an existing entry.
    Updated(JobApplication),
}

impl SaveOutcome {
    pub fn record(&self) -> &JobApplication {
        match self {
            Self::Added(job) | Self::Merged(job) | Self::Updated(job) => job,
        }
    }

    /// Confirmation text returned to the agent.
    pub fn message(&self) -> String {
        match self {
            Self::Added(job) => format!(
                "Successfully added {} at {} to your tracker.",
                job.role, job.company
            ),
            Self::Merged(job) => format!(
                "Updated existing application for {} at {}.",
                job.role, job.company
            ),
            Self::Updated(job) => {
                format!("Job application for {} updated successfully.", job.company)
            }
        }
    }
}

/// Persistence for job applications.
pub trait JobStore: Send + Sync {
    /// Create or update a record, deduplicating as described on
    /// [`JobApplication::same_application`].
    fn save(&self, job: JobApplication) -> Result<SaveOutcome, StoreError>;

    /// Set the status of the first record whose company contains `company`.
    fn update_status(
        &self,
        company: &str,
        status: JobStatus,
    ) -> Result<Option<JobApplication>, StoreError>;

    /// Remove the record for `company` (exact match preferred, else the
    /// first substring match).
    fn delete(&self, company: &str) -> Result<Option<JobApplication>, StoreError>;

    /// Remove every record. Returns how many were removed.
    fn clear(&self) -> Result<usize, StoreError>;

    /// All records, newest first.
    fn list(&self) -> Result<Vec<JobApplication>, StoreError>;

    /// First record whose company contains `company`.
    fn find_by_company(&self, company: &str) -> Result<Option<JobApplication>, StoreError>;
}

// ── Shared record operations ────────────────────────────────────────

/// Milliseconds since the epoch plus a random suffix, so ids minted in a
/// tight loop never collide.
pub fn new_job_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", chrono::Utc::now().timestamp_millis(), &suffix[..9])
}

pub(crate) fn apply_save(jobs: &mut Vec<JobApplication>, mut job: JobApplication) -> SaveOutcome {
    if let Some(id) = job.id.clone() {
        if let Some(existing) = jobs.iter_mut().find(|j| j.id.as_deref() == Some(id.as_str())) {
            *existing = job.clone();
            return SaveOutcome::Updated(job);
        }
    }

    if let Some(existing) = jobs.iter_mut().find(|j| j.same_application(&job)) {
        job.id = existing.id.clone();
        *existing = job.clone();
        return SaveOutcome::Merged(job);
    }

    if job.id.is_none() {
        job.id = Some(new_job_id());
    }
    jobs.insert(0, job.clone());
    SaveOutcome::Added(job)
}

pub(crate) fn apply_update_status(
    jobs: &mut [JobApplication],
    company: &str,
    status: JobStatus,
) -> Option<JobApplication> {
    let job = jobs.iter_mut().find(|j| j.company_contains(company))?;
    job.status = status;
    Some(job.clone())
}

pub(crate) fn apply_delete(jobs: &mut Vec<JobApplication>, company: &str) -> Option<JobApplication> {
    let index = jobs
        .iter()
        .position(|j| j.company.eq_ignore_ascii_case(company.trim()))
        .or_else(|| jobs.iter().position(|j| j.company_contains(company)))?;
    Some(jobs.remove(index))
}

pub(crate) fn find_company(jobs: &[JobApplication], company: &str) -> Option<JobApplication> {
    jobs.iter().find(|j| j.company_contains(company)).cloned()
}

/// Numbered summary used by `list_job_applications` and the `list_jobs`
/// IPC command.
pub fn summarize(jobs: &[JobApplication]) -> String {
    if jobs.is_empty() {
        return "You haven't added any job applications yet.".to_string();
    }
    let lines: Vec<String> = jobs
        .iter()
        .enumerate()
        .map(|(i, j)| format!("{}. {} - {} ({})", i + 1, j.company, j.role, j.status))
        .collect();
    format!(
        "You have {} applications in your tracker:\n{}",
        jobs.len(),
        lines.join("\n")
    )
}

// ── In-memory store ─────────────────────────────────────────────────

/// Non-persistent store, used in tests and when no data dir is writable.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<JobApplication>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<JobApplication>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Vec<JobApplication>) -> T) -> Result<T, StoreError> {
        let mut jobs = self.jobs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut jobs))
    }
}

impl JobStore for MemoryJobStore {
    fn save(&self, job: JobApplication) -> Result<SaveOutcome, StoreError> {
        self.with(|jobs| apply_save(jobs, job))
    }

    fn update_status(
        &self,
        company: &str,
        status: JobStatus,
    ) -> Result<Option<JobApplication>, StoreError> {
        self.with(|jobs| apply_update_status(jobs, company, status))
    }

    fn delete(&self, company: &str) -> Result<Option<JobApplication>, StoreError> {
        self.with(|jobs| apply_delete(jobs, company))
    }

    fn clear(&self) -> Result<usize, StoreError> {
        self.with(|jobs| std::mem::take(jobs).len())
    }

    fn list(&self) -> Result<Vec<JobApplication>, StoreError> {
        self.with(|jobs| jobs.clone())
    }

    fn find_by_company(&self, company: &str) -> Result<Option<JobApplication>, StoreError> {
        self.with(|jobs| find_company(jobs, company))
    }
}
