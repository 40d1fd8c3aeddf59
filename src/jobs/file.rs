//! JSON-file backed job store.
//!
//! The whole tracker lives in `<data_dir>/astra-jobs.json` as a JSON array.
//! The file is the only copy: every call re-reads it, so edits made by the
//! host or by another store instance are always visible. Mutations hold the
//! store lock across read, change and write, and the write is atomic (temp
//! file in the same directory, then rename), so readers never see a
//! half-written file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use super::{
    apply_delete, apply_save, apply_update_status, find_company, JobApplication, JobStatus,
    JobStore, SaveOutcome,
};
use crate::error::StoreError;

/// File name of the tracker inside the data directory.
pub const JOBS_FILE: &str = "astra-jobs.json";

pub struct JsonFileJobStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileJobStore {
    /// Open the tracker in `data_dir`. The file is created by the first
    /// mutation.
    ///
    /// A missing file reads as an empty tracker. A corrupt file is logged,
    /// also reads as empty, and is only overwritten by the next mutation.
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(JOBS_FILE);
        debug!(path = %path.display(), "Job store opened");
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.lock.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Read the current records, apply `f`, and persist when `f` reports a
    /// change.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<JobApplication>) -> (T, bool),
    ) -> Result<T, StoreError> {
        let _guard = self.guard()?;
        let mut jobs = read_jobs(&self.path);
        let (result, changed) = f(&mut jobs);
        if changed {
            write_jobs(&self.path, &jobs)?;
        }
        Ok(result)
    }
}

impl JobStore for JsonFileJobStore {
    fn save(&self, job: JobApplication) -> Result<SaveOutcome, StoreError> {
        self.mutate(|jobs| (apply_save(jobs, job), true))
    }

    fn update_status(
        &self,
        company: &str,
        status: JobStatus,
    ) -> Result<Option<JobApplication>, StoreError> {
        self.mutate(|jobs| {
            let updated = apply_update_status(jobs, company, status);
            let changed = updated.is_some();
            (updated, changed)
        })
    }

    fn delete(&self, company: &str) -> Result<Option<JobApplication>, StoreError> {
        self.mutate(|jobs| {
            let removed = apply_delete(jobs, company);
            let changed = removed.is_some();
            (removed, changed)
        })
    }

    fn clear(&self) -> Result<usize, StoreError> {
        self.mutate(|jobs| {
            let count = jobs.len();
            jobs.clear();
            (count, count > 0)
        })
    }

    fn list(&self) -> Result<Vec<JobApplication>, StoreError> {
        let _guard = self.guard()?;
        Ok(read_jobs(&self.path))
    }

    fn find_by_company(&self, company: &str) -> Result<Option<JobApplication>, StoreError> {
        let _guard = self.guard()?;
        Ok(find_company(&read_jobs(&self.path), company))
    }
}

fn read_jobs(path: &Path) -> Vec<JobApplication> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                Vec::new()
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            Vec::new()
        }
    }
}

/// Atomic write: write to a temp file in the same directory, then rename.
fn write_jobs(path: &Path, jobs: &[JobApplication]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".astra-jobs.{}.{}.tmp",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));
    let json = serde_json::to_string_pretty(jobs)?;
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
