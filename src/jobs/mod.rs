//! C9/C11 — durable job queue abstraction and the in-memory store backing
//! it. The persistent store itself (Firestore in the source) is out of
//! scope, so this module defines the trait the workers depend on and ships
//! exactly one concrete, non-persistent implementation.

mod memory;

pub use memory::InMemoryJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ActiveTask, JobStatus, PdfJob, ResearchJob, ResearchRequest};
use crate::error::JobStoreError;

/// Everything a worker or tool needs from the durable store. `claim_*`
/// operations are the only ones where two workers can race; the trait
/// leaves races to be resolved by an optimistic, first-writer-wins update.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue_research_job(&self, user_id: &str, session_id: &str, request: ResearchRequest) -> String;

    /// Claim up to `limit` queued research jobs whose `next_run_at` has
    /// elapsed, atomically flipping them to `running`, plus any `running`
    /// job whose previously granted lease has expired (a crashed worker
    /// never checkpointed past it). Each claimed job's `lease_deadline` is
    /// set to `now + lease_seconds`.
    async fn claim_research_jobs(&self, worker_id: &str, limit: usize, lease_seconds: i64) -> Vec<ResearchJob>;

    async fn update_research_job_progress(
        &self,
        job_id: &str,
        current_node: &str,
        progress_message: &str,
        status: JobStatus,
    ) -> Result<(), JobStoreError>;

    async fn update_research_job_checkpoint(
        &self,
        job_id: &str,
        graph_state: serde_json::Value,
        resume_from_node: Option<&str>,
    ) -> Result<(), JobStoreError>;

    async fn mark_research_job_completed(&self, job_id: &str, result_text: &str) -> Result<(), JobStoreError>;

    async fn mark_research_job_failed(
        &self,
        job_id: &str,
        error_message: &str,
        attempts: u32,
        resume_from_node: Option<&str>,
    ) -> Result<(), JobStoreError>;

    async fn requeue_research_job(
        &self,
        job_id: &str,
        attempts: u32,
        error_message: &str,
        delay_seconds: f64,
        resume_from_node: Option<&str>,
    ) -> Result<(), JobStoreError>;

    async fn get_research_job(&self, job_id: &str) -> Option<ResearchJob>;

    /// At most one job in `{queued, running}` for the session, preferring
    /// `running`, then most-recently-updated.
    async fn get_active_research_job_for_session(&self, session_id: &str) -> Option<ResearchJob>;

    async fn enqueue_pdf_job(&self, session_id: &str, source_url: &str, title: &str, reason: &str, partial_text_available: bool) -> String;

    /// Same reclaim-expired-lease semantics as [`JobStore::claim_research_jobs`].
    async fn claim_pdf_jobs(&self, worker_id: &str, limit: usize, lease_seconds: i64) -> Vec<PdfJob>;

    async fn mark_pdf_job_completed(&self, job_id: &str, characters: usize, page_count: usize) -> Result<(), JobStoreError>;

    async fn mark_pdf_job_failed(&self, job_id: &str, error_message: &str, attempts: u32) -> Result<(), JobStoreError>;

    async fn requeue_pdf_job(&self, job_id: &str, attempts: u32, error_message: &str, delay_seconds: f64) -> Result<(), JobStoreError>;

    // -- per-session active-task tracker (C11) --

    async fn set_session_active_task(&self, session_id: &str, task: Option<ActiveTask>);

    async fn get_session_active_task(&self, session_id: &str) -> Option<ActiveTask>;

    /// Returns `false` (never an error) when the session has no record, or
    /// when the active task id doesn't match `task_id`.
    async fn set_session_active_task_status_if_matches(&self, session_id: &str, task_id: &str, status: JobStatus) -> bool;

    async fn clear_session_active_task_if_matches(&self, session_id: &str, task_id: &str) -> bool;
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
