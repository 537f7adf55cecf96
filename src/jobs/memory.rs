//! Non-persistent [`JobStore`] backed by `dashmap`. Every invariant the
//! trait promises holds within a process; nothing survives a restart, which
//! is an explicit, documented trade consistent with the durable store being
//! out of scope.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use uuid::Uuid;

use super::{now, JobStore};
use crate::domain::{ActiveTask, JobStatus, PdfJob, ResearchJob, ResearchRequest};
use crate::error::JobStoreError;

pub struct InMemoryJobStore {
    research_jobs: DashMap<String, ResearchJob>,
    pdf_jobs: DashMap<String, PdfJob>,
    active_tasks: DashMap<String, ActiveTask>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self { research_jobs: DashMap::new(), pdf_jobs: DashMap::new(), active_tasks: DashMap::new() }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue_research_job(&self, user_id: &str, session_id: &str, request: ResearchRequest) -> String {
        let job_id = Uuid::new_v4().to_string();
        let now = now();
        let research_idea = request.research_idea.trim().to_string();
        let job = ResearchJob {
            job_id: job_id.clone(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            status: JobStatus::Queued,
            current_node: "queued".to_string(),
            progress_message: crate::pipeline::progress_message_for_node("queued"),
            resume_from_node: Some("generate_document_outline".to_string()),
            attempts: 0,
            worker_id: None,
            error: None,
            result_text: None,
            created_at: now,
            updated_at: now,
            next_run_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            lease_deadline: None,
            graph_state: serde_json::json!({ "research_idea": research_idea }),
            request,
        };
        self.research_jobs.insert(job_id.clone(), job);
        job_id
    }

    async fn claim_research_jobs(&self, worker_id: &str, limit: usize, lease_seconds: i64) -> Vec<ResearchJob> {
        if limit == 0 {
            return Vec::new();
        }
        let now = now();
        let mut claimed = Vec::with_capacity(limit);
        for mut entry in self.research_jobs.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            let job = entry.value_mut();
            let queued_and_due = job.status == JobStatus::Queued && job.next_run_at <= now;
            let lease_expired = job.status == JobStatus::Running && job.lease_deadline.is_some_and(|deadline| deadline <= now);
            if !queued_and_due && !lease_expired {
                continue;
            }
            job.status = JobStatus::Running;
            job.current_node = if job.current_node.is_empty() { "preparing".to_string() } else { job.current_node.clone() };
            job.progress_message = if job.progress_message.is_empty() {
                crate::pipeline::progress_message_for_node(&job.current_node)
            } else {
                job.progress_message.clone()
            };
            job.worker_id = Some(worker_id.to_string());
            job.started_at = Some(job.started_at.unwrap_or(now));
            job.updated_at = now;
            job.lease_deadline = Some(now + ChronoDuration::seconds(lease_seconds));
            claimed.push(job.clone());
        }
        claimed
    }

    async fn update_research_job_progress(
        &self,
        job_id: &str,
        current_node: &str,
        progress_message: &str,
        status: JobStatus,
    ) -> Result<(), JobStoreError> {
        let mut job = self.research_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        job.status = status;
        job.current_node = current_node.to_string();
        job.progress_message = progress_message.to_string();
        job.updated_at = now();
        Ok(())
    }

    async fn update_research_job_checkpoint(
        &self,
        job_id: &str,
        graph_state: serde_json::Value,
        resume_from_node: Option<&str>,
    ) -> Result<(), JobStoreError> {
        let mut job = self.research_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        job.graph_state = graph_state;
        job.resume_from_node = resume_from_node.map(str::to_string);
        job.updated_at = now();
        Ok(())
    }

    async fn mark_research_job_completed(&self, job_id: &str, result_text: &str) -> Result<(), JobStoreError> {
        let mut job = self.research_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let now = now();
        job.status = JobStatus::Completed;
        job.current_node = "completed".to_string();
        job.progress_message = crate::pipeline::progress_message_for_node("completed");
        job.resume_from_node = None;
        job.updated_at = now;
        job.completed_at = Some(now);
        job.worker_id = None;
        job.error = None;
        job.result_text = Some(result_text.to_string());
        Ok(())
    }

    async fn mark_research_job_failed(
        &self,
        job_id: &str,
        error_message: &str,
        attempts: u32,
        resume_from_node: Option<&str>,
    ) -> Result<(), JobStoreError> {
        let mut job = self.research_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let now = now();
        job.status = JobStatus::Failed;
        job.current_node = "failed".to_string();
        job.progress_message = crate::pipeline::progress_message_for_node("failed");
        job.updated_at = now;
        job.failed_at = Some(now);
        job.worker_id = None;
        job.attempts = attempts;
        job.error = Some(error_message.to_string());
        job.resume_from_node = resume_from_node.map(str::to_string);
        Ok(())
    }

    async fn requeue_research_job(
        &self,
        job_id: &str,
        attempts: u32,
        error_message: &str,
        delay_seconds: f64,
        resume_from_node: Option<&str>,
    ) -> Result<(), JobStoreError> {
        let mut job = self.research_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let now = now();
        job.status = JobStatus::Queued;
        job.current_node = "queued".to_string();
        job.progress_message = crate::pipeline::progress_message_for_node("queued");
        job.resume_from_node = resume_from_node.map(str::to_string);
        job.updated_at = now;
        job.next_run_at = now + ChronoDuration::milliseconds((delay_seconds.max(0.0) * 1000.0) as i64);
        job.worker_id = None;
        job.attempts = attempts;
        job.error = Some(error_message.to_string());
        Ok(())
    }

    async fn get_research_job(&self, job_id: &str) -> Option<ResearchJob> {
        self.research_jobs.get(job_id).map(|j| j.clone())
    }

    async fn get_active_research_job_for_session(&self, session_id: &str) -> Option<ResearchJob> {
        let mut best: Option<ResearchJob> = None;
        for entry in self.research_jobs.iter() {
            let job = entry.value();
            if job.session_id != session_id {
                continue;
            }
            if !matches!(job.status, JobStatus::Queued | JobStatus::Running) {
                continue;
            }
            let rank = (matches!(job.status, JobStatus::Running) as u8, job.updated_at);
            let better = match &best {
                None => true,
                Some(current) => {
                    let current_rank = (matches!(current.status, JobStatus::Running) as u8, current.updated_at);
                    rank > current_rank
                }
            };
            if better {
                best = Some(job.clone());
            }
        }
        best
    }

    async fn enqueue_pdf_job(&self, session_id: &str, source_url: &str, title: &str, reason: &str, partial_text_available: bool) -> String {
        let job_id = Uuid::new_v4().to_string();
        let now = now();
        let title = if title.trim().is_empty() { source_url.to_string() } else { title.to_string() };
        let job = PdfJob {
            job_id: job_id.clone(),
            session_id: session_id.to_string(),
            source_url: source_url.to_string(),
            title,
            status: JobStatus::Queued,
            attempts: 0,
            reason: if reason.is_empty() { "primary_timeout".to_string() } else { reason.to_string() },
            partial_text_available,
            created_at: now,
            updated_at: now,
            next_run_at: now,
            last_error: None,
            worker_id: None,
            lease_deadline: None,
            result_characters: None,
            result_page_count: None,
        };
        self.pdf_jobs.insert(job_id.clone(), job);
        job_id
    }

    async fn claim_pdf_jobs(&self, worker_id: &str, limit: usize, lease_seconds: i64) -> Vec<PdfJob> {
        if limit == 0 {
            return Vec::new();
        }
        let now = now();
        let mut claimed = Vec::with_capacity(limit);
        for mut entry in self.pdf_jobs.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            let job = entry.value_mut();
            let queued_and_due = job.status == JobStatus::Queued && job.next_run_at <= now;
            let lease_expired = job.status == JobStatus::Running && job.lease_deadline.is_some_and(|deadline| deadline <= now);
            if !queued_and_due && !lease_expired {
                continue;
            }
            job.status = JobStatus::Running;
            job.worker_id = Some(worker_id.to_string());
            job.updated_at = now;
            job.lease_deadline = Some(now + ChronoDuration::seconds(lease_seconds));
            claimed.push(job.clone());
        }
        claimed
    }

    async fn mark_pdf_job_completed(&self, job_id: &str, characters: usize, page_count: usize) -> Result<(), JobStoreError> {
        let mut job = self.pdf_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let now = now();
        job.status = JobStatus::Completed;
        job.updated_at = now;
        job.result_characters = Some(characters);
        job.result_page_count = Some(page_count);
        job.last_error = None;
        Ok(())
    }

    async fn mark_pdf_job_failed(&self, job_id: &str, error_message: &str, attempts: u32) -> Result<(), JobStoreError> {
        let mut job = self.pdf_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let now = now();
        job.status = JobStatus::Failed;
        job.updated_at = now;
        job.attempts = attempts;
        job.last_error = Some(error_message.to_string());
        Ok(())
    }

    async fn requeue_pdf_job(&self, job_id: &str, attempts: u32, error_message: &str, delay_seconds: f64) -> Result<(), JobStoreError> {
        let mut job = self.pdf_jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let now = now();
        job.status = JobStatus::Queued;
        job.updated_at = now;
        job.attempts = attempts;
        job.next_run_at = now + ChronoDuration::milliseconds((delay_seconds.max(0.0) * 1000.0) as i64);
        job.last_error = Some(error_message.to_string());
        job.worker_id = None;
        Ok(())
    }

    async fn set_session_active_task(&self, session_id: &str, task: Option<ActiveTask>) {
        match task {
            Some(task) => {
                self.active_tasks.insert(session_id.to_string(), task);
            }
            None => {
                self.active_tasks.remove(session_id);
            }
        }
    }

    async fn get_session_active_task(&self, session_id: &str) -> Option<ActiveTask> {
        self.active_tasks.get(session_id).map(|t| t.clone())
    }

    async fn set_session_active_task_status_if_matches(&self, session_id: &str, task_id: &str, status: JobStatus) -> bool {
        if !matches!(status, JobStatus::Queued | JobStatus::Running) {
            return false;
        }
        match self.active_tasks.get_mut(session_id) {
            Some(mut task) if task.id == task_id => {
                task.status = status;
                true
            }
            _ => false,
        }
    }

    async fn clear_session_active_task_if_matches(&self, session_id: &str, task_id: &str) -> bool {
        let should_clear = matches!(self.active_tasks.get(session_id), Some(task) if task.id == task_id);
        if should_clear {
            self.active_tasks.remove(session_id);
        }
        should_clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ResearchRequest {
        ResearchRequest {
            research_idea: "idea".to_string(),
            model_tier: "pro".to_string(),
            breadth: "medium".to_string(),
            depth: "high".to_string(),
            document_length: "high".to_string(),
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_flips_to_running() {
        let store = InMemoryJobStore::new();
        let job_id = store.enqueue_research_job("u1", "s1", sample_request()).await;
        let claimed = store.claim_research_jobs("worker-a", 10, 300).await;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].job_id, job_id);
        assert_eq!(claimed[0].status, JobStatus::Running);
        assert!(claimed[0].lease_deadline.is_some());

        // A second claim sees nothing new — already running and its lease
        // hasn't expired yet.
        let claimed_again = store.claim_research_jobs("worker-b", 10, 300).await;
        assert!(claimed_again.is_empty());
    }

    #[tokio::test]
    async fn active_task_clear_requires_matching_id() {
        let store = InMemoryJobStore::new();
        store.set_session_active_task("s1", Some(ActiveTask::research("job-1", JobStatus::Running))).await;

        assert!(!store.clear_session_active_task_if_matches("s1", "job-2").await);
        assert!(store.get_session_active_task("s1").await.is_some());

        assert!(store.clear_session_active_task_if_matches("s1", "job-1").await);
        assert!(store.get_session_active_task("s1").await.is_none());
    }

    #[tokio::test]
    async fn clear_on_missing_session_is_a_no_op_not_an_error() {
        let store = InMemoryJobStore::new();
        assert!(!store.clear_session_active_task_if_matches("missing", "job-1").await);
    }
}
