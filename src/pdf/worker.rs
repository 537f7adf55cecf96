//! C10 — background PDF worker: drains queued fallback jobs left behind
//! when the synchronous primary extraction path in [`super`] didn't produce
//! a complete result, using the slower but unbounded in-memory parser and
//! atomically replacing whatever partial text the session already has for
//! that source.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PdfWorkerConfig;
use crate::domain::PdfJob;
use crate::jobs::JobStore;
use crate::vector::VectorStore;

use super::PdfService;

pub struct PdfBackgroundWorker {
    job_store: Arc<dyn JobStore>,
    vector_store: Arc<dyn VectorStore>,
    pdf_service: Arc<PdfService>,
    worker_id: String,
    config: PdfWorkerConfig,
}

impl PdfBackgroundWorker {
    pub fn new(job_store: Arc<dyn JobStore>, vector_store: Arc<dyn VectorStore>, pdf_service: Arc<PdfService>, config: PdfWorkerConfig) -> Self {
        Self { job_store, vector_store, pdf_service, worker_id: Uuid::new_v4().to_string(), config }
    }

    /// One job: extract in memory, build the replacement document, swap it
    /// into the vector store, mark completed — or compute a capped
    /// exponential backoff and requeue, failing permanently once
    /// `max_retries` attempts have been spent.
    async fn process_job(&self, job: &PdfJob) {
        let title = if job.title.trim().is_empty() { job.source_url.clone() } else { job.title.clone() };

        let outcome = self.try_process(job, &title).await;
        match outcome {
            Ok((characters, page_count)) => {
                if let Err(error) = self.job_store.mark_pdf_job_completed(&job.job_id, characters, page_count).await {
                    warn!("failed to mark pdf job '{}' completed: {error}", job.job_id);
                }
                info!("completed PDF fallback job {} for {}", job.job_id, job.source_url);
            }
            Err(error_message) => {
                let next_attempt = job.attempts + 1;
                if next_attempt >= self.config.max_retries {
                    if let Err(error) = self.job_store.mark_pdf_job_failed(&job.job_id, &error_message, next_attempt).await {
                        warn!("failed to mark pdf job '{}' failed: {error}", job.job_id);
                    }
                    warn!("pdf job {} failed permanently after {next_attempt} attempts: {error_message}", job.job_id);
                    return;
                }

                let delay_seconds = (15.0 * 2f64.powi(next_attempt as i32 - 1)).min(300.0);
                if let Err(error) = self
                    .job_store
                    .requeue_pdf_job(&job.job_id, next_attempt, &error_message, delay_seconds)
                    .await
                {
                    warn!("failed to requeue pdf job '{}': {error}", job.job_id);
                }
                info!("requeued pdf job {} attempt {next_attempt} after error: {error_message}", job.job_id);
            }
        }
    }

    async fn try_process(&self, job: &PdfJob, title: &str) -> Result<(usize, usize), String> {
        let result = self.pdf_service.extract_in_memory(&job.source_url, Some(title)).await;
        if result.status != super::PdfExtractStatus::Complete || result.text.trim().is_empty() {
            return Err(result.error.unwrap_or_else(|| "fallback extraction returned empty text".to_string()));
        }

        let document = self
            .pdf_service
            .build_pdf_document(&job.source_url, title, &result.text, false, "in_memory_pdf_parser", None)
            .ok_or_else(|| "fallback extraction generated no document content".to_string())?;

        self.vector_store
            .replace_source_data(&job.session_id, &job.source_url, std::slice::from_ref(&document))
            .await
            .map_err(|e| e.to_string())?;

        Ok((result.text.len(), result.total_pages.unwrap_or(1)))
    }

    /// Poll loop: claim a batch, process it job-by-job (so one job's failure
    /// to claim/process doesn't starve its batch-mates), sleep when idle,
    /// and keep running through a batch-level error rather than exiting.
    pub async fn run_forever(&self) {
        loop {
            let jobs = self.job_store.claim_pdf_jobs(&self.worker_id, self.config.batch_size, self.config.lease_seconds).await;
            if jobs.is_empty() {
                tokio::time::sleep(Duration::from_secs_f64(self.config.poll_interval_seconds)).await;
                continue;
            }

            for job in &jobs {
                self.process_job(job).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobStore, JobStore};

    fn sample_config() -> PdfWorkerConfig {
        PdfWorkerConfig { poll_interval_seconds: 0.01, batch_size: 2, max_retries: 2, lease_seconds: 60 }
    }

    #[tokio::test]
    async fn claimed_jobs_carry_the_enqueued_fields_through_to_the_worker() {
        let job_store = InMemoryJobStore::default();
        let job_id = job_store.enqueue_pdf_job("s1", "https://example.com/a.pdf", "Doc", "scrape_timeout", false).await;
        let claimed = job_store.claim_pdf_jobs("w1", sample_config().batch_size, sample_config().lease_seconds).await;

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].job_id, job_id);
        assert_eq!(claimed[0].source_url, "https://example.com/a.pdf");
        assert_eq!(claimed[0].attempts, 0);
    }

    #[test]
    fn backoff_schedule_is_capped_at_five_minutes() {
        let delays: Vec<f64> = (1..=6).map(|attempt| (15.0 * 2f64.powi(attempt - 1)).min(300.0)).collect();
        assert_eq!(delays, vec![15.0, 30.0, 60.0, 120.0, 240.0, 300.0]);
    }
}
