//! C9 — research job queue consumer: claims queued jobs, drives each one
//! through [`crate::pipeline::ResearchPipeline::run_resumable`], and keeps
//! the job record and the session's [`crate::domain::ActiveTask`] coherent
//! with whatever the pipeline does. The pipeline itself, and the concrete
//! model providers/tools it runs with, are opaque to this module — a
//! [`PipelineFactory`] builds a fresh, job-appropriate pipeline per claim,
//! the same way the reference builds a fresh research graph per job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ResearchWorkerConfig;
use crate::domain::{ActiveTask, JobStatus, ResearchJob};
use crate::jobs::JobStore;
use crate::pipeline::{progress_message_for_node, CheckpointSink, ProgressSink, ResearchPipeline};

/// Builds the pipeline a single job should run with. Implementations own
/// wiring concrete model providers, the search provider, and the tool set —
/// none of which this module has an opinion about.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn build(&self, session_id: &str, request: &crate::domain::ResearchRequest) -> ResearchPipeline;
}

/// [`ProgressSink`]/[`CheckpointSink`] backed by one job's record in the
/// store. Both only ever log-and-continue on a write failure; the pipeline
/// contract is that a notification failure never aborts a run.
struct JobProgressSink {
    job_store: Arc<dyn JobStore>,
    job_id: String,
}

#[async_trait]
impl ProgressSink for JobProgressSink {
    async fn emit_progress(&self, node: &str) -> anyhow::Result<()> {
        let message = progress_message_for_node(node);
        self.job_store
            .update_research_job_progress(&self.job_id, node, &message, JobStatus::Running)
            .await?;
        Ok(())
    }
}

struct JobCheckpointSink {
    job_store: Arc<dyn JobStore>,
    job_id: String,
}

#[async_trait]
impl CheckpointSink for JobCheckpointSink {
    async fn emit_checkpoint(&self, _completed_node: &str, state: serde_json::Value, next_node: Option<&str>) -> anyhow::Result<()> {
        self.job_store.update_research_job_checkpoint(&self.job_id, state, next_node).await?;
        Ok(())
    }
}

pub struct ResearchBackgroundWorker {
    job_store: Arc<dyn JobStore>,
    pipeline_factory: Arc<dyn PipelineFactory>,
    worker_id: String,
    config: ResearchWorkerConfig,
}

impl ResearchBackgroundWorker {
    pub fn new(job_store: Arc<dyn JobStore>, pipeline_factory: Arc<dyn PipelineFactory>, config: ResearchWorkerConfig) -> Self {
        Self { job_store, pipeline_factory, worker_id: uuid::Uuid::new_v4().to_string(), config }
    }

    async fn process_job(&self, job: ResearchJob) {
        self.job_store
            .set_session_active_task(
                &job.session_id,
                Some(ActiveTask { current_node: Some(job.current_node.clone()), progress_message: Some(job.progress_message.clone()), ..ActiveTask::research(job.job_id.as_str(), JobStatus::Running) }),
            )
            .await;

        let pipeline = self.pipeline_factory.build(&job.session_id, &job.request).await;
        let progress_sink: Arc<dyn ProgressSink> = Arc::new(JobProgressSink { job_store: self.job_store.clone(), job_id: job.job_id.clone() });
        let checkpoint_sink: Arc<dyn CheckpointSink> = Arc::new(JobCheckpointSink { job_store: self.job_store.clone(), job_id: job.job_id.clone() });

        let result = pipeline
            .run_resumable(
                &job.request.research_idea,
                Some(&job.graph_state),
                job.resume_from_node.as_deref(),
                Some(progress_sink),
                Some(checkpoint_sink),
            )
            .await;

        match result {
            Ok(state) => {
                let result_text = state
                    .final_document
                    .map(|doc| doc.as_str())
                    .unwrap_or_else(|| "The research workflow completed, but no final document was returned.".to_string());

                if let Err(error) = self.job_store.mark_research_job_completed(&job.job_id, &result_text).await {
                    warn!("failed to mark research job '{}' completed: {error}", job.job_id);
                }
                self.job_store.clear_session_active_task_if_matches(&job.session_id, &job.job_id).await;
                info!("completed research job {} for session {}", job.job_id, job.session_id);
            }
            Err(error) => {
                let next_attempt = job.attempts + 1;
                if next_attempt >= self.config.max_retries {
                    if let Err(store_error) = self.job_store.mark_research_job_failed(&job.job_id, &error.to_string(), next_attempt, job.resume_from_node.as_deref()).await {
                        warn!("failed to mark research job '{}' failed: {store_error}", job.job_id);
                    }
                    self.job_store.clear_session_active_task_if_matches(&job.session_id, &job.job_id).await;
                    warn!("research job {} failed permanently after {next_attempt} attempts: {error}", job.job_id);
                    return;
                }

                let delay_seconds = (10.0 * 2f64.powi(job.attempts as i32)).min(180.0);
                if let Err(store_error) = self
                    .job_store
                    .requeue_research_job(&job.job_id, next_attempt, &error.to_string(), delay_seconds, job.resume_from_node.as_deref())
                    .await
                {
                    warn!("failed to requeue research job '{}': {store_error}", job.job_id);
                }
                self.job_store.set_session_active_task_status_if_matches(&job.session_id, &job.job_id, JobStatus::Queued).await;
                info!("requeued research job {} attempt {next_attempt} after error: {error}", job.job_id);
            }
        }
    }

    /// Poll loop: claim a batch, run every job in it as its own concurrent
    /// task (unlike the PDF worker, which processes its batch sequentially —
    /// research jobs are long-running enough that one slow job must not
    /// block its batch-mates), sleep when idle.
    pub async fn run_forever(self: &Arc<Self>) {
        loop {
            let jobs = self.job_store.claim_research_jobs(&self.worker_id, self.config.batch_size, self.config.lease_seconds).await;
            if jobs.is_empty() {
                tokio::time::sleep(std::time::Duration::from_secs_f64(self.config.poll_interval_seconds)).await;
                continue;
            }

            let mut handles = Vec::with_capacity(jobs.len());
            for job in jobs {
                let worker = self.clone();
                handles.push(tokio::spawn(async move { worker.process_job(job).await }));
            }
            for handle in handles {
                if let Err(error) = handle.await {
                    warn!("research job task panicked: {error}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResearchRequest;
    use crate::jobs::InMemoryJobStore;
    use crate::model::{ModelClient, Tool};
    use crate::config::{RepairConfig, SectionGenerationConfig};
    use crate::error::ModelError;
    use futures::stream::BoxStream;
    use std::sync::Mutex;

    struct ScriptedModel {
        text_replies: Mutex<Vec<String>>,
        json_replies: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate_text(&self, _s: &str, _p: &str) -> Result<String, ModelError> {
            let mut replies = self.text_replies.lock().unwrap();
            if replies.is_empty() {
                return Ok("summary".to_string());
            }
            let next = replies.remove(0);
            replies.push(next.clone());
            Ok(next)
        }
        async fn stream_text(&self, _s: &str, _p: &str) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError> {
            unimplemented!()
        }
        async fn generate_structured_json(&self, _s: &str, _p: &str, _h: &str) -> Result<serde_json::Value, ModelError> {
            let mut replies = self.json_replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ModelError::Provider("no more scripted replies".to_string()));
            }
            Ok(replies.remove(0))
        }
    }

    struct AlwaysLowBreadthFactory;

    #[async_trait]
    impl PipelineFactory for AlwaysLowBreadthFactory {
        async fn build(&self, _session_id: &str, _request: &ResearchRequest) -> ResearchPipeline {
            let outline_json = serde_json::json!({
                "document_title": "Title",
                "document_description": "Desc",
                "sections": [{"section_title": "Intro", "description": "d", "subsections": []}],
            });
            let perspectives_json = serde_json::json!({"experts": [{"name": "A", "profession": "Analyst", "role": "lead"}]});

            // `ReasoningAgent::plan_and_execute` resolves every turn through
            // `generate_structured_json`, so the outline stage needs one
            // scripted decision reply plus its final structured parse, and
            // the single expert section needs one `final_answer` decision.
            let outline_model: Arc<dyn ModelClient> = Arc::new(ScriptedModel {
                text_replies: Mutex::new(vec![]),
                json_replies: Mutex::new(vec![serde_json::json!({"final_answer": "notes"}), outline_json]),
            });
            let perspectives_model: Arc<dyn ModelClient> =
                Arc::new(ScriptedModel { text_replies: Mutex::new(vec![]), json_replies: Mutex::new(vec![perspectives_json]) });
            let expert_model: Arc<dyn ModelClient> = Arc::new(ScriptedModel {
                text_replies: Mutex::new(vec![]),
                json_replies: Mutex::new(vec![serde_json::json!({"final_answer": "Expert wrote this."})]),
            });
            let summary_model: Arc<dyn ModelClient> =
                Arc::new(ScriptedModel { text_replies: Mutex::new(vec!["summary".to_string()]), json_replies: Mutex::new(vec![]) });
            let final_model: Arc<dyn ModelClient> = Arc::new(ScriptedModel { text_replies: Mutex::new(vec![]), json_replies: Mutex::new(vec![]) });
            let repair_model: Arc<dyn ModelClient> = Arc::new(ScriptedModel { text_replies: Mutex::new(vec![]), json_replies: Mutex::new(vec![]) });

            let tools: Vec<Arc<dyn Tool>> = Vec::new();
            ResearchPipeline::new(
                outline_model,
                perspectives_model,
                vec![expert_model],
                summary_model,
                final_model,
                repair_model,
                tools,
                "low",
                SectionGenerationConfig::default(),
                RepairConfig::default(),
            )
        }
    }

    fn sample_request() -> ResearchRequest {
        ResearchRequest {
            research_idea: "idea".to_string(),
            model_tier: "pro".to_string(),
            breadth: "low".to_string(),
            depth: "medium".to_string(),
            document_length: "medium".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_job_completes_and_clears_the_active_task() {
        let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let job_id = job_store.enqueue_research_job("u1", "s1", sample_request()).await;
        job_store.set_session_active_task("s1", Some(ActiveTask::research(&job_id, JobStatus::Queued))).await;

        let worker = ResearchBackgroundWorker::new(job_store.clone(), Arc::new(AlwaysLowBreadthFactory), ResearchWorkerConfig::default());
        let claimed = job_store.claim_research_jobs("w1", 10, 300).await;
        assert_eq!(claimed.len(), 1);

        worker.process_job(claimed.into_iter().next().unwrap()).await;

        let job = job_store.get_research_job(&job_id).await.expect("job still exists");
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result_text.unwrap().contains("Title"));
        assert!(job_store.get_session_active_task("s1").await.is_none());
    }

    struct AlwaysFailingFactory;

    #[async_trait]
    impl PipelineFactory for AlwaysFailingFactory {
        async fn build(&self, _session_id: &str, _request: &ResearchRequest) -> ResearchPipeline {
            let failing_model: Arc<dyn ModelClient> = Arc::new(ScriptedModel { text_replies: Mutex::new(vec![]), json_replies: Mutex::new(vec![]) });
            ResearchPipeline::new(
                failing_model.clone(),
                failing_model.clone(),
                vec![failing_model.clone()],
                failing_model.clone(),
                failing_model.clone(),
                failing_model,
                Vec::new(),
                "low",
                SectionGenerationConfig::default(),
                RepairConfig::default(),
            )
        }
    }

    #[tokio::test]
    async fn first_failure_requeues_with_backoff_instead_of_failing_permanently() {
        let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let job_id = job_store.enqueue_research_job("u1", "s1", sample_request()).await;

        let worker = ResearchBackgroundWorker::new(job_store.clone(), Arc::new(AlwaysFailingFactory), ResearchWorkerConfig::default());
        let claimed = job_store.claim_research_jobs("w1", 10, 300).await;
        worker.process_job(claimed.into_iter().next().unwrap()).await;

        let job = job_store.get_research_job(&job_id).await.expect("job still exists");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert!(job.error.is_some());
    }
}
