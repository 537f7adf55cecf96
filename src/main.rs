//! Worker-process entrypoint: loads configuration, wires the browser,
//! scrape, PDF, model-provider, search-provider and vector-store
//! collaborators together, and runs the research and PDF background
//! workers (C9/C10) forever. Submitting jobs and polling their status is an
//! HTTP frontend's concern, out of scope for this binary (§1); it only
//! drains whatever an operator's `JobStore` backend hands it.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deep_research::config::AppConfig;
use deep_research::domain::ResearchRequest;
use deep_research::jobs::{InMemoryJobStore, JobStore};
use deep_research::model::{ModelClient, OpenAiCompatibleClient};
use deep_research::pdf::worker::PdfBackgroundWorker;
use deep_research::pdf::PdfService;
use deep_research::pipeline::ResearchPipeline;
use deep_research::research_worker::{PipelineFactory, ResearchBackgroundWorker};
use deep_research::toolset::{build_tools, GoogleCustomSearchProvider, SearchProvider};
use deep_research::vector::{InMemoryVectorStore, VectorStore};
use deep_research::{browser, load_config, scrape};

/// Builds a fresh [`ResearchPipeline`] per claimed job from the process-wide
/// collaborators, selecting model clients by the job's `model_tier` the way
/// the reference picks a vendor client per job.
struct AppPipelineFactory {
    config: AppConfig,
    search: Arc<dyn SearchProvider>,
    scrape: Arc<scrape::ScrapeService>,
    vector_store: Arc<dyn VectorStore>,
    pdf: Arc<PdfService>,
    job_store: Arc<dyn JobStore>,
}

#[async_trait]
impl PipelineFactory for AppPipelineFactory {
    async fn build(&self, session_id: &str, request: &ResearchRequest) -> ResearchPipeline {
        let outline_model = OpenAiCompatibleClient::for_tier(&self.config.model_provider, &request.model_tier);
        let perspectives_model = OpenAiCompatibleClient::for_tier(&self.config.model_provider, &request.model_tier);
        let final_content_model = OpenAiCompatibleClient::for_tier(&self.config.model_provider, &request.model_tier);
        let repair_model = OpenAiCompatibleClient::for_tier(&self.config.model_provider, &request.model_tier);
        let summary_model = OpenAiCompatibleClient::secondary(&self.config.model_provider);

        let expert_count = deep_research::domain::expert_count_for_breadth(&request.breadth);
        let expert_models: Vec<Arc<dyn ModelClient>> = (0..expert_count)
            .map(|i| {
                if i % 2 == 0 {
                    OpenAiCompatibleClient::for_tier(&self.config.model_provider, &request.model_tier)
                } else {
                    OpenAiCompatibleClient::secondary(&self.config.model_provider)
                }
            })
            .collect();

        let tools = build_tools(
            self.search.clone(),
            self.scrape.clone(),
            self.vector_store.clone(),
            Some(self.pdf.clone()),
            self.job_store.clone(),
            summary_model.clone(),
            session_id,
            request.depth.clone(),
            self.config.web_search.clone(),
        );

        ResearchPipeline::new(
            outline_model,
            perspectives_model,
            expert_models,
            summary_model,
            final_content_model,
            repair_model,
            tools,
            request.breadth.clone(),
            self.config.section_generation.clone(),
            self.config.repair.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config = load_config()?;

    let browser_manager = Arc::new(browser::BrowserManager::new(config.clone()));
    browser_manager.start().await?;

    let pdf_model = OpenAiCompatibleClient::for_tier(&config.model_provider, "mini");
    let pdf_service = Arc::new(PdfService::new(Some(pdf_model), config.pdf.clone()));
    let scrape_service = Arc::new(scrape::ScrapeService::new(browser_manager.clone(), config.clone(), Some(pdf_service.clone())));

    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::default());
    let search_provider: Arc<dyn SearchProvider> = Arc::new(GoogleCustomSearchProvider::new(&config.custom_search));

    let pipeline_factory = Arc::new(AppPipelineFactory {
        config: config.clone(),
        search: search_provider,
        scrape: scrape_service,
        vector_store: vector_store.clone(),
        pdf: pdf_service.clone(),
        job_store: job_store.clone(),
    });

    let research_worker = Arc::new(ResearchBackgroundWorker::new(job_store.clone(), pipeline_factory, config.research_worker.clone()));
    let pdf_worker = Arc::new(PdfBackgroundWorker::new(job_store.clone(), vector_store, pdf_service, config.pdf_worker.clone()));

    info!("deep-research worker started");

    tokio::select! {
        _ = research_worker.run_forever() => {},
        _ = pdf_worker.run_forever() => {},
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    browser_manager.shutdown().await?;
    Ok(())
}
