//! C4 — the tool layer: three `Tool` implementations a research stage's
//! reasoning agent can call (§4.4). Lives alongside, but independent of, the
//! `pipeline` module — nothing here knows about the DAG that calls it.

mod render;
mod search_provider;
mod url_search;
mod vector_search;
mod web_search;

pub use search_provider::{GoogleCustomSearchProvider, SearchProvider};
#[cfg(test)]
pub(crate) use search_provider::test_support as search_provider_test_support;
pub use url_search::UrlSearchTool;
pub use vector_search::VectorSearchTool;
pub use web_search::WebSearchTool;

/// Build the three-tool set a reasoning agent gets for one research job, in
/// the fixed order the agent's tool catalog lists them.
#[allow(clippy::too_many_arguments)]
pub fn build_tools(
    search: std::sync::Arc<dyn SearchProvider>,
    scrape: std::sync::Arc<crate::scrape::ScrapeService>,
    vector_store: std::sync::Arc<dyn crate::vector::VectorStore>,
    pdf: Option<std::sync::Arc<crate::pdf::PdfService>>,
    job_store: std::sync::Arc<dyn crate::jobs::JobStore>,
    summary_model: std::sync::Arc<dyn crate::model::ModelClient>,
    session_id: impl Into<String>,
    research_depth: impl Into<String>,
    config: crate::config::WebSearchConfig,
) -> Vec<std::sync::Arc<dyn crate::model::Tool>> {
    let session_id = session_id.into();
    let research_depth = research_depth.into();

    vec![
        std::sync::Arc::new(VectorSearchTool::new(vector_store.clone(), session_id.clone())),
        std::sync::Arc::new(UrlSearchTool::new(scrape.clone(), vector_store.clone(), pdf.clone(), job_store.clone(), session_id.clone(), &config)),
        std::sync::Arc::new(WebSearchTool::new(search, scrape, vector_store, pdf, job_store, summary_model, session_id, research_depth, config)),
    ]
}
