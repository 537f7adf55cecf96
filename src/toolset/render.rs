//! Shared rendering for the three tools' plain-text observations.

use crate::scrape::ScrapedDocument;

pub const NO_SCRAPEABLE_CONTENT: &str = "Search results were found, but no scrapeable page content was extracted.";

pub fn render_document(document: &ScrapedDocument, body: &str) -> String {
    format!("Title: {}\nContent:{}\nSource: {}", document.title, body, document.source)
}

/// One row per document whose (possibly summarized) body is non-blank,
/// joined the way the reference tool output separates results.
pub fn render_documents(documents: &[ScrapedDocument], bodies: &[Option<String>]) -> String {
    if documents.is_empty() {
        return NO_SCRAPEABLE_CONTENT.to_string();
    }

    let rows: Vec<String> = documents
        .iter()
        .zip(bodies.iter())
        .filter_map(|(document, body)| {
            let text = body.as_deref().unwrap_or(&document.content).trim();
            if text.is_empty() { None } else { Some(render_document(document, text)) }
        })
        .collect();

    if rows.is_empty() { NO_SCRAPEABLE_CONTENT.to_string() } else { rows.join("\n----------------\n") }
}
