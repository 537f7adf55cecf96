//! Deep-research orchestration service: a durable, resumable, four-stage
//! pipeline that turns a research idea into a multi-section document,
//! backed by a shared headless-browser scraper, PDF extraction, a
//! tool-calling reasoning agent, and a durable job queue.
//!
//! Module map (roughly data-flow order): [`config`] and [`domain`] are the
//! shared types everything else builds on; [`browser`]/[`scrape`]/[`pdf`]
//! are the fetch subsystem (C1-C3); [`model`] is the reasoning-agent seam
//! (C4's caller) with [`toolset`] and [`vector`] supplying its tools;
//! [`validators`]/[`repair`] are the post-generation repair loop (C5/C6);
//! [`pipeline`] is the four-stage DAG and checkpoint codec (C7/C8); and
//! [`jobs`] plus [`research_worker`] are the durable queue and the worker
//! that drives the pipeline from it (C9/C11), mirrored for PDF fallback
//! jobs by [`pdf::worker`] (C10).

pub mod browser;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod model;
pub mod pdf;
pub mod pipeline;
pub mod repair;
pub mod research_worker;
pub mod scrape;
pub mod toolset;
pub mod utils;
pub mod validators;
pub mod vector;

pub use config::{load_config, AppConfig};
pub use domain::{CompleteDocument, ContentSection, Outline, PipelineState, ResearchJob, ResearchRequest};
pub use error::CoreError;
pub use jobs::{InMemoryJobStore, JobStore};
pub use pipeline::{CheckpointSink, ProgressSink, ResearchPipeline};
pub use research_worker::{PipelineFactory, ResearchBackgroundWorker};
