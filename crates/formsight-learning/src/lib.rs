//! Formsight Learning
//!
//! Mines user corrections into per-field hints that later runs merge into
//! their configuration.
//!
//! - [`TemplateLearningService`] records corrections and regenerates a
//!   template's hints from its most recent sample
//! - [`RefreshQueue`] runs refreshes in the background, one at a time per
//!   template, coalescing triggers that pile up behind a running refresh
//! - [`inference`] holds the pure ranking, type voting, and pattern
//!   generalization used by a refresh

pub mod config;
pub mod inference;
pub mod queue;
pub mod service;
pub mod store;

pub use config::LearningConfig;
pub use queue::{RefreshQueue, RefreshStatus};
pub use service::TemplateLearningService;
pub use store::{
    CorrectionFilter, CorrectionStore, HintStore, InMemoryCorrectionStore, InMemoryHintStore,
};
