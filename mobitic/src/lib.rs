pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod pipeline;
pub mod render;
pub mod schema;

pub use config::categories::{Category, CategoryTaxonomy};
pub use config::settings::AppConfig;
pub use error::PipelineError;
pub use pipeline::Pipeline;
