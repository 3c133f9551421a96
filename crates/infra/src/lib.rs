//! Infrastructure layer: job queue, artifact storage, persistence adapters,
//! PDF rendering and the offer generation pipeline.

pub mod artifacts;
pub mod config;
pub mod jobs;
pub mod offers;
pub mod projects;
pub mod render;
pub mod schema;
