//! HTTP API: offer submission, status, download and the live outcome stream.

pub mod app;
