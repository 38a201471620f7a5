pub mod backend;
pub mod config;
pub mod datasets;
pub mod engine;
pub mod ml;
pub mod pipeline;
pub mod report;
pub mod timer;
pub mod validation;
