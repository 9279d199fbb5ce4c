//! Prompt templates for the pipeline stages

pub mod templates;
