//! Inference service adapters

pub mod http;

pub use http::HttpInferenceClient;
