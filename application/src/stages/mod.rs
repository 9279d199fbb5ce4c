//! Pipeline stages
//!
//! Each stage wraps the ports it needs and owns its timeout/retry and
//! fallback policy. The orchestrator sequences them.

pub mod guardrail;
pub mod reformulate;
pub mod retrieve;
pub(crate) mod support;
