//! Guardrail verdicts and classifier-output parsing

pub mod parsing;
pub mod verdict;
