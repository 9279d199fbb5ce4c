//! Pipeline state machine

pub mod state;
