//! Session entities and the outward event stream

pub mod entities;
pub mod stream;
