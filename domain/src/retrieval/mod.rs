//! Retrieved context entities

pub mod chunk;
