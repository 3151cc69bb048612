//! HTTP request handlers.

pub mod images;
pub mod objects;
