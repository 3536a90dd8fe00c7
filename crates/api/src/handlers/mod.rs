//! Request handlers, grouped by resource.

pub mod jobs;
pub mod meta;
pub mod photos;
