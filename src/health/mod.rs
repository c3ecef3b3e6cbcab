// src/health/mod.rs
mod prober;

pub use prober::check_http;
