// src/lib.rs

//! Sitemap Monitor Library
//!
//! Discovers a website's sitemaps through its robots file, records the pages
//! they list and reports the pages that appeared since registration.

pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
