//! Self-hosted relay that resolves, streams and searches upstream videos
//! through an ordered list of fallback strategies.

pub mod config;
pub mod credentials;
pub mod error;
pub mod extractor;
pub mod formats;
pub mod image_proxy;
pub mod innertube;
pub mod media;
pub mod metadata;
pub mod mirrors;
pub mod model;
pub mod resolver;
pub mod routes;
pub mod search;
pub mod strategy;
