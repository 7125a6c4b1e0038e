//! # Recommendation Module
//!
//! Turns an autoplay [`Seed`] into a [`RecommendationRequest`] (up to five
//! seed tracks, artists and genres plus an optional target feature vector),
//! asks the metadata provider for recommendations and filters out tracks the
//! queue has already seen.

pub mod features;
pub mod request;
pub mod resolver;
pub mod seed;

pub use features::TargetFeatures;
pub use request::RecommendationRequest;
pub use resolver::Recommender;
pub use seed::{Seed, SeedItem, TextSeed};
