pub mod error;
pub mod logger;
pub mod similarity;

pub use similarity::{cosine_distance, cosine_similarity};
