//! Provider reliability scoring

mod model;
mod service;

pub use model::ProviderScore;
pub use service::{
    composite_score, storno_rate, storno_rate_score, ProviderScoreService, AUTO_BLOCK_THRESHOLD,
    WEIGHT_CUSTOMER_SATISFACTION, WEIGHT_DELIVERY_DELAYS, WEIGHT_RESPONSE_TIME,
    WEIGHT_STORNO_RATE,
};
