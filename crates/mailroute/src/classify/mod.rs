//! Message classification.
//!
//! [`ClassificationService`] fronts a [`crate::ai::LanguageModel`] with a
//! content-hash cache, a process-wide [`RateLimiter`] and a bounded retry
//! loop for throttled calls.

pub mod cache;
pub mod category;
pub mod limiter;
pub mod service;

pub use cache::{content_hash, ClassificationCache};
pub use category::Category;
pub use limiter::{LimiterConfig, RateLimiter};
pub use service::{classification_prompt, ClassificationService, RetryPolicy};
