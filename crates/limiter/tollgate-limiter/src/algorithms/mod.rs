//! Rate limiting algorithms

pub mod fixed_window;
pub mod leaky_bucket;
pub mod local;
pub mod sliding_window;
pub mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use local::LocalTokenBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;
