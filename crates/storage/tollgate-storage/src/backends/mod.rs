//! Storage backend implementations

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

// Re-export backend implementations
#[cfg(feature = "memory")]
pub use memory::MemoryStorage;

#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;
