pub mod cache_set;
pub mod lru_cache;

pub use cache_set::CacheSet;
pub use lru_cache::LruCache;
