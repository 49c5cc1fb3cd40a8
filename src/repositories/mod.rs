//! Data access: Redis pub/sub.

pub mod redis_repo;

pub use redis_repo::RedisRepository;
