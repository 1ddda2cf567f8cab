pub mod model;
pub mod redis_repository;

pub use model::{Category, DynSourcesRepository, SourcesRecord, SourcesRepository, composite_key};
pub use redis_repository::RedisSourcesRepository;
