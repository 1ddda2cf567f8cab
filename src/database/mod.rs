pub mod redis_connection;
pub mod sources;

pub use redis_connection::RedisDatabase;
