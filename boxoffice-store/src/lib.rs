pub mod app_config;
pub mod catalog_repo;
pub mod database;
pub mod memory;
pub mod redis_repo;
pub mod reservation_repo;

pub use catalog_repo::PgEventCatalog;
pub use database::DbClient;
pub use memory::{InMemoryEventCatalog, InMemoryReservationStore};
pub use redis_repo::RedisClient;
pub use reservation_repo::PgReservationStore;
