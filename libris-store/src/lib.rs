pub mod app_config;
pub mod circulation_repo;
pub mod database;
pub mod memory;
pub mod slot_repo;
pub mod user_repo;

pub use circulation_repo::PgCirculationRepository;
pub use database::DbClient;
pub use memory::MemoryStore;
pub use slot_repo::PgSlotRepository;
pub use user_repo::PgUserRepository;
