//! Persistence layer: the [`ChatStore`] gateway with PostgreSQL and in-memory backends.

mod memory;
mod pool;
mod repositories;
mod store;

pub use memory::MemoryStore;
pub use pool::{create_pool, run_migrations, DbPool};
pub use repositories::*;
pub use store::ChatStore;
