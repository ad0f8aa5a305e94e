pub mod memory;
pub mod pool;
pub mod postgres;
pub mod repositories;

pub use repositories::Repositories;
