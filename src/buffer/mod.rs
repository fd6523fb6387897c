mod buffer_pool_manager;
mod frame;
mod lru_replacer;

pub use buffer_pool_manager::*;
pub use frame::*;
pub use lru_replacer::*;
