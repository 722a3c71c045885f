pub mod index;
pub mod task;

pub use index::*;
pub use task::*;
