pub mod command;
pub mod journal;

pub use command::*;
pub use journal::*;
