pub mod error;
pub mod process;
