pub mod config;
pub mod result;
pub mod upload;
pub mod validate;

pub use result::CommandResult;
