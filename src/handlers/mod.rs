pub mod config;
pub mod convert;
pub mod session;

pub use config::*;
pub use convert::{convert, convert_chunk};
pub use session::*;
