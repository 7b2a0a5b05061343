pub mod assert;
pub mod collab;
pub mod log;
pub mod testutil;
pub mod types;
