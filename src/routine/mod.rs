pub mod acceptance;
pub mod shutdown;
