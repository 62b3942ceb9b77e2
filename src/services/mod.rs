pub mod logger;
pub mod session;
