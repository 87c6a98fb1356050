pub mod api;
pub mod jwt;
pub mod progress;
