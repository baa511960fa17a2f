pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod licensing;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod plans;
pub mod signature;
pub mod token;
pub mod util;
