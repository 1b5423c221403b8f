pub mod config;
pub mod db;
pub mod numeric;
pub mod observability;
pub mod types;
pub mod warehouse;
