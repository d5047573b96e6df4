pub mod background;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod report;
pub mod routes;
pub mod runtime;
pub mod state;
pub mod store;
pub mod tenant;
