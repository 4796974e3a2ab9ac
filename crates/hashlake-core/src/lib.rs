pub mod clean;
pub mod config;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod flows;
pub mod model;
pub mod schema;
pub mod stage;
pub mod warehouse;
