pub mod aggregate;
pub mod cache;
pub mod client;
pub mod crawler;
pub mod links;
pub mod snapshot;
pub mod timeline;
pub mod types;
pub mod views;
