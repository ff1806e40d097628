pub mod action;
pub mod address_based;
pub mod amount;
pub mod config;
pub mod error;
pub mod extension;
pub mod identity;
pub mod location_by_topic;
pub mod reducer;
pub mod request;
pub mod service;
pub mod signature;
pub mod store;
pub mod timestamp_by_location;
pub mod transaction_index;
pub mod utils;
