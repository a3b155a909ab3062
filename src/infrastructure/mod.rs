// Infrastructure layer - External dependencies and adapters
pub mod api_client;
pub mod chunked_json;
pub mod config;
pub mod http_response;
pub mod influx_repository;
pub mod memory_repository;
pub mod metrics;
pub mod mqtt;
