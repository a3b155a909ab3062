// Application layer - Use cases behind trait seams
pub mod alarm_monitor;
pub mod alarm_service;
pub mod auth_service;
pub mod control_service;
pub mod ingest_service;
pub mod pipeline;
pub mod telemetry_repository;
