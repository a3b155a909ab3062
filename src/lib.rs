// Motor telemetry: MQTT ingest, alarm evaluation, control dispatch and dashboard pipeline
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
