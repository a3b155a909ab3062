// Domain layer - Motor telemetry models and rules
pub mod alarm;
pub mod control;
pub mod history;
pub mod telemetry;
pub mod time_range;
pub mod units;
pub mod user;
