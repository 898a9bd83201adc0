pub mod env;
pub mod telemetry;
pub mod vision;
pub mod whop;
