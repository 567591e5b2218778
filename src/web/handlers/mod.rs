pub mod analytics;
pub mod deliveries;
pub mod health;
pub mod webhook;
