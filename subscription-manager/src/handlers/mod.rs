pub mod health;
pub mod metrics;
pub mod pages;
pub mod partials;
pub mod subscriptions;
pub mod usage;
pub mod views;
