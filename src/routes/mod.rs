pub mod automation;
pub mod cron;
pub mod health;
pub mod public;
pub mod telegram;
