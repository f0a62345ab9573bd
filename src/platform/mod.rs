pub mod cron;
pub mod daemon;
pub mod pool;
