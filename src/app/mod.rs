pub mod dispatch;
pub mod inbox;
pub mod schedule;
pub mod status;
