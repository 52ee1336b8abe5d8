pub mod alarms;
pub mod dispatch;
pub mod notices;
pub mod orders;
pub mod reminder;
