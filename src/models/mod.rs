pub mod alarm;
pub mod driver;
pub mod notification;
pub mod order;
pub mod user;
