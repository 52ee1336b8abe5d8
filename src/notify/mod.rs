pub mod devices;
pub mod dispatcher;
pub mod push;
pub mod queue;
