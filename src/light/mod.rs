pub mod color;
pub mod command;
pub mod dispatch;
pub mod transport;
