pub mod devices;
pub mod notification;
