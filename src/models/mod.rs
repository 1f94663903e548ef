pub mod client;
pub mod notification;
pub mod preference;
pub mod push;
pub mod schedule;
pub mod template;
