pub mod core;
pub mod notifications;
pub mod pipeline;
pub mod warehouse;
pub mod yaml;
