pub mod forward;
pub mod gateway;
pub mod types;
