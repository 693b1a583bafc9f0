pub mod bridge;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod gate;
pub mod model;
pub mod protocol;
pub mod source;
pub mod surface;
pub mod tick;
pub mod worker;
