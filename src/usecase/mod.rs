pub mod contracts;
pub mod dispatcher;
pub mod enqueue;
pub mod error;
pub mod jwt;
pub mod mail;
pub mod pipeline;
pub mod renderer;
pub mod scheduler;
pub mod selector;
