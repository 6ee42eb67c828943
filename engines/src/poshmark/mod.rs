pub mod client;
pub mod engine;

pub use client::{HttpPoshmarkClient, PoshmarkClient};
pub use engine::PoshmarkLikeEngine;
