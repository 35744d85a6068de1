pub mod backend;
pub mod config;
pub mod dates;
pub mod lifecycle;
pub mod models;
pub mod pipeline;
pub mod review;
pub mod sync;
pub mod terminal;
pub mod tracker;
