pub mod api;

pub use api::{Engine, EngineVu};
