pub mod service;

pub use service::{engine, init_engine, Engine, StartScan};
