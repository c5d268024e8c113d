pub mod config;
pub mod engine;
pub mod error;
pub mod indicator;
pub mod model;
pub mod runner;
pub mod series;
pub mod storage;

#[cfg(test)]
mod test_support;
