pub mod ast;
pub mod cache;
pub mod config;
pub mod error;
pub mod finding;
pub mod flow;
pub mod graph;
pub mod normalize;
pub mod report;
pub mod scorer;
