pub mod graph_loader;
pub mod graph_builder;

// Re-export key types from the parser module
pub use graph_loader::GraphLoader;
pub use graph_builder::GraphBuilder;
