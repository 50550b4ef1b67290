pub mod ingest;
pub mod registry;
pub mod stream;
pub mod types;
pub mod upstream;
pub mod window;
