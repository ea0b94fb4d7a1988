pub mod opensearch;

pub use opensearch::OpenSearchStore;
