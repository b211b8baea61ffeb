pub mod metadata;
pub mod queue;
pub mod schema;

pub use metadata::MetadataStore;
pub use queue::QueueStore;
pub use schema::{init_metadata_pool, init_queue_pool};
