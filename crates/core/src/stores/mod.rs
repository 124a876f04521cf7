pub mod disk;
pub mod memory;
pub mod qdrant;

pub use disk::DiskIndexService;
pub use memory::MemoryIndexService;
pub use qdrant::QdrantStore;
