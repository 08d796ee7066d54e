pub mod qdrant;

pub use qdrant::QdrantIndex;
