//! Vector retrieval and the chunk/recombine pipeline for memloop.

pub mod chunk;
pub mod collection;
pub mod file_backend;
pub mod in_memory;
pub mod recombine;
pub mod vector;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chunk::{Chunk, Chunker, ChunkerConfig, TextPiece};
pub use collection::{Collection, Document, DocumentMetadata, Query, RankedHits, SearchHit};
pub use file_backend::FileStorage;
pub use in_memory::InMemoryStorage;
pub use recombine::{
    ArrayOptions, WindowOptions, recombine_array, recombine_messages, recombine_windowed_text,
};
pub use vector::cosine_similarity;
