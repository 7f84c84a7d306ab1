//! # Pocket Vector Store
//!
//! Embedding-side half of the search core.
//!
//! ## Architecture
//!
//! ```text
//! text
//!  │
//!  ├──> EmbeddingPipeline (whitespace cleanup, length cap, timeout)
//!  │      └─> EmbeddingCache (single-flight, keyed by model + content)
//!  │             └─> Embedder (opaque inference: text -> vector)
//!  │
//!  └──> VectorIndex (cosine similarity, atomic rebuild swap)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use pocket_vector_store::{Embedder, HashingEmbedder, VectorIndex};
//!
//! #[tokio::main]
//! async fn main() -> pocket_vector_store::Result<()> {
//!     let embedder = HashingEmbedder::default();
//!     let index = VectorIndex::new(embedder.model_id(), embedder.dimension());
//!
//!     index.upsert("heap", &embedder.embed("fibonacci heap").await?)?;
//!     let hits = index.query(&embedder.embed("heap data structure").await?, 5)?;
//!     for (id, similarity) in hits {
//!         println!("{id}: {similarity:.3}");
//!     }
//!     Ok(())
//! }
//! ```

mod embedder;
mod error;
mod index;
mod pipeline;

pub use embedder::{
    cosine_similarity, Embedder, HashingEmbedder, SharedEmbedder, DEFAULT_DIMENSION,
    DEFAULT_MODEL_ID,
};
pub use error::{Result, VectorStoreError};
pub use index::{IndexSnapshot, IndexStats, RebuildReport, VectorIndex};
pub use pipeline::{prepare_text, EmbeddingPipeline, DEFAULT_MAX_CHARS};

pub use pocket_cache::Embedding;
