//! Durable, append-only collections of embedded Documents.
//!
//! A [`Collection`] keeps every Document in memory alongside the L2 norm of its
//! vector and mirrors each one to storage as two JSON files in a zero-padded
//! sequence directory. Search is a brute-force cosine scan; the query API
//! hands out [`SearchHit`]s and never exposes the scan itself, so an ANN index
//! could replace it without touching callers.

use std::collections::HashSet;
use std::iter::FusedIterator;
use std::sync::Arc;

use futures::future::try_join_all;
use memloop_core::embedding::EmbeddingProvider;
use memloop_core::error::{MemoryError, ProviderError};
use memloop_core::storage::{self, Storage};
use memloop_core::token::Tokenizer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::vector::{cosine_with_norms, l2_norm, rank_descending};

const VECTOR_FILE: &str = "vector.json";
const DOCUMENT_FILE: &str = "document.json";

/// Per-document metadata. `index` maps a Document back to its source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub index: usize,
}

impl DocumentMetadata {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

/// An embedded text. Immutable once saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: DocumentMetadata,
}

#[derive(Serialize, Deserialize)]
struct VectorFile {
    id: String,
    vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct DocumentFile {
    id: String,
    text: String,
    metadata: DocumentMetadata,
}

struct Entry {
    document: Document,
    norm: f64,
}

/// A search query: raw text to embed, or a vector computed elsewhere.
#[derive(Debug, Clone, Copy)]
pub enum Query<'q> {
    Text(&'q str),
    Vector(&'q [f32]),
}

impl<'q> From<&'q str> for Query<'q> {
    fn from(text: &'q str) -> Self {
        Query::Text(text)
    }
}

impl<'q> From<&'q String> for Query<'q> {
    fn from(text: &'q String) -> Self {
        Query::Text(text)
    }
}

impl<'q> From<&'q [f32]> for Query<'q> {
    fn from(vector: &'q [f32]) -> Self {
        Query::Vector(vector)
    }
}

impl<'q> From<&'q Vec<f32>> for Query<'q> {
    fn from(vector: &'q Vec<f32>) -> Self {
        Query::Vector(vector)
    }
}

/// A ranked match. `position` is the Document's insertion position.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    pub document: &'a Document,
    pub score: f32,
    pub position: usize,
}

/// Named, append-only set of Documents persisted under a storage path.
pub struct Collection {
    path: String,
    storage: Arc<dyn Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    entries: Vec<Entry>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path)
            .field("storage", &self.storage.name())
            .field("embedder", &self.embedder.name())
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Collection {
    /// Open the collection stored at `path`, loading any persisted Documents.
    ///
    /// A sequence directory missing either of its files is a data error.
    pub async fn open(
        path: impl Into<String>,
        storage: Arc<dyn Storage>,
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self, MemoryError> {
        let path = path.into();
        let mut entries = Vec::new();

        for child in storage.list(&path).await? {
            let dir = storage::join(&path, &child);
            let vector: VectorFile = read_json(storage.as_ref(), &storage::join(&dir, VECTOR_FILE)).await?;
            let document: DocumentFile =
                read_json(storage.as_ref(), &storage::join(&dir, DOCUMENT_FILE)).await?;

            if vector.id != document.id {
                return Err(MemoryError::Corrupt {
                    path: dir,
                    reason: format!("vector id {} does not match document id {}", vector.id, document.id),
                });
            }

            let norm = l2_norm(&vector.vector);
            entries.push(Entry {
                document: Document {
                    id: document.id,
                    text: document.text,
                    vector: vector.vector,
                    metadata: document.metadata,
                },
                norm,
            });
        }

        debug!(collection = %path, count = entries.len(), "Collection opened");
        Ok(Self {
            path,
            storage,
            embedder,
            tokenizer,
            entries,
        })
    }

    /// Storage path of this collection.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The Document at insertion `position`.
    pub fn get(&self, position: usize) -> Option<&Document> {
        self.entries.get(position).map(|e| &e.document)
    }

    /// All Documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.entries.iter().map(|e| &e.document)
    }

    /// Embed and append `items`.
    ///
    /// Every item is checked against the embedder's per-input token ceiling
    /// before any request is made. Items are split into batches of the
    /// embedder's declared size; batches run concurrently and their vectors
    /// are reassembled in request order before anything is persisted.
    ///
    /// When `metadata` is `None`, each Document's index is its position in
    /// the collection. Returns the new Documents' ids.
    pub async fn add(
        &mut self,
        items: Vec<String>,
        metadata: Option<Vec<DocumentMetadata>>,
    ) -> Result<Vec<String>, MemoryError> {
        if let Some(meta) = &metadata {
            if meta.len() != items.len() {
                return Err(MemoryError::InvalidInput(format!(
                    "{} items but {} metadata entries",
                    items.len(),
                    meta.len()
                )));
            }
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        self.check_token_limits(&items)?;
        let vectors = self.embed_batched(&items).await?;

        let start = self.entries.len();
        let mut ids = Vec::with_capacity(items.len());
        for (offset, (text, vector)) in items.into_iter().zip(vectors).enumerate() {
            let position = start + offset;
            let meta = metadata
                .as_ref()
                .map(|m| m[offset])
                .unwrap_or(DocumentMetadata::new(position));
            let document = Document {
                id: uuid::Uuid::new_v4().to_string(),
                text,
                vector,
                metadata: meta,
            };
            self.persist(position, &document).await?;
            ids.push(document.id.clone());
            let norm = l2_norm(&document.vector);
            self.entries.push(Entry { document, norm });
        }

        debug!(collection = %self.path, count = ids.len(), total = self.entries.len(), "Documents added");
        Ok(ids)
    }

    /// Rank every Document against `query`, best first.
    ///
    /// `limit = None` returns everything. Ties keep insertion order.
    pub async fn search<'q>(
        &self,
        query: impl Into<Query<'q>>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit<'_>>, MemoryError> {
        let hits = self.iterative_search(query).await?;
        Ok(match limit {
            Some(n) => hits.take(n).collect(),
            None => hits.collect(),
        })
    }

    /// Like [`search`](Self::search), but never returns two hits with the
    /// same text. Each text keeps its best-scoring instance.
    pub async fn search_unique<'q>(
        &self,
        query: impl Into<Query<'q>>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit<'_>>, MemoryError> {
        let mut seen = HashSet::new();
        let unique = self
            .iterative_search(query)
            .await?
            .filter(move |hit| seen.insert(hit.document.text.clone()));
        Ok(match limit {
            Some(n) => unique.take(n).collect(),
            None => unique.collect(),
        })
    }

    /// The full ranking as a lazy, single-use sequence.
    pub async fn iterative_search<'q>(
        &self,
        query: impl Into<Query<'q>>,
    ) -> Result<RankedHits<'_>, MemoryError> {
        let ranking = match query.into() {
            Query::Vector(vector) => self.rank(vector),
            Query::Text(text) => {
                let vector = self.embed_query(text).await?;
                self.rank(&vector)
            }
        };
        Ok(RankedHits {
            collection: self,
            ranking: ranking.into_iter(),
        })
    }

    /// Embed `text` with this collection's embedder, e.g. to build a context
    /// vector once and query several collections with it.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        self.check_token_limits(std::slice::from_ref(&text.to_string()))?;
        let mut vectors = self.embedder.embed(vec![text.to_string()]).await?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => Err(ProviderError::InvalidResponse(
                "expected exactly one query embedding".into(),
            )
            .into()),
        }
    }

    /// Copy every Document into a new collection at `path`. Vectors are
    /// reused, so no embedding calls are made.
    pub async fn fork(&self, path: impl Into<String>) -> Result<Collection, MemoryError> {
        let mut fork = Collection {
            path: path.into(),
            storage: Arc::clone(&self.storage),
            embedder: Arc::clone(&self.embedder),
            tokenizer: Arc::clone(&self.tokenizer),
            entries: Vec::with_capacity(self.entries.len()),
        };
        if fork.path == self.path {
            return Err(MemoryError::InvalidInput(format!(
                "cannot fork collection {} onto itself",
                self.path
            )));
        }

        for (position, entry) in self.entries.iter().enumerate() {
            fork.persist(position, &entry.document).await?;
            fork.entries.push(Entry {
                document: entry.document.clone(),
                norm: entry.norm,
            });
        }
        info!(from = %self.path, to = %fork.path, count = fork.entries.len(), "Collection forked");
        Ok(fork)
    }

    /// Delete the collection and everything under its path.
    pub async fn delete(self) -> Result<bool, MemoryError> {
        let removed = self.storage.delete(&self.path).await?;
        info!(collection = %self.path, removed, "Collection deleted");
        Ok(removed)
    }

    fn rank(&self, query: &[f32]) -> Vec<(f32, usize)> {
        let query_norm = l2_norm(query);
        let mut scored: Vec<(f32, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                (
                    cosine_with_norms(&entry.document.vector, entry.norm, query, query_norm),
                    position,
                )
            })
            .collect();
        rank_descending(&mut scored);
        scored
    }

    fn check_token_limits(&self, items: &[String]) -> Result<(), MemoryError> {
        let limit = self.embedder.max_input_tokens();
        for (index, item) in items.iter().enumerate() {
            let tokens = self.tokenizer.count(item);
            if tokens > limit {
                return Err(MemoryError::InputTooLong { index, tokens, limit });
            }
        }
        Ok(())
    }

    async fn embed_batched(&self, items: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let batch_size = self.embedder.max_batch_size().max(1);
        let requests = items.chunks(batch_size).map(|batch| {
            let embedder = Arc::clone(&self.embedder);
            let batch = batch.to_vec();
            async move {
                let expected = batch.len();
                let vectors = embedder.embed(batch).await?;
                if vectors.len() != expected {
                    return Err(ProviderError::InvalidResponse(format!(
                        "requested {expected} embeddings, received {}",
                        vectors.len()
                    )));
                }
                Ok::<_, ProviderError>(vectors)
            }
        });

        debug!(
            collection = %self.path,
            items = items.len(),
            batches = items.len().div_ceil(batch_size),
            embedder = self.embedder.name(),
            "Embedding batches"
        );
        let batches = try_join_all(requests).await?;
        Ok(batches.into_iter().flatten().collect())
    }

    async fn persist(&self, position: usize, document: &Document) -> Result<(), MemoryError> {
        let dir = storage::join(&self.path, &format!("{position:08}"));
        let vector = VectorFile {
            id: document.id.clone(),
            vector: document.vector.clone(),
        };
        let doc = DocumentFile {
            id: document.id.clone(),
            text: document.text.clone(),
            metadata: document.metadata,
        };
        self.storage
            .write(&storage::join(&dir, VECTOR_FILE), &to_json(&vector, &dir)?)
            .await?;
        self.storage
            .write(&storage::join(&dir, DOCUMENT_FILE), &to_json(&doc, &dir)?)
            .await
    }
}

fn to_json<T: Serialize>(value: &T, path: &str) -> Result<String, MemoryError> {
    serde_json::to_string(value).map_err(|e| MemoryError::Corrupt {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    storage: &dyn Storage,
    path: &str,
) -> Result<T, MemoryError> {
    let raw = storage
        .read(path)
        .await?
        .ok_or_else(|| MemoryError::MissingData { path: path.to_string() })?;
    serde_json::from_str(&raw).map_err(|e| MemoryError::Corrupt {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Lazy ranking produced by [`Collection::iterative_search`].
///
/// Finite and single-use: once drained it stays empty.
pub struct RankedHits<'a> {
    collection: &'a Collection,
    ranking: std::vec::IntoIter<(f32, usize)>,
}

impl<'a> Iterator for RankedHits<'a> {
    type Item = SearchHit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (score, position) = self.ranking.next()?;
        Some(SearchHit {
            document: &self.collection.entries[position].document,
            score,
            position,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ranking.size_hint()
    }
}

impl ExactSizeIterator for RankedHits<'_> {}

impl FusedIterator for RankedHits<'_> {}
