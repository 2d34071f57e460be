//! The context window manager.
//!
//! Owns the two raw logs of an agent context and one [`Collection`] per log.
//! New messages are indexed lazily: every request first catches up, chunking
//! and embedding whatever was appended since the last one. A compacted chat
//! is then rebuilt from retrieval, never from the raw log.
//!
//! Indexing progress is derived from the chunk records themselves, which are
//! synced from the collection after every write. A message counts as indexed
//! only once its final piece is stored. A failed run picks up at the first
//! piece that was not stored, so nothing is indexed twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use memloop_core::embedding::EmbeddingProvider;
use memloop_core::error::{MemoryError, Result};
use memloop_core::message::Message;
use memloop_core::storage::{self, Storage};
use memloop_core::token::{Tokenizer, messages_tokens};
use memloop_core::variable::{self, Content};
use memloop_memory::chunk::{
    self, CALL_KEY, Chunk, Chunker, ChunkerConfig, MESSAGE_KEY, OVERLAP_KEY, PIECE_KEY,
    PIECES_KEY, VARIABLE_KEY,
};
use memloop_memory::{Collection, SearchHit, recombine_messages};
use tracing::{debug, info, warn};

use super::budget::TokenLimits;
use super::log::{LogType, PinnedSet};
use crate::variables::{AgentVariables, render};

/// Inserted between two non-adjacent fragments of the same message.
const GAP_MARKER: &str = "\n[...]\n";

/// A budget-respecting view of the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactedChat {
    /// Recombined persistent messages. Immutable context.
    pub context: Vec<Message>,
    /// Recombined temporary messages. Prunable working memory.
    pub working: Vec<Message>,
}

impl CompactedChat {
    /// Context first, then working memory.
    pub fn messages(&self) -> Vec<Message> {
        self.context.iter().chain(&self.working).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.working.is_empty()
    }

    pub fn tokens(&self, tokenizer: &dyn Tokenizer) -> usize {
        messages_tokens(tokenizer, &self.context) + messages_tokens(tokenizer, &self.working)
    }
}

/// One raw log with its chunk index.
struct IndexedLog {
    kind: LogType,
    messages: Vec<Message>,
    collection: Collection,
    /// One record per collection position.
    chunks: Vec<Chunk>,
    pinned: PinnedSet,
    /// Message index → position of its first chunk, for function messages.
    function_chunks: BTreeMap<usize, usize>,
    last_complete: bool,
    /// First piece of the cursor message not yet stored.
    next_piece: usize,
}

impl IndexedLog {
    async fn open(
        kind: LogType,
        root: &str,
        storage: Arc<dyn Storage>,
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        let path = storage::join(root, kind.as_str());
        let collection = Collection::open(path, storage, embedder, Arc::clone(&tokenizer)).await?;
        let mut log = Self {
            kind,
            messages: Vec::new(),
            collection,
            chunks: Vec::new(),
            pinned: PinnedSet::new(),
            function_chunks: BTreeMap::new(),
            last_complete: true,
            next_piece: 0,
        };
        log.sync_records(tokenizer.as_ref())?;
        Ok(log)
    }

    /// Index of the first message not fully stored.
    fn cursor(&self) -> usize {
        match self.chunks.last() {
            None => 0,
            Some(last) if self.last_complete => last.message_index + 1,
            Some(last) => last.message_index,
        }
    }

    /// Build records for any collection positions that have none yet.
    fn sync_records(&mut self, tokenizer: &dyn Tokenizer) -> std::result::Result<(), MemoryError> {
        for position in self.chunks.len()..self.collection.len() {
            let Some(document) = self.collection.get(position) else {
                break;
            };
            let corrupt = |reason: String| MemoryError::Corrupt {
                path: format!("{}/{position:08}", self.collection.path()),
                reason,
            };
            let message: Message =
                serde_json::from_str(&document.text).map_err(|e| corrupt(e.to_string()))?;
            let message_index = message
                .metadata
                .get(MESSAGE_KEY)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| corrupt("chunk has no owning message index".into()))?
                as usize;

            let function = message.is_function_message() || chunk::is_call_piece(&message);
            if function && chunk::piece_number(&message) == 0 {
                self.function_chunks.entry(message_index).or_insert(position);
            }
            self.last_complete = chunk::is_last_piece(&message);
            self.next_piece = if self.last_complete {
                0
            } else {
                chunk::piece_number(&message) + 1
            };
            self.pinned.record(position);
            self.chunks
                .push(Chunk::new(message_index, position, document.text.clone(), tokenizer));
        }
        Ok(())
    }

    /// Chunk and store the next unindexed message.
    async fn index_next(&mut self, chunker: &Chunker, variables: &AgentVariables) -> Result<()> {
        let index = self.cursor();
        let message = &self.messages[index];

        let pieces = match message.content_ref() {
            Content::Variable(name) => match variables.get(name) {
                Some(value) => {
                    let mut expanded = message.clone();
                    expanded.content = render(value);
                    chunker.chunk_variable(&expanded, name)
                }
                None => {
                    warn!(log = %self.kind, variable = name, "Placeholder names no variable, indexing as text");
                    chunker.chunk(message)
                }
            },
            Content::Literal(_) => chunker.chunk(message),
        };

        if self.next_piece > 0 {
            debug!(log = %self.kind, message = index, from_piece = self.next_piece, "Resuming partly stored message");
        }
        let texts: Vec<String> = pieces
            .into_iter()
            .skip(self.next_piece)
            .map(|mut piece| {
                piece.metadata.insert(MESSAGE_KEY.into(), index.into());
                piece.to_json()
            })
            .collect();

        let added = self.collection.add(texts, None).await;
        self.sync_records(chunker.tokenizer())?;
        added?;
        Ok(())
    }

    async fn catch_up(&mut self, chunker: &Chunker, variables: &AgentVariables) -> Result<usize> {
        let mut indexed = 0;
        while self.cursor() < self.messages.len() {
            self.index_next(chunker, variables).await?;
            indexed += 1;
        }
        if indexed > 0 {
            debug!(log = %self.kind, indexed, chunks = self.chunks.len(), "Log indexed");
        }
        Ok(indexed)
    }

    /// Pick chunks for `limit` tokens and turn them back into messages.
    async fn recombine(&self, query: Option<&[f32]>, limit: usize) -> Result<Vec<Message>> {
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let token_counts: Vec<usize> = self.chunks.iter().map(|c| c.token_count).collect();
        let pinned = self.pinned.indices();

        let kept = match query {
            Some(vector) => {
                let hits = self.collection.iterative_search(vector).await?;
                recombine_messages(hits, &token_counts, &pinned, limit)
            }
            None => recombine_messages(std::iter::empty::<SearchHit<'_>>(), &token_counts, &pinned, limit),
        };

        let fragments = kept
            .iter()
            .map(|&i| self.chunks[i].message())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(log = %self.kind, kept = kept.len(), of = self.chunks.len(), limit, "Log recombined");
        Ok(merge_fragments(fragments))
    }

    async fn fork(&self, root: &str) -> Result<Self> {
        let collection = self
            .collection
            .fork(storage::join(root, self.kind.as_str()))
            .await?;
        Ok(Self {
            kind: self.kind,
            messages: self.messages.clone(),
            collection,
            chunks: self.chunks.clone(),
            pinned: self.pinned.clone(),
            function_chunks: self.function_chunks.clone(),
            last_complete: self.last_complete,
            next_piece: self.next_piece,
        })
    }
}

fn owner(message: &Message) -> (Option<u64>, Option<&str>) {
    (
        message.metadata.get(MESSAGE_KEY).and_then(|v| v.as_u64()),
        message.metadata_str(VARIABLE_KEY),
    )
}

/// Join runs of consecutive fragments from the same message back into one
/// message. Variable fragments get a trailer naming the variable.
fn merge_fragments(fragments: Vec<Message>) -> Vec<Message> {
    let mut merged = Vec::new();
    let mut group: Vec<Message> = Vec::new();

    for fragment in fragments {
        let continues = group
            .first()
            .is_some_and(|first| owner(first).0.is_some() && owner(first) == owner(&fragment));
        if !continues && !group.is_empty() {
            merged.push(join_group(std::mem::take(&mut group)));
        }
        group.push(fragment);
    }
    if !group.is_empty() {
        merged.push(join_group(group));
    }
    merged
}

fn join_group(group: Vec<Message>) -> Message {
    let variable = group[0].metadata_str(VARIABLE_KEY).map(str::to_string);

    let mut text = String::new();
    let mut previous: Option<usize> = None;
    for fragment in &group {
        let piece = chunk::piece_of(fragment);
        let number = chunk::piece_number(fragment);
        match previous {
            Some(p) if p + 1 == number => text.push_str(piece.fresh()),
            Some(_) => {
                text.push_str(GAP_MARKER);
                text.push_str(&piece.text);
            }
            None => text.push_str(&piece.text),
        }
        previous = Some(number);
    }

    if let Some(name) = &variable {
        text.push_str(&format!(
            "\n[End of excerpt from variable \"{name}\". Pass {} as an argument to use the full value.]",
            variable::placeholder(name)
        ));
    }

    let mut message = group.into_iter().next().unwrap_or_else(|| Message::system(""));
    message.content = text;
    for key in [MESSAGE_KEY, PIECE_KEY, PIECES_KEY, OVERLAP_KEY, VARIABLE_KEY, CALL_KEY] {
        message.metadata.remove(key);
    }
    message
}

/// Raw logs, chunk indices and retrieval for one agent context.
pub struct ContextManager {
    root: String,
    chunker: Chunker,
    persistent: IndexedLog,
    temporary: IndexedLog,
}

impl ContextManager {
    /// Open the manager rooted at storage path `root`, reloading both
    /// collections. Raw logs start empty; see [`restore`](Self::restore).
    pub async fn open(
        root: impl Into<String>,
        storage: Arc<dyn Storage>,
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        chunker: ChunkerConfig,
    ) -> Result<Self> {
        let root = root.into();
        let chunker = Chunker::new(chunker, Arc::clone(&tokenizer))?;
        let persistent = IndexedLog::open(
            LogType::Persistent,
            &root,
            Arc::clone(&storage),
            Arc::clone(&embedder),
            Arc::clone(&tokenizer),
        )
        .await?;
        let temporary =
            IndexedLog::open(LogType::Temporary, &root, storage, embedder, tokenizer).await?;

        info!(
            root = %root,
            persistent_chunks = persistent.chunks.len(),
            temporary_chunks = temporary.chunks.len(),
            "Context manager opened"
        );
        Ok(Self {
            root,
            chunker,
            persistent,
            temporary,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    fn log(&self, kind: LogType) -> &IndexedLog {
        match kind {
            LogType::Persistent => &self.persistent,
            LogType::Temporary => &self.temporary,
        }
    }

    /// Append to a raw log. Indexing happens on the next catch-up.
    pub fn append(&mut self, kind: LogType, message: Message) {
        match kind {
            LogType::Persistent => self.persistent.messages.push(message),
            LogType::Temporary => self.temporary.messages.push(message),
        }
    }

    /// The raw log. Never send this to a completion transport.
    pub fn messages(&self, kind: LogType) -> &[Message] {
        &self.log(kind).messages
    }

    pub fn chunks(&self, kind: LogType) -> &[Chunk] {
        &self.log(kind).chunks
    }

    /// Pinned chunk indices, most recent first.
    pub fn pinned(&self, kind: LogType) -> Vec<usize> {
        self.log(kind).pinned.indices()
    }

    /// Messages appended but not yet indexed.
    pub fn pending(&self, kind: LogType) -> usize {
        let log = self.log(kind);
        log.messages.len().saturating_sub(log.cursor())
    }

    /// First chunk of the function call or result at `message_index`.
    pub fn function_chunk(&self, kind: LogType, message_index: usize) -> Option<&Chunk> {
        let log = self.log(kind);
        log.function_chunks
            .get(&message_index)
            .and_then(|&position| log.chunks.get(position))
    }

    /// Replace a raw log, e.g. from a saved snapshot.
    pub fn restore(&mut self, kind: LogType, messages: Vec<Message>) {
        let log = match kind {
            LogType::Persistent => &mut self.persistent,
            LogType::Temporary => &mut self.temporary,
        };
        if log.cursor() > messages.len() {
            warn!(
                log = %kind,
                indexed = log.cursor(),
                restored = messages.len(),
                "Restored log is shorter than its index"
            );
        }
        log.messages = messages;
    }

    /// Index everything appended since the last catch-up.
    pub async fn catch_up(&mut self, variables: &AgentVariables) -> Result<usize> {
        let persistent = self.persistent.catch_up(&self.chunker, variables).await?;
        let temporary = self.temporary.catch_up(&self.chunker, variables).await?;
        Ok(persistent + temporary)
    }

    /// Catch up, then rebuild a compacted chat around `context`.
    ///
    /// `context` describes where the conversation currently is; it is
    /// embedded once and used as the query for both logs. An empty context
    /// keeps only pinned chunks.
    pub async fn contextualize(
        &mut self,
        context: &str,
        limits: &TokenLimits,
        variables: &AgentVariables,
    ) -> Result<CompactedChat> {
        self.catch_up(variables).await?;
        if self.persistent.chunks.is_empty() && self.temporary.chunks.is_empty() {
            return Ok(CompactedChat::default());
        }

        let vector = if context.trim().is_empty() {
            None
        } else {
            Some(self.temporary.collection.embed_query(context).await?)
        };
        let query = vector.as_deref();

        let chat = CompactedChat {
            context: self.persistent.recombine(query, limits.persistent).await?,
            working: self.temporary.recombine(query, limits.temporary).await?,
        };
        debug!(
            root = %self.root,
            context = chat.context.len(),
            working = chat.working.len(),
            "Chat compacted"
        );
        Ok(chat)
    }

    /// Copy logs and collections under a new root for a delegated sub-task.
    pub async fn fork(&self, root: impl Into<String>) -> Result<ContextManager> {
        let root = root.into();
        let persistent = self.persistent.fork(&root).await?;
        let temporary = self.temporary.fork(&root).await?;
        info!(from = %self.root, to = %root, "Context forked");
        Ok(ContextManager {
            root,
            chunker: self.chunker.clone(),
            persistent,
            temporary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memloop_core::error::{Error, ProviderError};
    use memloop_core::token::HeuristicTokenizer;
    use memloop_memory::InMemoryStorage;
    use memloop_memory::testing::VocabularyEmbedder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ROOT: &str = "ctx";

    fn small_chunks() -> ChunkerConfig {
        ChunkerConfig {
            token_ceiling: 64,
            chunk_chars: 200,
            overlap_chars: 20,
        }
    }

    async fn manager_on(
        storage: Arc<dyn Storage>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> ContextManager {
        ContextManager::open(ROOT, storage, embedder, Arc::new(HeuristicTokenizer), small_chunks())
            .await
            .unwrap()
    }

    async fn manager() -> ContextManager {
        manager_on(
            Arc::new(InMemoryStorage::new()),
            Arc::new(VocabularyEmbedder::new()),
        )
        .await
    }

    fn roomy() -> TokenLimits {
        TokenLimits::new(10_000, 10_000)
    }

    #[tokio::test]
    async fn catch_up_indexes_each_log() {
        let mut m = manager().await;
        let vars = AgentVariables::new();
        m.append(LogType::Persistent, Message::system("Goal: find the answer"));
        m.append(LogType::Temporary, Message::user("hello there"));
        m.append(LogType::Temporary, Message::assistant("hi"));
        assert_eq!(m.pending(LogType::Temporary), 2);

        assert_eq!(m.catch_up(&vars).await.unwrap(), 3);
        assert_eq!(m.pending(LogType::Temporary), 0);
        assert_eq!(m.chunks(LogType::Persistent).len(), 1);
        assert_eq!(m.chunks(LogType::Temporary).len(), 2);
        assert_eq!(m.pinned(LogType::Temporary), vec![1, 0]);
        assert_eq!(m.catch_up(&vars).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn chunk_indices_are_monotonic() {
        let mut m = manager().await;
        let vars = AgentVariables::new();
        m.append(LogType::Temporary, Message::user("x".repeat(900)));
        m.append(LogType::Temporary, Message::user("short"));
        m.catch_up(&vars).await.unwrap();

        let chunks = m.chunks(LogType::Temporary);
        assert!(chunks.len() > 2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
        assert!(chunks.windows(2).all(|w| w[0].message_index <= w[1].message_index));
        assert_eq!(chunks.last().unwrap().message_index, 1);
    }

    #[tokio::test]
    async fn variable_content_is_chunked_from_its_value() {
        let mut m = manager().await;
        let mut vars = AgentVariables::new();
        let value = "lorem ipsum ".repeat(60);
        let name = vars.store("fetch", json!(value.clone()));
        m.append(LogType::Temporary, Message::function_call("", "fetch", "{}"));
        m.append(
            LogType::Temporary,
            Message::function_result("fetch", variable::placeholder(&name)),
        );

        let chat = m.contextualize("lorem", &roomy(), &vars).await.unwrap();
        let result = chat
            .working
            .iter()
            .find(|msg| msg.name.as_deref() == Some("fetch"))
            .unwrap();
        assert!(result.content.starts_with(&value));
        assert!(result.content.contains("${fetch_1}"));
        assert!(result.metadata.is_empty());

        let chunks = m.chunks(LogType::Temporary);
        assert!(chunks.len() > 2);
        let first_piece = chunks[1].message().unwrap();
        assert!(first_piece.content.starts_with("Variable \"fetch_1\" chunk #1\n"));
    }

    #[tokio::test]
    async fn unknown_placeholder_is_indexed_literally() {
        let mut m = manager().await;
        m.append(LogType::Temporary, Message::user("${missing_1}"));
        m.catch_up(&AgentVariables::new()).await.unwrap();
        let stored = m.chunks(LogType::Temporary)[0].message().unwrap();
        assert_eq!(stored.content, "${missing_1}");
    }

    #[tokio::test]
    async fn function_chunks_are_cached() {
        let mut m = manager().await;
        let vars = AgentVariables::new();
        m.append(LogType::Temporary, Message::user("question"));
        m.append(LogType::Temporary, Message::function_call("", "search", "{}"));
        m.append(LogType::Temporary, Message::function_result("search", "answer"));
        m.catch_up(&vars).await.unwrap();

        assert!(m.function_chunk(LogType::Temporary, 0).is_none());
        assert_eq!(m.function_chunk(LogType::Temporary, 1).unwrap().index, 1);
        let result = m.function_chunk(LogType::Temporary, 2).unwrap().message().unwrap();
        assert_eq!(result.content, "answer");
    }

    #[tokio::test]
    async fn call_with_oversized_arguments_is_indexed() {
        let mut m = manager().await;
        let vars = AgentVariables::new();
        let arguments = format!(r#"{{"text":"{}"}}"#, "word ".repeat(8_000));
        m.append(LogType::Temporary, Message::function_call("", "echo", arguments.clone()));

        m.catch_up(&vars).await.unwrap();
        assert_eq!(m.pending(LogType::Temporary), 0);
        assert!(m.chunks(LogType::Temporary).iter().all(|c| c.token_count < 200));
        assert_eq!(m.function_chunk(LogType::Temporary, 0).unwrap().index, 0);

        let limits = TokenLimits::new(0, 100_000);
        let chat = m.contextualize("word", &limits, &vars).await.unwrap();
        assert_eq!(chat.working.len(), 1);
        assert_eq!(chat.working[0].content, format!("echo({arguments})"));
        assert!(chat.working[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn compacted_chat_respects_limits_and_keeps_pins() {
        let mut m = manager().await;
        let vars = AgentVariables::new();
        for i in 0..20 {
            m.append(LogType::Temporary, Message::user(format!("note number {i} about apples")));
        }
        m.catch_up(&vars).await.unwrap();
        let per_chunk = m.chunks(LogType::Temporary)[0].token_count;

        let limits = TokenLimits::new(0, per_chunk * 4);
        let chat = m.contextualize("apples", &limits, &vars).await.unwrap();
        assert!(chat.working.len() <= 4);
        assert!(chat.context.is_empty());
        let contents: Vec<&str> = chat.working.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"note number 19 about apples"));
        assert!(contents.contains(&"note number 18 about apples"));
    }

    #[tokio::test]
    async fn compacted_chat_is_in_conversation_order() {
        let mut m = manager().await;
        let vars = AgentVariables::new();
        for text in ["alpha one", "beta two", "gamma three", "delta four"] {
            m.append(LogType::Temporary, Message::user(text));
        }
        let chat = m.contextualize("beta", &roomy(), &vars).await.unwrap();
        let contents: Vec<&str> = chat.working.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["alpha one", "beta two", "gamma three", "delta four"]);
    }

    #[tokio::test]
    async fn empty_context_keeps_only_pins() {
        let mut m = manager().await;
        let vars = AgentVariables::new();
        for text in ["a", "b", "c"] {
            m.append(LogType::Temporary, Message::user(text));
        }
        let chat = m.contextualize("", &roomy(), &vars).await.unwrap();
        let contents: Vec<&str> = chat.working.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn reopen_resumes_from_stored_chunks() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(VocabularyEmbedder::new());
        let vars = AgentVariables::new();

        let mut first = manager_on(storage.clone(), embedder.clone()).await;
        first.append(LogType::Temporary, Message::user("one"));
        first.append(LogType::Temporary, Message::user("two"));
        first.catch_up(&vars).await.unwrap();
        let log = first.messages(LogType::Temporary).to_vec();

        let mut second = manager_on(storage, embedder).await;
        assert_eq!(second.chunks(LogType::Temporary), first.chunks(LogType::Temporary));
        second.restore(LogType::Temporary, log);
        assert_eq!(second.pending(LogType::Temporary), 0);
        second.append(LogType::Temporary, Message::user("three"));
        assert_eq!(second.catch_up(&vars).await.unwrap(), 1);
        assert_eq!(second.chunks(LogType::Temporary).len(), 3);
    }

    /// Fails the Nth embed call once, then delegates.
    struct FailingOnce {
        inner: VocabularyEmbedder,
        fail_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingOnce {
        fn name(&self) -> &str {
            "failing_once"
        }
        fn max_input_tokens(&self) -> usize {
            self.inner.max_input_tokens()
        }
        fn max_batch_size(&self) -> usize {
            self.inner.max_batch_size()
        }
        async fn embed(
            &self,
            inputs: Vec<String>,
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(ProviderError::Network("connection reset".into()));
            }
            self.inner.embed(inputs).await
        }
    }

    #[tokio::test]
    async fn failed_catch_up_resumes_without_loss() {
        let embedder = Arc::new(FailingOnce {
            inner: VocabularyEmbedder::new(),
            fail_on: 1,
            calls: AtomicUsize::new(0),
        });
        let mut m = manager_on(Arc::new(InMemoryStorage::new()), embedder).await;
        let vars = AgentVariables::new();
        for text in ["first", "second", "third"] {
            m.append(LogType::Temporary, Message::user(text));
        }

        let err = m.catch_up(&vars).await.unwrap_err();
        assert!(matches!(err, Error::Memory(MemoryError::Embedding(_))));
        assert_eq!(m.pending(LogType::Temporary), 2);

        assert_eq!(m.catch_up(&vars).await.unwrap(), 2);
        let owners: Vec<usize> = m
            .chunks(LogType::Temporary)
            .iter()
            .map(|c| c.message_index)
            .collect();
        assert_eq!(owners, vec![0, 1, 2]);
    }

    /// In-memory storage that fails one chosen write.
    struct FailingWrite {
        inner: InMemoryStorage,
        fail_on: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Storage for FailingWrite {
        fn name(&self) -> &str {
            "failing_write"
        }
        async fn read(&self, path: &str) -> std::result::Result<Option<String>, MemoryError> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &str, contents: &str) -> std::result::Result<(), MemoryError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(MemoryError::Storage("disk full".into()));
            }
            self.inner.write(path, contents).await
        }
        async fn list(&self, path: &str) -> std::result::Result<Vec<String>, MemoryError> {
            self.inner.list(path).await
        }
        async fn delete(&self, path: &str) -> std::result::Result<bool, MemoryError> {
            self.inner.delete(path).await
        }
    }

    #[tokio::test]
    async fn partly_stored_message_resumes_at_next_piece() {
        // Two writes per piece: the fifth write is the third piece's vector.
        let storage = Arc::new(FailingWrite {
            inner: InMemoryStorage::new(),
            fail_on: 4,
            writes: AtomicUsize::new(0),
        });
        let mut m = manager_on(storage, Arc::new(VocabularyEmbedder::new())).await;
        let vars = AgentVariables::new();
        let content: String = (0..900).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        m.append(LogType::Temporary, Message::user(content.clone()));

        let err = m.catch_up(&vars).await.unwrap_err();
        assert!(matches!(err, Error::Memory(MemoryError::Storage(_))));
        assert_eq!(m.chunks(LogType::Temporary).len(), 2);
        assert_eq!(m.pending(LogType::Temporary), 1);

        assert_eq!(m.catch_up(&vars).await.unwrap(), 1);
        let pieces: Vec<usize> = m
            .chunks(LogType::Temporary)
            .iter()
            .map(|c| chunk::piece_number(&c.message().unwrap()))
            .collect();
        assert_eq!(pieces, vec![0, 1, 2, 3, 4]);

        let chat = m.contextualize("abc", &roomy(), &vars).await.unwrap();
        assert_eq!(chat.working.len(), 1);
        let text: String = chat.working.iter().map(|msg| msg.content.as_str()).collect();
        assert_eq!(text, content);
    }

    #[tokio::test]
    async fn fork_is_independent() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let mut m = manager_on(storage.clone(), Arc::new(VocabularyEmbedder::new())).await;
        let vars = AgentVariables::new();
        m.append(LogType::Temporary, Message::user("shared history"));
        m.catch_up(&vars).await.unwrap();

        let mut child = m.fork("ctx-child").await.unwrap();
        child.append(LogType::Temporary, Message::user("child only"));
        child.catch_up(&vars).await.unwrap();

        assert_eq!(child.chunks(LogType::Temporary).len(), 2);
        assert_eq!(m.chunks(LogType::Temporary).len(), 1);
        assert_eq!(m.messages(LogType::Temporary).len(), 1);
        assert_eq!(storage.list("ctx-child/temporary").await.unwrap().len(), 2);
    }

    #[test]
    fn non_adjacent_fragments_get_a_gap() {
        let mut a = Message::user("abcdef");
        a.metadata.insert(MESSAGE_KEY.into(), 0.into());
        a.metadata.insert(PIECE_KEY.into(), 0.into());
        let mut b = Message::user("efghij");
        b.metadata.insert(MESSAGE_KEY.into(), 0.into());
        b.metadata.insert(PIECE_KEY.into(), 1.into());
        b.metadata.insert(OVERLAP_KEY.into(), 2.into());
        let mut d = Message::user("stuvwx");
        d.metadata.insert(MESSAGE_KEY.into(), 0.into());
        d.metadata.insert(PIECE_KEY.into(), 3.into());
        d.metadata.insert(OVERLAP_KEY.into(), 2.into());

        let merged = merge_fragments(vec![a, b, d]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, format!("abcdefghij{GAP_MARKER}stuvwx"));
    }
}
