//! Splitting oversized messages into token-bounded chunks.
//!
//! A message whose serialized form exceeds the token ceiling is split on
//! character boundaries into pieces of `chunk_chars` characters. Every piece
//! after the first starts with the last `overlap_chars` characters of its
//! predecessor, and records how many leading characters are repeated, so
//! dropping each piece's overlap prefix and concatenating reproduces the
//! original text exactly.
//!
//! A function call whose arguments are too long to ride on one piece is
//! folded into the split text as `name(arguments)`, so no piece carries more
//! than `chunk_chars` characters of payload.

use std::sync::Arc;

use memloop_core::error::MemoryError;
use memloop_core::message::Message;
use memloop_core::token::{Tokenizer, message_tokens};
use serde::{Deserialize, Serialize};

/// Metadata key: index of the raw-log message a chunk came from.
pub const MESSAGE_KEY: &str = "message";
/// Metadata key: piece number within the owning message.
pub const PIECE_KEY: &str = "chunk";
/// Metadata key: how many pieces the owning message was split into.
pub const PIECES_KEY: &str = "pieces";
/// Metadata key: leading characters repeated from the previous piece.
pub const OVERLAP_KEY: &str = "overlap";
/// Metadata key: variable whose value this chunk holds.
pub const VARIABLE_KEY: &str = "variable";
/// Metadata key: set when the owning function call was folded into the text.
pub const CALL_KEY: &str = "call";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Serialized token length above which a message is split.
    pub token_ceiling: usize,
    /// Characters per piece, overlap included.
    pub chunk_chars: usize,
    /// Characters each piece repeats from its predecessor.
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            token_ceiling: 512,
            chunk_chars: 1200,
            overlap_chars: 100,
        }
    }
}

/// One character-bounded slice of a longer text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPiece {
    pub text: String,
    /// Leading characters of `text` that repeat the previous piece.
    pub overlap: usize,
}

impl TextPiece {
    /// The piece without its overlap prefix.
    pub fn fresh(&self) -> &str {
        match self.text.char_indices().nth(self.overlap) {
            Some((byte, _)) => &self.text[byte..],
            None => "",
        }
    }
}

/// Split `text` into pieces of at most `chunk_chars` characters, each
/// repeating the last `overlap_chars` characters of the previous one.
///
/// `overlap_chars` is clamped below `chunk_chars` so the split always advances.
pub fn split_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<TextPiece> {
    let chunk_chars = chunk_chars.max(1);
    let overlap_chars = overlap_chars.min(chunk_chars - 1);
    let chars: Vec<char> = text.chars().collect();

    let mut pieces = Vec::with_capacity(chars.len() / (chunk_chars - overlap_chars) + 1);
    let mut start = 0;
    loop {
        let end = (start + chunk_chars).min(chars.len());
        pieces.push(TextPiece {
            text: chars[start..end].iter().collect(),
            overlap: if pieces.is_empty() { 0 } else { overlap_chars },
        });
        if end == chars.len() {
            break;
        }
        start = end - overlap_chars;
    }
    pieces
}

/// Inverse of [`split_text`].
pub fn reassemble<'a>(pieces: impl IntoIterator<Item = &'a TextPiece>) -> String {
    pieces.into_iter().map(TextPiece::fresh).collect()
}

/// Header line prefixed to every chunk of an externalized variable.
pub fn variable_header(name: &str, piece: usize) -> String {
    format!("Variable \"{name}\" chunk #{}\n", piece + 1)
}

/// Recover the raw piece carried by a chunk message: the variable header is
/// removed and the overlap recorded in metadata is restored as a [`TextPiece`].
pub fn piece_of(message: &Message) -> TextPiece {
    let overlap = message
        .metadata
        .get(OVERLAP_KEY)
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let text = match (message.metadata_str(VARIABLE_KEY), metadata_usize(message, PIECE_KEY)) {
        (Some(name), Some(piece)) => {
            let header = variable_header(name, piece);
            message
                .content
                .strip_prefix(header.as_str())
                .unwrap_or(&message.content)
                .to_string()
        }
        _ => message.content.clone(),
    };
    TextPiece { text, overlap }
}

/// Whether `message` is the final piece of its owner. Unsplit messages are.
pub fn is_last_piece(message: &Message) -> bool {
    match (metadata_usize(message, PIECE_KEY), metadata_usize(message, PIECES_KEY)) {
        (Some(piece), Some(total)) => piece + 1 >= total,
        _ => true,
    }
}

/// Whether `message` is, or is a piece of, a function call.
pub fn is_call_piece(message: &Message) -> bool {
    message.function_call.is_some() || message.metadata.contains_key(CALL_KEY)
}

/// Piece number of a chunk message; unsplit messages are piece 0.
pub fn piece_number(message: &Message) -> usize {
    metadata_usize(message, PIECE_KEY).unwrap_or(0)
}

fn metadata_usize(message: &Message, key: &str) -> Option<usize> {
    message.metadata.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

/// A registered chunk: a serialized chunk message plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Index of the owning message in its raw log.
    pub message_index: usize,
    /// Position in the owning collection. Monotonic.
    pub index: usize,
    pub token_count: usize,
    /// Serialized chunk message, exactly as embedded.
    pub text: String,
}

impl Chunk {
    pub fn new(message_index: usize, index: usize, text: String, tokenizer: &dyn Tokenizer) -> Self {
        Self {
            message_index,
            index,
            token_count: tokenizer.count(&text),
            text,
        }
    }

    /// Deserialize the chunk back into a message.
    pub fn message(&self) -> Result<Message, MemoryError> {
        serde_json::from_str(&self.text).map_err(|e| MemoryError::Corrupt {
            path: format!("chunk #{}", self.index),
            reason: e.to_string(),
        })
    }
}

/// Splits messages according to a [`ChunkerConfig`], counting tokens with a
/// shared [`Tokenizer`].
#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, tokenizer: Arc<dyn Tokenizer>) -> Result<Self, MemoryError> {
        if config.chunk_chars == 0 {
            return Err(MemoryError::InvalidInput("chunk_chars must be positive".into()));
        }
        if config.overlap_chars >= config.chunk_chars {
            return Err(MemoryError::InvalidInput(format!(
                "overlap_chars ({}) must be smaller than chunk_chars ({})",
                config.overlap_chars, config.chunk_chars
            )));
        }
        Ok(Self { config, tokenizer })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Whether the serialized message is over the token ceiling.
    pub fn should_chunk(&self, message: &Message) -> bool {
        message_tokens(self.tokenizer.as_ref(), message) > self.config.token_ceiling
    }

    /// Split `message` if it is oversized; otherwise return it unchanged.
    ///
    /// Pieces keep the role and name. A function call rides on the first
    /// piece only, unless its arguments are longer than a piece, in which
    /// case it is folded into the text and every piece is marked with
    /// [`CALL_KEY`].
    pub fn chunk(&self, message: &Message) -> Vec<Message> {
        if !self.should_chunk(message) {
            return vec![message.clone()];
        }
        self.pieces(message, None)
    }

    /// Chunk a message whose content is the value of variable `name`.
    ///
    /// Every piece is tagged with the variable, even when the value fits in
    /// one, so recombination can name it.
    pub fn chunk_variable(&self, message: &Message, name: &str) -> Vec<Message> {
        if !self.should_chunk(message) {
            let mut single = message.clone();
            tag(&mut single, 0, 1, 0, Some(name));
            return vec![single];
        }
        self.pieces(message, Some(name))
    }

    fn pieces(&self, message: &Message, variable: Option<&str>) -> Vec<Message> {
        let mut template = message.clone();
        template.content = String::new();
        let mut text = message.content.clone();

        if let Some(call) = template.function_call.take() {
            if call.name.chars().count() + call.arguments.chars().count() > self.config.chunk_chars {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&format!("{}({})", call.name, call.arguments));
                template.metadata.insert(CALL_KEY.into(), true.into());
            } else {
                template.function_call = Some(call);
            }
        }

        let pieces = split_text(&text, self.config.chunk_chars, self.config.overlap_chars);
        let total = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let mut chunk = template.clone();
                chunk.content = piece.text;
                if i > 0 {
                    chunk.function_call = None;
                }
                tag(&mut chunk, i, total, piece.overlap, variable);
                chunk
            })
            .collect()
    }
}

fn tag(chunk: &mut Message, piece: usize, total: usize, overlap: usize, variable: Option<&str>) {
    chunk.metadata.insert(PIECE_KEY.into(), piece.into());
    chunk.metadata.insert(PIECES_KEY.into(), total.into());
    chunk.metadata.insert(OVERLAP_KEY.into(), overlap.into());
    if let Some(name) = variable {
        chunk.content = format!("{}{}", variable_header(name, piece), chunk.content);
        chunk.metadata.insert(VARIABLE_KEY.into(), name.into());
    }
}
