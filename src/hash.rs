//! Stable document identifiers.
//!
//! Identity is derived from the document's *name*, not its content: two
//! uploads named `notes.txt` are the same logical document and the second
//! replaces the first in vector memory, while identical bytes uploaded under
//! two names are two documents.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a document name.
pub fn document_id(name: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_ref());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a chunk's text, used to tag stored vectors.
pub fn text_hash(text: &str) -> String {
    document_id(text.as_bytes())
}
