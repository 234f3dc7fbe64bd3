//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for identifiers, content
//! hashes and change-feed tokens. Each newtype ensures data validity at
//! construction time, so a value that exists is a value that can be used
//! as a remote blob name or a JSON map key without further checks.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::errors::DomainError;

/// Maximum length of a note or folder identifier
const MAX_ID_LEN: usize = 128;

/// Identifiers end up in blob names (`note-<id>.json`), so only a
/// conservative character set is accepted.
fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ============================================================================
// Note and folder identifiers
// ============================================================================

/// Identifier of a note, stable across devices
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId(String);

impl NoteId {
    /// Create a new NoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty, too long or contains characters
    /// outside `[A-Za-z0-9_-]`
    pub fn new(id: String) -> Result<Self, DomainError> {
        if !is_slug(&id) {
            return Err(DomainError::InvalidNoteId(id));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random NoteId
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for NoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<NoteId> for String {
    fn from(id: NoteId) -> Self {
        id.0
    }
}

/// Identifier of a folder inside the index document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FolderId(String);

impl FolderId {
    /// Create a new FolderId
    ///
    /// # Errors
    /// Returns error if the ID is not a valid slug
    pub fn new(id: String) -> Result<Self, DomainError> {
        if !is_slug(&id) {
            return Err(DomainError::InvalidFolderId(id));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random FolderId
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FolderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FolderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FolderId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FolderId> for String {
    fn from(id: FolderId) -> Self {
        id.0
    }
}

// ============================================================================
// Remote store identifiers
// ============================================================================

/// Identifier assigned to a blob by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID format is invalid
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        // Store IDs are opaque but never contain separators or whitespace
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '!' || c == '-' || c == '_' || c == '.')
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

/// Change-feed cursor returned by the remote store (opaque string)
///
/// The token is opaque - we don't validate its contents, only that it's non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeToken(String);

impl ChangeToken {
    /// Create a new ChangeToken
    ///
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.is_empty() {
            return Err(DomainError::InvalidChangeToken(
                "Change token cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChangeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeToken {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ChangeToken {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ChangeToken> for String {
    fn from(token: ChangeToken) -> Self {
        token.0
    }
}

// ============================================================================
// Content hash
// ============================================================================

/// SHA-256 digest of a note's content fields in Base64 format
///
/// Format: Base64-encoded 32-byte hash (44 characters with padding)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Expected decoded length of a SHA-256 digest
    const EXPECTED_DECODED_LEN: usize = 32;

    /// Create a new ContentHash from its Base64 form
    ///
    /// # Errors
    /// Returns error if the hash is not valid Base64 or has the wrong length
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }

        match BASE64.decode(hash.as_bytes()) {
            Ok(bytes) if bytes.len() == Self::EXPECTED_DECODED_LEN => Ok(Self(hash)),
            Ok(bytes) => Err(DomainError::InvalidHash(format!(
                "Hash has wrong length: expected {} bytes, got {} bytes",
                Self::EXPECTED_DECODED_LEN,
                bytes.len()
            ))),
            Err(_) => Err(DomainError::InvalidHash(format!(
                "Hash is not valid Base64: {hash}"
            ))),
        }
    }

    /// Digest a sequence of fields.
    ///
    /// Each field is length-prefixed so that moving bytes between adjacent
    /// fields always changes the digest.
    #[must_use]
    pub fn digest<'a>(fields: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        Self(BASE64.encode(hasher.finalize()))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod note_id_tests {
        use super::*;

        #[test]
        fn test_valid_id() {
            let id = NoteId::new("note_01-abc".to_string()).unwrap();
            assert_eq!(id.as_str(), "note_01-abc");
        }

        #[test]
        fn test_empty_fails() {
            assert!(NoteId::new(String::new()).is_err());
        }

        #[test]
        fn test_path_separators_fail() {
            assert!(NoteId::new("../etc".to_string()).is_err());
            assert!(NoteId::new("a/b".to_string()).is_err());
            assert!(NoteId::new("with space".to_string()).is_err());
        }

        #[test]
        fn test_too_long_fails() {
            assert!(NoteId::new("a".repeat(MAX_ID_LEN + 1)).is_err());
        }

        #[test]
        fn test_generate_is_valid_and_unique() {
            let a = NoteId::generate();
            let b = NoteId::generate();
            assert_ne!(a, b);
            assert!(NoteId::new(a.to_string()).is_ok());
        }

        #[test]
        fn test_serde_rejects_invalid() {
            let result: Result<NoteId, _> = serde_json::from_str("\"no/slash\"");
            assert!(result.is_err());
        }
    }

    mod folder_id_tests {
        use super::*;

        #[test]
        fn test_from_str() {
            let id: FolderId = "work".parse().unwrap();
            assert_eq!(id.to_string(), "work");
            assert!("".parse::<FolderId>().is_err());
        }
    }

    mod remote_id_tests {
        use super::*;

        #[test]
        fn test_valid_id() {
            let id = RemoteId::new("01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K".to_string()).unwrap();
            assert_eq!(id.as_str(), "01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K");
        }

        #[test]
        fn test_empty_fails() {
            assert!(RemoteId::new(String::new()).is_err());
        }

        #[test]
        fn test_invalid_chars_fails() {
            assert!(RemoteId::new("invalid@id".to_string()).is_err());
            assert!(RemoteId::new("a/b".to_string()).is_err());
        }
    }

    mod content_hash_tests {
        use super::*;

        #[test]
        fn test_digest_is_valid_hash() {
            let hash = ContentHash::digest([b"hello".as_slice()]);
            assert_eq!(hash.as_str().len(), 44);
            assert!(ContentHash::new(hash.to_string()).is_ok());
        }

        #[test]
        fn test_digest_is_deterministic() {
            let a = ContentHash::digest([b"a".as_slice(), b"b".as_slice()]);
            let b = ContentHash::digest([b"a".as_slice(), b"b".as_slice()]);
            assert_eq!(a, b);
        }

        #[test]
        fn test_field_boundaries_matter() {
            let a = ContentHash::digest([b"ab".as_slice(), b"c".as_slice()]);
            let b = ContentHash::digest([b"a".as_slice(), b"bc".as_slice()]);
            assert_ne!(a, b);
        }

        #[test]
        fn test_invalid_base64_fails() {
            assert!(ContentHash::new("not@valid#base64".to_string()).is_err());
        }

        #[test]
        fn test_wrong_length_fails() {
            assert!(ContentHash::new("AAAA".to_string()).is_err());
        }
    }

    mod change_token_tests {
        use super::*;

        #[test]
        fn test_opaque_token() {
            let token = ChangeToken::new("seq:42?x=1".to_string()).unwrap();
            assert_eq!(token.as_str(), "seq:42?x=1");
            assert!(ChangeToken::new(String::new()).is_err());
        }
    }
}
