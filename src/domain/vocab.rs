// ============================================================
// Layer 3 — Vocabulary
// ============================================================
// Bidirectional token ↔ id mapping loaded from a JSON object
// ({"token": id, ...}). Three ids have fixed meaning:
//
//   <pad>  — id 0, never contributes to loss or BLEU
//   <s>    — seeds autoregressive decoding
//   </s>   — terminates a generated sequence
//
// The pad id being 0 is relied on throughout (class-weight
// masking, output trimming), so it is validated at load time
// rather than assumed.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Token used for padded positions. Must map to id 0.
pub const PAD_TOKEN: &str = "<pad>";
/// Start-of-sequence marker fed to the decoder at step 0.
pub const START_TOKEN: &str = "<s>";
/// End-of-sequence marker; generation stops once it is emitted.
pub const END_TOKEN: &str = "</s>";
/// Rendered for ids that fall outside the vocabulary.
pub const UNK_TOKEN: &str = "<unk>";

#[derive(Debug, Clone)]
pub struct Vocab {
    tok2id: HashMap<String, i64>,
    id2tok: HashMap<i64, String>,
    start_id: i64,
    end_id: i64,
}

impl Vocab {
    /// Build a vocabulary from a token → id map, validating the
    /// reserved entries. Fails fast on a malformed map so a bad
    /// vocabulary never reaches the training loop.
    pub fn new(tok2id: HashMap<String, i64>) -> Result<Self> {
        match tok2id.get(PAD_TOKEN) {
            Some(&0) => {}
            Some(&other) => bail!("'{PAD_TOKEN}' must have id 0, found {other}"),
            None => bail!("vocabulary is missing the '{PAD_TOKEN}' entry"),
        }
        let start_id = *tok2id
            .get(START_TOKEN)
            .with_context(|| format!("vocabulary is missing the '{START_TOKEN}' entry"))?;
        let end_id = *tok2id
            .get(END_TOKEN)
            .with_context(|| format!("vocabulary is missing the '{END_TOKEN}' entry"))?;

        let id2tok: HashMap<i64, String> =
            tok2id.iter().map(|(tok, &id)| (id, tok.clone())).collect();
        if id2tok.len() != tok2id.len() {
            bail!("vocabulary contains duplicate ids");
        }

        Ok(Self { tok2id, id2tok, start_id, end_id })
    }

    /// Load a vocabulary from a JSON file of the form {"token": id}.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read vocabulary '{}'", path.display()))?;
        let tok2id: HashMap<String, i64> = serde_json::from_str(&json)
            .with_context(|| format!("cannot parse vocabulary '{}'", path.display()))?;
        Self::new(tok2id)
    }

    pub fn len(&self) -> usize {
        self.tok2id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tok2id.is_empty()
    }

    pub fn pad_id(&self) -> i64 {
        0
    }

    pub fn start_id(&self) -> i64 {
        self.start_id
    }

    pub fn end_id(&self) -> i64 {
        self.end_id
    }

    pub fn id(&self, token: &str) -> Option<i64> {
        self.tok2id.get(token).copied()
    }

    /// Token string for an id; unknown ids render as `<unk>`.
    pub fn token(&self, id: i64) -> &str {
        self.id2tok.get(&id).map(String::as_str).unwrap_or(UNK_TOKEN)
    }
}
