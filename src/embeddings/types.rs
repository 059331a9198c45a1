//! Embedding types and data structures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Sparse lexical weights: token id to weight.
pub type SparseWeights = HashMap<u32, f32>;

/// Which vector kinds a request wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutputFlags {
    #[serde(default)]
    pub dense: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub colbert: bool,
}

impl OutputFlags {
    pub const NONE: OutputFlags = OutputFlags {
        dense: false,
        sparse: false,
        colbert: false,
    };

    pub const ALL: OutputFlags = OutputFlags {
        dense: true,
        sparse: true,
        colbert: true,
    };

    pub const fn new(dense: bool, sparse: bool, colbert: bool) -> Self {
        Self {
            dense,
            sparse,
            colbert,
        }
    }

    pub fn dense_only() -> Self {
        Self::new(true, false, false)
    }

    pub fn sparse_only() -> Self {
        Self::new(false, true, false)
    }

    pub fn colbert_only() -> Self {
        Self::new(false, false, true)
    }

    /// Logical OR of both flag sets.
    pub fn union(self, other: OutputFlags) -> Self {
        Self {
            dense: self.dense || other.dense,
            sparse: self.sparse || other.sparse,
            colbert: self.colbert || other.colbert,
        }
    }

    /// True when at least one output kind is requested.
    pub fn any(&self) -> bool {
        self.dense || self.sparse || self.colbert
    }

    /// True when every kind requested by `other` is also requested here.
    pub fn contains(&self, other: OutputFlags) -> bool {
        (self.dense || !other.dense)
            && (self.sparse || !other.sparse)
            && (self.colbert || !other.colbert)
    }

    /// Requested kinds in canonical order: dense, sparse, colbert.
    pub fn requested_types(&self) -> Vec<&'static str> {
        let mut types = Vec::with_capacity(3);
        if self.dense {
            types.push("dense");
        }
        if self.sparse {
            types.push("sparse");
        }
        if self.colbert {
            types.push("colbert");
        }
        types
    }
}

impl BitOr for OutputFlags {
    type Output = OutputFlags;

    fn bitor(self, rhs: OutputFlags) -> OutputFlags {
        self.union(rhs)
    }
}

impl BitOrAssign for OutputFlags {
    fn bitor_assign(&mut self, rhs: OutputFlags) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for OutputFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self.requested_types();
        if types.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", types.join("+"))
        }
    }
}

/// Vectors computed for one input text. Kinds that were not requested are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVectors {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dense: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sparse: Option<SparseWeights>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub colbert: Option<Vec<Vec<f32>>>,
}

impl EmbeddingVectors {
    pub fn with_dense(mut self, v: Vec<f32>) -> Self {
        self.dense = Some(v);
        self
    }

    pub fn with_sparse(mut self, w: SparseWeights) -> Self {
        self.sparse = Some(w);
        self
    }

    pub fn with_colbert(mut self, vecs: Vec<Vec<f32>>) -> Self {
        self.colbert = Some(vecs);
        self
    }

    /// Drops every kind not present in `flags`.
    pub fn select(mut self, flags: OutputFlags) -> Self {
        if !flags.dense {
            self.dense = None;
        }
        if !flags.sparse {
            self.sparse = None;
        }
        if !flags.colbert {
            self.colbert = None;
        }
        self
    }

    /// Kinds actually present.
    pub fn present(&self) -> OutputFlags {
        OutputFlags::new(
            self.dense.is_some(),
            self.sparse.is_some(),
            self.colbert.is_some(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

impl EmbeddingUsage {
    pub fn new(prompt_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            total_tokens: prompt_tokens,
        }
    }

    /// Rough usage estimate: 1.3 tokens per whitespace-separated word.
    pub fn estimate(text: &str) -> Self {
        let words = text.split_whitespace().count() as f64;
        Self::new((words * 1.3) as u32)
    }

    pub fn add(&mut self, other: &EmbeddingUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Successful result delivered to one caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOutput {
    #[serde(flatten)]
    pub vectors: EmbeddingVectors,
    pub usage: EmbeddingUsage,
    pub embedding_types: Vec<String>,
}

impl EmbeddingOutput {
    /// Builds the caller-facing result, keeping only the kinds in `flags`.
    pub fn from_batch_item(text: &str, vectors: EmbeddingVectors, flags: OutputFlags) -> Self {
        Self {
            vectors: vectors.select(flags),
            usage: EmbeddingUsage::estimate(text),
            embedding_types: flags
                .requested_types()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}
