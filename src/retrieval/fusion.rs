//! Weighted score fusion of semantic and lexical result sets

use crate::config::SearchConfig;
use ahash::AHashMap;

/// Branch weights for combining scores of ids found by both searches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub semantic: f32,
    pub lexical: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            lexical: 0.4,
        }
    }
}

impl From<&SearchConfig> for FusionWeights {
    fn from(config: &SearchConfig) -> Self {
        Self {
            semantic: config.semantic_weight,
            lexical: config.lexical_weight,
        }
    }
}

/// Which branches contributed to a fused hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionOrigin {
    Semantic,
    Lexical,
    Both,
}

/// One scored hit from a single branch
#[derive(Debug, Clone)]
pub struct BranchHit<T> {
    pub id: String,
    pub score: f32,
    pub item: T,
}

impl<T> BranchHit<T> {
    pub fn new(id: impl Into<String>, score: f32, item: T) -> Self {
        Self {
            id: id.into(),
            score,
            item,
        }
    }
}

/// A fused hit
#[derive(Debug, Clone)]
pub struct FusedHit<T> {
    pub id: String,
    pub score: f32,
    pub origin: FusionOrigin,
    /// Semantic payload when present, else the lexical one
    pub item: T,
}

/// Keep the highest-scored hit per id, in first-seen order
pub fn best_per_id<T>(hits: Vec<BranchHit<T>>) -> Vec<BranchHit<T>> {
    let mut positions: AHashMap<String, usize> = AHashMap::new();
    let mut best: Vec<BranchHit<T>> = Vec::with_capacity(hits.len());

    for hit in hits {
        match positions.get(&hit.id) {
            Some(&pos) => {
                if hit.score > best[pos].score {
                    best[pos] = hit;
                }
            }
            None => {
                positions.insert(hit.id.clone(), best.len());
                best.push(hit);
            }
        }
    }

    best
}

/// Combine both branches
///
/// Ids found by one branch keep that branch's score; ids found by both get
/// `semantic_weight * semantic + lexical_weight * lexical`. Each branch is
/// reduced to its best hit per id first. Output is in first-seen order
/// (semantic branch first) and left unsorted.
pub fn weighted_fusion<T>(
    semantic: Vec<BranchHit<T>>,
    lexical: Vec<BranchHit<T>>,
    weights: FusionWeights,
) -> Vec<FusedHit<T>> {
    let semantic = best_per_id(semantic);
    let lexical = best_per_id(lexical);

    let mut fused: Vec<FusedHit<T>> = Vec::with_capacity(semantic.len() + lexical.len());
    let mut positions: AHashMap<String, usize> = AHashMap::new();

    for hit in semantic {
        positions.insert(hit.id.clone(), fused.len());
        fused.push(FusedHit {
            id: hit.id,
            score: hit.score,
            origin: FusionOrigin::Semantic,
            item: hit.item,
        });
    }

    for hit in lexical {
        match positions.get(&hit.id) {
            Some(&pos) => {
                let entry = &mut fused[pos];
                entry.score = weights.semantic * entry.score + weights.lexical * hit.score;
                entry.origin = FusionOrigin::Both;
            }
            None => {
                positions.insert(hit.id.clone(), fused.len());
                fused.push(FusedHit {
                    id: hit.id,
                    score: hit.score,
                    origin: FusionOrigin::Lexical,
                    item: hit.item,
                });
            }
        }
    }

    fused
}
