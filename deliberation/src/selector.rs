//! Heuristic model selection over the provider catalog.
//!
//! Each strategy is a pure scoring function: keyword allowlists and
//! provider preferences score every catalog entry, a stable descending
//! sort picks the top N. Ties keep catalog order — never model-name
//! comparison, which would reintroduce provider-name bias. Diversity
//! selection round-robins one model per provider before backfilling.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DeliberationError, DeliberationResult};
use crate::gateway::ModelInfo;

/// A council of fewer than three members cannot produce a meaningful
/// ranking, so every request is clamped up to this floor.
pub const MIN_COUNCIL_SIZE: usize = 3;

/// Closed set of selection strategies. Unrecognized tags are rejected
/// at the boundary, before any model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Strongest available models regardless of cost.
    MaxStakes,
    /// High capability balanced against cost.
    MaxStakesOptimized,
    /// Maximally differentiated providers, to surface bias and
    /// disagreement.
    MaxCulturalBiases,
    /// Lowest-cost models suitable for the task.
    Cheapest,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxStakes => write!(f, "max_stakes"),
            Self::MaxStakesOptimized => write!(f, "max_stakes_optimized"),
            Self::MaxCulturalBiases => write!(f, "max_cultural_biases"),
            Self::Cheapest => write!(f, "cheapest"),
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = DeliberationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max_stakes" => Ok(Self::MaxStakes),
            "max_stakes_optimized" => Ok(Self::MaxStakesOptimized),
            "max_cultural_biases" => Ok(Self::MaxCulturalBiases),
            "cheapest" => Ok(Self::Cheapest),
            other => Err(DeliberationError::UnknownStrategy(other.to_string())),
        }
    }
}

/// The chosen participant set plus a one-line rationale per choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub strategy: SelectionStrategy,
    pub models: Vec<String>,
    pub rationales: BTreeMap<String, String>,
}

const FLAGSHIP_KEYWORDS: &[&str] = &[
    "gpt-4-turbo",
    "gpt-4o",
    "claude-3-opus",
    "claude-3.5-sonnet",
    "gemini-1.5-pro",
    "gemini-2.0",
    "o1-preview",
    "o1-mini",
    "llama-3.3-70b",
    "mistral-large",
    "command-r-plus",
];

const OPTIMIZED_KEYWORDS: &[&str] = &[
    "gpt-4o-mini",
    "claude-3.5-haiku",
    "claude-3-haiku",
    "gemini-1.5-flash",
    "llama-3.1-70b",
    "llama-3.3-70b",
    "mistral-medium",
    "command-r",
];

const BUDGET_KEYWORDS: &[&str] = &[
    "gpt-3.5",
    "gpt-4o-mini",
    "claude-3-haiku",
    "gemini-1.5-flash",
    "llama-3.1-8b",
    "llama-3.2",
    "mistral-7b",
    "phi-3",
];

const SMALL_SIZE_MARKERS: &[&str] = &["7b", "8b", "13b", "mini", "small", "flash"];

/// Select council members from the catalog. `desired_count` is clamped
/// to [`MIN_COUNCIL_SIZE`]; an empty catalog is a hard failure.
pub fn select(
    strategy: SelectionStrategy,
    desired_count: usize,
    catalog: &[ModelInfo],
) -> DeliberationResult<ModelSelection> {
    if catalog.is_empty() {
        return Err(DeliberationError::EmptyCatalog);
    }

    let count = desired_count.max(MIN_COUNCIL_SIZE);
    let selected = match strategy {
        SelectionStrategy::MaxStakes => scored_pick(catalog, count, |model| {
            let id = model.id.to_lowercase();
            let mut score = 0u32;
            if FLAGSHIP_KEYWORDS.iter().any(|k| id.contains(k)) {
                score += 10;
            }
            if matches!(
                model.provider.to_lowercase().as_str(),
                "openai" | "anthropic" | "google"
            ) {
                score += 5;
            }
            score
        }),
        SelectionStrategy::MaxStakesOptimized => scored_pick(catalog, count, |model| {
            let id = model.id.to_lowercase();
            let mut score = 0u32;
            if OPTIMIZED_KEYWORDS.iter().any(|k| id.contains(k)) {
                score += 10;
            }
            if matches!(
                model.provider.to_lowercase().as_str(),
                "anthropic" | "google" | "meta"
            ) {
                score += 5;
            }
            score
        }),
        SelectionStrategy::MaxCulturalBiases => diversity_pick(catalog, count),
        SelectionStrategy::Cheapest => scored_pick(catalog, count, |model| {
            let id = model.id.to_lowercase();
            let mut score = 0u32;
            if BUDGET_KEYWORDS.iter().any(|k| id.contains(k)) {
                score += 10;
            }
            if SMALL_SIZE_MARKERS.iter().any(|m| id.contains(m)) {
                score += 5;
            }
            score
        }),
    };

    let rationales = selected
        .iter()
        .map(|model| (model.id.clone(), rationale_for(strategy, model)))
        .collect();

    info!(
        strategy = %strategy,
        requested = desired_count,
        selected = selected.len(),
        "model selection complete"
    );

    Ok(ModelSelection {
        strategy,
        models: selected.into_iter().map(|m| m.id).collect(),
        rationales,
    })
}

fn rationale_for(strategy: SelectionStrategy, model: &ModelInfo) -> String {
    match strategy {
        SelectionStrategy::MaxStakes => {
            format!("Flagship model from {} for maximum capability", model.provider)
        }
        SelectionStrategy::MaxStakesOptimized => {
            format!("High-quality model from {} optimized for cost", model.provider)
        }
        SelectionStrategy::MaxCulturalBiases => {
            format!("Diverse perspective from {} to surface bias", model.provider)
        }
        SelectionStrategy::Cheapest => {
            format!("Cost-efficient model from {}", model.provider)
        }
    }
}

/// Score every entry, stable-sort descending, take the top N. Stable
/// sort keeps catalog order for equal scores.
fn scored_pick(
    catalog: &[ModelInfo],
    count: usize,
    score: impl Fn(&ModelInfo) -> u32,
) -> Vec<ModelInfo> {
    let mut scored: Vec<(&ModelInfo, u32)> = catalog.iter().map(|m| (m, score(m))).collect();
    scored.sort_by_key(|(_, s)| Reverse(*s));
    scored
        .into_iter()
        .take(count)
        .map(|(m, _)| m.clone())
        .collect()
}

/// Round-robin one model per distinct provider (in order of first
/// appearance) until N reached, then backfill from leftovers.
fn diversity_pick(catalog: &[ModelInfo], count: usize) -> Vec<ModelInfo> {
    let mut provider_order: Vec<String> = Vec::new();
    let mut by_provider: HashMap<String, VecDeque<&ModelInfo>> = HashMap::new();
    for model in catalog {
        if !by_provider.contains_key(&model.provider) {
            provider_order.push(model.provider.clone());
        }
        by_provider.entry(model.provider.clone()).or_default().push_back(model);
    }

    let mut selected: Vec<ModelInfo> = Vec::new();
    while selected.len() < count && !provider_order.is_empty() {
        provider_order.retain(|provider| {
            if selected.len() >= count {
                return false;
            }
            match by_provider.get_mut(provider).and_then(VecDeque::pop_front) {
                Some(model) => {
                    selected.push(model.clone());
                    true
                }
                None => false,
            }
        });
    }

    selected
}
