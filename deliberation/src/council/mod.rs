//! The three-stage council pipeline.
//!
//! Stage 1 fans the query out to every participant. Stage 2 anonymizes
//! the successful answers under labels and has each answering model
//! rank the full set blind. The aggregation step folds all rankings
//! into one consensus ordering by Borda-style positional scoring.
//! Stage 3 hands everything to the chairman for the answer of record.
//!
//! Stages are strictly sequential; inside a stage every call is issued
//! concurrently and the stage waits for all of them to settle. A failed
//! participant is absent from later stages, never fatal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clarification::parse::{parse_analyst_reply, AnalystReply};
use crate::error::{DeliberationError, DeliberationResult};
use crate::gateway::{ChatMessage, ModelBackend, ModelResponse};
use crate::prompts;

/// Opaque per-deliberation response identifier ("Response A", ...).
pub type Label = String;

/// The reveal mapping from [`Label`] back to the originating model.
/// Created once per deliberation, never mutated; iteration order is
/// label assignment order so bias analysis stays reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    entries: Vec<(Label, String)>,
}

impl LabelMap {
    /// Assign labels to the successful responses, in Stage-1 list
    /// order. The ordering correlates only with list position — never
    /// with provider identity or response quality.
    pub fn assign(responses: &[ModelResponse]) -> Self {
        let entries = responses
            .iter()
            .filter(|r| r.succeeded())
            .enumerate()
            .map(|(i, r)| (format!("Response {}", letters(i)), r.model_id.clone()))
            .collect();
        Self { entries }
    }

    pub fn model_for(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, m)| m.as_str())
    }

    pub fn labels(&self) -> Vec<Label> {
        self.entries.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn models(&self) -> Vec<String> {
        self.entries.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Label, String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for LabelMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, model) in &self.entries {
            map.serialize_entry(label, model)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LabelMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> serde::de::Visitor<'de> for MapVisitor {
            type Value = LabelMap;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of label to model id")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((label, model)) = access.next_entry::<Label, String>()? {
                    entries.push((label, model));
                }
                Ok(LabelMap { entries })
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

/// Spreadsheet-style letter sequence: A..Z, AA, AB, ...
fn letters(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_else(|_| "A".to_string())
}

/// One judge's full ordering of all labeled responses, best first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ranking {
    pub judge_model_id: String,
    pub ordered_labels: Vec<Label>,
}

/// Consensus position for one Stage-1 participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateRanking {
    pub model_id: String,
    pub score: u32,
    /// 1-based; ties broken by Stage-1 participant order.
    pub rank: usize,
}

/// The chairman's synthesized answer of record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisResult {
    pub model_id: String,
    pub response: String,
}

/// Stage 1 — independent generation. Returns exactly one entry per
/// participant, in participant order, failures included. No
/// participant's failure removes or reorders another's result.
pub async fn stage1_collect(
    backend: &dyn ModelBackend,
    participants: &[String],
    user_query: &str,
    history: &[ChatMessage],
    context: Option<&str>,
    role: Option<&str>,
) -> Vec<ModelResponse> {
    let messages = prompts::stage1_messages(user_query, history, context, role);
    let responses = backend.send_all(participants, &messages).await;

    let failures = responses.iter().filter(|r| !r.succeeded()).count();
    info!(
        participants = participants.len(),
        failures, "stage 1 settled"
    );
    responses
}

/// Stage 2 — anonymized cross-ranking. Only participants that produced
/// a successful Stage-1 response may judge (a model cannot judge if it
/// never answered); every judge sees the same anonymized transcript.
pub async fn stage2_rank(
    backend: &dyn ModelBackend,
    user_query: &str,
    stage1: &[ModelResponse],
) -> (Vec<Ranking>, LabelMap) {
    let label_map = LabelMap::assign(stage1);
    if label_map.is_empty() {
        warn!("no successful stage 1 responses; skipping ranking");
        return (Vec::new(), label_map);
    }

    let contents: HashMap<&str, &str> = stage1
        .iter()
        .filter_map(|r| Some((r.model_id.as_str(), r.content.as_deref()?)))
        .collect();
    let labeled: Vec<(Label, &str)> = label_map
        .iter()
        .map(|(label, model)| (label.clone(), contents.get(model.as_str()).copied().unwrap_or("")))
        .collect();

    let prompt = prompts::ranking_prompt(user_query, &labeled);
    let messages = [ChatMessage::user(prompt)];
    let judges = label_map.models();
    let replies = backend.send_all(&judges, &messages).await;

    let labels = label_map.labels();
    let mut rankings = Vec::new();
    for reply in replies {
        if !reply.succeeded() {
            warn!(judge = %reply.model_id, "judge call failed; ranking absent");
            continue;
        }
        let text = reply.content.as_deref().unwrap_or("");
        match parse_ranking(text, &labels) {
            Some(ordered_labels) => rankings.push(Ranking {
                judge_model_id: reply.model_id,
                ordered_labels,
            }),
            None => {
                warn!(judge = %reply.model_id, "judge output is not a full permutation; ranking absent");
            }
        }
    }

    info!(
        judges = judges.len(),
        rankings = rankings.len(),
        labels = labels.len(),
        "stage 2 settled"
    );
    (rankings, label_map)
}

/// Parse one judge's reply into a full permutation of the label set.
/// Tries the JSON contract first, then recovers by scanning the raw
/// text for label mentions in order of first appearance. Anything
/// short of a full permutation yields no ranking at all.
fn parse_ranking(text: &str, labels: &[Label]) -> Option<Vec<Label>> {
    if let AnalystReply::Structured(value) = parse_analyst_reply(text) {
        if let Some(items) = value.get("ranking").and_then(|v| v.as_array()) {
            let ordered: Vec<Label> = items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.trim().to_string())
                .collect();
            if is_permutation(&ordered, labels) {
                return Some(ordered);
            }
        }
    }

    // Recovery path: order labels by first mention in the raw text.
    let mut positions: Vec<(usize, Label)> = Vec::new();
    for label in labels {
        let at = find_label(text, label)?;
        positions.push((at, label.clone()));
    }
    positions.sort_by_key(|(at, _)| *at);
    let ordered: Vec<Label> = positions.into_iter().map(|(_, l)| l).collect();
    is_permutation(&ordered, labels).then_some(ordered)
}

/// First whole-word mention of `label` in `text`. Labels share prefixes
/// once the letter sequence wraps ("Response A" prefixes "Response AA"),
/// so a match followed by an alphanumeric character is not a mention of
/// this label.
fn find_label(text: &str, label: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = text[from..].find(label) {
        let at = from + offset;
        let end = at + label.len();
        let continues = text[end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        if !continues {
            return Some(at);
        }
        from = end;
    }
    None
}

fn is_permutation(ordered: &[Label], labels: &[Label]) -> bool {
    if ordered.len() != labels.len() {
        return false;
    }
    let mut seen: Vec<&Label> = ordered.iter().collect();
    seen.sort();
    seen.dedup();
    seen.len() == labels.len() && ordered.iter().all(|l| labels.contains(l))
}

/// Fold all rankings into the consensus ordering by positional scoring:
/// with `k` labels, position `i` (0-indexed, best first) earns `k-1-i`
/// points. Every Stage-1 participant appears; models that failed or
/// were never ranked score 0 and sort last. Deterministic and
/// order-independent in the rankings supplied; ties keep Stage-1
/// participant order.
pub fn aggregate_rankings(
    rankings: &[Ranking],
    label_map: &LabelMap,
    stage1: &[ModelResponse],
) -> Vec<AggregateRanking> {
    let k = label_map.len() as u32;
    let mut scores: HashMap<&str, u32> = HashMap::new();

    for ranking in rankings {
        for (position, label) in ranking.ordered_labels.iter().enumerate() {
            let Some(model) = label_map.model_for(label) else {
                debug!(label = %label, judge = %ranking.judge_model_id, "ranked label has no mapping");
                continue;
            };
            let points = k.saturating_sub(1).saturating_sub(position as u32);
            *scores.entry(model).or_insert(0) += points;
        }
    }

    let mut entries: Vec<AggregateRanking> = stage1
        .iter()
        .map(|r| AggregateRanking {
            model_id: r.model_id.clone(),
            score: scores.get(r.model_id.as_str()).copied().unwrap_or(0),
            rank: 0,
        })
        .collect();

    // Stable sort: equal scores keep participant order.
    entries.sort_by_key(|e| std::cmp::Reverse(e.score));
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

/// Stage 3 — synthesis by the chairman. A failed or empty chairman
/// reply is a terminal error; a council without a synthesized verdict
/// has no defined output.
#[allow(clippy::too_many_arguments)]
pub async fn stage3_synthesize(
    backend: &dyn ModelBackend,
    chairman_model: &str,
    user_query: &str,
    stage1: &[ModelResponse],
    rankings: &[Ranking],
    aggregate: &[AggregateRanking],
    context: Option<&str>,
    role: Option<&str>,
) -> DeliberationResult<SynthesisResult> {
    let prompt = prompts::synthesis_prompt(user_query, stage1, rankings, aggregate, context, role);
    let messages = [ChatMessage::user(prompt)];
    let response = backend.send(chairman_model, &messages).await;

    if !response.succeeded() {
        return Err(DeliberationError::ChairmanFailed {
            model: chairman_model.to_string(),
        });
    }

    info!(chairman = chairman_model, "stage 3 settled");
    Ok(SynthesisResult {
        model_id: chairman_model.to_string(),
        response: response.content.unwrap_or_default(),
    })
}
