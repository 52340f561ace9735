//! Typed progress events for one deliberation.
//!
//! A deliberation reports progress as an append-only sequence of tagged
//! events, terminated by `complete` or `error`. The wire shape is what
//! a Server-Sent-Events layer would forward verbatim; [`DeliberationEvent::to_sse`]
//! renders one `data:` frame.

use serde::{Deserialize, Serialize};

use crate::clarification::ClarificationQuestion;
use crate::council::{AggregateRanking, LabelMap, Ranking, SynthesisResult};
use crate::gateway::ModelResponse;

/// Reveal metadata attached to the Stage-2 completion event. Exposed
/// only after ranking is complete, so a reader of the stream cannot
/// reconstruct authorship while judging is still in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage2Metadata {
    pub label_to_model: LabelMap,
    pub aggregate_rankings: Vec<AggregateRanking>,
}

/// Ordered progress events for one deliberation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliberationEvent {
    ClarificationAutoStart,
    ClarificationQuestion { data: ClarificationQuestion },
    Stage1Start,
    Stage1Complete { data: Vec<ModelResponse> },
    Stage2Start,
    Stage2Complete {
        data: Vec<Ranking>,
        metadata: Stage2Metadata,
    },
    Stage3Start,
    Stage3Complete { data: SynthesisResult },
    TitleComplete { title: String },
    Complete,
    Error { message: String },
}

impl DeliberationEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }

    /// Render one SSE `data:` frame.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).expect("event serializes");
        format!("data: {json}\n\n")
    }
}
