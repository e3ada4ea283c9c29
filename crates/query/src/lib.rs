pub mod decision;
pub mod evidence;
pub mod prompt;
pub mod router;
pub mod telemetry;

pub use decision::{
    Decision, DecisionMaker, DecisionSource, KeywordDecisionMaker, LlmDecisionMaker, Route,
};
pub use evidence::{Evidence, GraphEvidence};
pub use router::{Answer, Router, RouterConfig, SENTINEL};
pub use telemetry::{
    AnswerSource, ChunkHit, FallbackKind, Telemetry, TelemetryEvent, TelemetryFanout,
    TracingTelemetry,
};
