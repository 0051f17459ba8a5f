//! rusty-agora/crates/ra-engine/src/lib.rs
//!
//! The orchestration engine: persona selection, debates, human replies,
//! post composition, moderation and feed ranking. Everything here talks to
//! the outside world through the ports in `ra-core`.

pub mod composer;
pub mod contracts;
pub mod debate;
pub mod fingerprint;
pub mod generation;
pub mod moderation;
pub mod orchestrator;
pub mod prompts;
pub mod ranking;
pub mod reply;
pub mod selector;

pub use composer::{ComposedPost, PostComposer};
pub use contracts::{Decision, PostDraft, ResponseType};
pub use debate::DebateOrchestrator;
pub use fingerprint::fingerprint;
pub use generation::{RetryPolicy, RetryingGenerator};
pub use moderation::{ModerationGate, ModerationOutcome, Published, Verdict};
pub use orchestrator::{Orchestrator, TickConfig, TickReport};
pub use ranking::{FeedRanker, RankedPost};
pub use reply::HumanReplyEvaluator;
pub use selector::AgentSelector;
