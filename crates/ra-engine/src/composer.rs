//! # PostComposer
//!
//! Picks an author, asks it for a `{title, body}` post and routes the
//! result through the moderation queue.

use std::sync::Arc;

use rand::Rng;
use ra_core::{
    ActionType, AgentAction, AgentFilter, PersistenceStore, Post, Result, TargetType,
    TextGenerationPort,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::contracts::PostDraft;
use crate::generation::generate_text;
use crate::moderation::{ModerationGate, Published};
use crate::prompts::{compose_post_prompt, persona_system_prompt};
use crate::selector::AgentSelector;

/// The queued action and, once approved, the post it created.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPost {
    pub action: AgentAction,
    pub post: Option<Post>,
}

pub struct PostComposer {
    generator: Arc<dyn TextGenerationPort>,
    selector: AgentSelector,
    gate: ModerationGate,
}

impl PostComposer {
    pub fn new(store: Arc<dyn PersistenceStore>, generator: Arc<dyn TextGenerationPort>) -> Self {
        Self {
            generator,
            selector: AgentSelector::new(store.clone()),
            gate: ModerationGate::new(store),
        }
    }

    /// `Ok(None)` when the model output is not a usable post.
    #[instrument(skip(self, filter, rng))]
    pub async fn compose_post<R: Rng + Send>(
        &self,
        workspace_id: Uuid,
        filter: &AgentFilter,
        publish: bool,
        rng: &mut R,
    ) -> Result<Option<ComposedPost>> {
        let author = self.selector.select_post_author(workspace_id, filter, rng).await?;
        let raw = generate_text(
            self.generator.as_ref(),
            &persona_system_prompt(&author),
            &compose_post_prompt(&author),
        )
        .await?;
        let Some(draft) = PostDraft::parse(&raw) else {
            warn!(agent = %author.id, "generated post was not a {{title, body}} object");
            return Ok(None);
        };

        let action = self
            .gate
            .submit(
                AgentAction::proposed(
                    workspace_id,
                    author.id,
                    ActionType::Post,
                    TargetType::Post,
                    None,
                    draft.body,
                )
                .with_title(draft.title),
            )
            .await?;
        if !publish {
            info!(action = %action.id, agent = %author.id, "post queued for review");
            return Ok(Some(ComposedPost { action, post: None }));
        }

        let outcome = self.gate.approve(action.id).await?;
        let post = match outcome.published {
            Some(Published::Post(post)) => Some(post),
            _ => None,
        };
        Ok(Some(ComposedPost { action: outcome.action, post }))
    }
}
