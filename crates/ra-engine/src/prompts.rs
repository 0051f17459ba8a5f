//! Prompt builders for the text-generation port.

use std::fmt;

use ra_core::{AgentProfile, AuthorType, Comment, Post};

/// Rolling context window fed to every generation call.
pub const CONTEXT_WINDOW: usize = 6;

/// Rhetorical posture assigned per participant per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stance {
    Support,
    Neutral,
    Challenge,
}

impl Stance {
    pub const CYCLE: [Stance; 3] = [Stance::Support, Stance::Neutral, Stance::Challenge];

    /// Stance of participant `index` in 1-based `round`.
    pub fn for_turn(round: usize, index: usize) -> Self {
        Self::CYCLE[(round + index) % Self::CYCLE.len()]
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::Support => "Build on the strongest point made so far and add new evidence for it.",
            Self::Neutral => "Weigh both sides fairly and point out what the thread is missing.",
            Self::Challenge => "Push back on the weakest claim in the thread with a concrete counterpoint.",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Support => write!(f, "support"),
            Self::Neutral => write!(f, "neutral"),
            Self::Challenge => write!(f, "challenge"),
        }
    }
}

/// System prompt describing who the persona is.
pub fn persona_system_prompt(agent: &AgentProfile) -> String {
    let topics = if agent.topics.is_empty() {
        "general interest".to_string()
    } else {
        agent.topics.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "You are {name} (@{handle}), a member of an online discussion community.\n\
         Your interests: {topics}.\n\
         Your writing style: {style}.\n\
         Stay in character, write in plain text, and never mention that you are an AI.",
        name = agent.display_name,
        handle = agent.handle,
        style = agent.style,
    )
}

fn render_thread(context: &[Comment]) -> String {
    if context.is_empty() {
        return "(no comments yet)".to_string();
    }
    context
        .iter()
        .map(|c| {
            let who = match c.author_type {
                AuthorType::Human => "human",
                AuthorType::Agent => "member",
            };
            format!("- [{who}] {}", c.body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn debate_prompt(post: &Post, context: &[Comment], stance: Stance) -> String {
    format!(
        "Post title: {title}\n\nPost:\n{body}\n\nRecent comments:\n{thread}\n\n\
         Your stance for this comment: {stance}. {instruction}\n\
         Reply with the comment text only, at most 120 words.",
        title = post.title,
        body = post.body,
        thread = render_thread(context),
        instruction = stance.instruction(),
    )
}

pub fn reply_decision_prompt(post: &Post, human: &Comment, context: &[Comment]) -> String {
    format!(
        "Post title: {title}\n\nRecent comments:\n{thread}\n\n\
         A human wrote:\n\"{comment}\"\n\n\
         Decide whether you, in character, would reply. Answer with a single JSON object:\n\
         {{\"should_respond\": bool, \"reasoning\": string, \
         \"response_type\": \"challenge\" | \"agree_and_expand\" | \"question\" | \"reframe\" | \"ignore\", \
         \"response\": string}}\n\
         Use \"ignore\" with an empty response when the comment does not merit a reply.",
        title = post.title,
        thread = render_thread(context),
        comment = human.body,
    )
}

pub fn compose_post_prompt(agent: &AgentProfile) -> String {
    format!(
        "Write a new discussion post that invites debate, drawing on your interests ({topics}).\n\
         Answer with a single JSON object: {{\"title\": string, \"body\": string}}. \
         Keep the title under 100 characters and the body under 200 words.",
        topics = agent.topics.iter().cloned().collect::<Vec<_>>().join(", "),
    )
}
