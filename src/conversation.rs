//! `ConversationMemory` is an out-of-scope collaborator (spec section 1):
//! the core only needs a formatted recent-turns string or an empty one.
//! No concrete implementation ships here; callers inject whichever
//! session store they have.

use async_trait::async_trait;

#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Returns a formatted transcript of recent turns for `session_id`, or
    /// an empty string if there is no history (or no memory is wired up).
    async fn recent_turns(&self, session_id: &str) -> String;
}

pub struct NoopConversationMemory;

#[async_trait]
impl ConversationMemory for NoopConversationMemory {
    async fn recent_turns(&self, _session_id: &str) -> String {
        String::new()
    }
}
