use async_trait::async_trait;
use backend_core::{
    ActivityItem, BackendError, MemberProfile, MemberSummary, ProfileTarget, ThreadId, ThreadPage,
    UserId,
};

use crate::session::Session;

/// WordPress REST operations the runtime depends on.
///
/// Every call except [`ChatApi::login`] is made on behalf of a [`Session`]. A
/// rejected token surfaces as an `Auth` category error.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<Session, BackendError>;

    /// Check that a persisted token is still accepted.
    async fn validate_token(&self, session: &Session) -> Result<(), BackendError>;

    async fn list_threads(
        &self,
        session: &Session,
        page: u32,
        per_page: u16,
    ) -> Result<ThreadPage, BackendError>;

    /// Recent history of one thread, from Better Messages or the BuddyPress
    /// fallback.
    async fn get_thread(&self, session: &Session, thread_id: ThreadId)
    -> Result<ThreadPage, BackendError>;

    /// Post a reply. `client_token` is sent along for servers that echo it.
    async fn send_message(
        &self,
        session: &Session,
        thread_id: ThreadId,
        body: &str,
        client_token: &str,
    ) -> Result<(), BackendError>;

    /// Send a first message to `recipient_id`. Returns the thread id when the
    /// server reported one.
    async fn start_conversation(
        &self,
        session: &Session,
        recipient_id: UserId,
        subject: Option<&str>,
        body: &str,
    ) -> Result<Option<ThreadId>, BackendError>;

    async fn list_members(
        &self,
        session: &Session,
        page: u32,
        per_page: u16,
        search: Option<&str>,
    ) -> Result<Vec<MemberSummary>, BackendError>;

    async fn get_member(&self, session: &Session, user_id: UserId)
    -> Result<MemberSummary, BackendError>;

    async fn list_matches(&self, session: &Session) -> Result<Vec<MemberSummary>, BackendError>;

    /// One page of the site activity stream. A disabled activity component
    /// answers 404, which surfaces as a `Config` error.
    async fn list_activity(
        &self,
        session: &Session,
        page: u32,
        per_page: u16,
    ) -> Result<Vec<ActivityItem>, BackendError>;

    /// Member card plus extended profile. Only the member card is required;
    /// an unavailable extended profile yields empty groups.
    async fn get_profile(
        &self,
        session: &Session,
        target: ProfileTarget,
    ) -> Result<MemberProfile, BackendError>;
}
