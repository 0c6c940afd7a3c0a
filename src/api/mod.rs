//! Typed client for the dashboard REST API. Consumers use it to re-fetch
//! authoritative state after a resync signal.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::models::{
    Capabilities, CategorizedMessage, Categorization, ContentBlock, Conversation, Delegation, Id,
    Message, Post,
};
use crate::services::channel::SessionCredentials;

/// REST collaborators of the real-time layer.
#[async_trait]
pub trait DashboardApi: Send + Sync + 'static {
    async fn send_message(&self, conversation_id: &str, content: Vec<ContentBlock>) -> AppResult<Message>;
    async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<Message>>;
    /// Messages with the viewer's own categorization attached.
    async fn get_categorized_messages(&self, conversation_id: &str) -> AppResult<Vec<CategorizedMessage>>;
    /// `user_id` lists another user's conversations, given delegated access.
    async fn list_conversations(&self, user_id: Option<&str>) -> AppResult<Vec<Conversation>>;
    async fn create_conversation(&self, user_ids: &[Id]) -> AppResult<Conversation>;
    async fn edit_conversation(&self, id: &str, title: &str) -> AppResult<Conversation>;
    async fn add_users_to_conversation(&self, id: &str, user_ids: &[Id]) -> AppResult<()>;
    async fn categorize(&self, message_content: &str, conversation_context: &[Message]) -> AppResult<Categorization>;
    async fn create_post(&self, content: Vec<ContentBlock>) -> AppResult<Post>;
    async fn delete_post(&self, id: &str) -> AppResult<()>;
    async fn get_posts(&self, user_id: &str) -> AppResult<Vec<Post>>;
    async fn create_delegation(&self, delegate_id: &str, capabilities: Capabilities) -> AppResult<Delegation>;
    async fn revoke_delegation(&self, delegate_id: &str) -> AppResult<()>;
    async fn list_delegations(&self) -> AppResult<Vec<Delegation>>;
}

#[derive(Clone)]
pub struct HttpDashboardApi {
    client: reqwest::Client,
    base_url: String,
    credentials: SessionCredentials,
    act_as: Option<Id>,
}

impl HttpDashboardApi {
    pub fn new(base_url: impl Into<String>, credentials: SessionCredentials) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            act_as: None,
        })
    }

    /// Same session, posting and messaging on behalf of `owner_id` (needs a delegation).
    pub fn acting_as(&self, owner_id: impl Into<Id>) -> Self {
        Self {
            act_as: Some(owner_id.into()),
            ..self.clone()
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.credentials.apply(self.client.request(method, url))
    }

    fn with_act_as(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.act_as {
            Some(owner) => request.query(&[("actAs", owner)]),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> AppResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(%status, url = %response.url(), "dashboard api response");
        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl DashboardApi for HttpDashboardApi {
    #[instrument(skip(self, content))]
    async fn send_message(&self, conversation_id: &str, content: Vec<ContentBlock>) -> AppResult<Message> {
        let request = self
            .request(Method::POST, &format!("/api/conversations/{}/messages", conversation_id))
            .json(&json!({ "content": content }));
        self.fetch(self.with_act_as(request)).await
    }

    #[instrument(skip(self))]
    async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
        self.fetch(self.request(Method::GET, &format!("/api/conversations/{}/messages", conversation_id)))
            .await
    }

    #[instrument(skip(self))]
    async fn get_categorized_messages(&self, conversation_id: &str) -> AppResult<Vec<CategorizedMessage>> {
        self.fetch(self.request(
            Method::GET,
            &format!("/api/conversations/{}/messages/categorized", conversation_id),
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn list_conversations(&self, user_id: Option<&str>) -> AppResult<Vec<Conversation>> {
        let mut request = self.request(Method::GET, "/api/conversations");
        if let Some(user_id) = user_id {
            request = request.query(&[("userId", user_id)]);
        }
        self.fetch(request).await
    }

    #[instrument(skip(self))]
    async fn create_conversation(&self, user_ids: &[Id]) -> AppResult<Conversation> {
        self.fetch(
            self.request(Method::POST, "/api/conversations")
                .json(&json!({ "userIds": user_ids })),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn edit_conversation(&self, id: &str, title: &str) -> AppResult<Conversation> {
        self.fetch(
            self.request(Method::PATCH, &format!("/api/conversations/{}", id))
                .json(&json!({ "title": title })),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn add_users_to_conversation(&self, id: &str, user_ids: &[Id]) -> AppResult<()> {
        self.send(
            self.request(Method::POST, &format!("/api/conversations/{}/users", id))
                .json(&json!({ "userIds": user_ids })),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, message_content, conversation_context))]
    async fn categorize(&self, message_content: &str, conversation_context: &[Message]) -> AppResult<Categorization> {
        self.fetch(self.request(Method::POST, "/api/messages/categorize").json(&json!({
            "messageContent": message_content,
            "conversationContext": conversation_context,
        })))
        .await
    }

    #[instrument(skip(self, content))]
    async fn create_post(&self, content: Vec<ContentBlock>) -> AppResult<Post> {
        let request = self
            .request(Method::POST, "/api/posts")
            .json(&json!({ "content": content }));
        self.fetch(self.with_act_as(request)).await
    }

    #[instrument(skip(self))]
    async fn delete_post(&self, id: &str) -> AppResult<()> {
        let request = self.request(Method::DELETE, &format!("/api/posts/{}", id));
        self.send(self.with_act_as(request)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_posts(&self, user_id: &str) -> AppResult<Vec<Post>> {
        self.fetch(self.request(Method::GET, &format!("/api/users/{}/posts", user_id)))
            .await
    }

    #[instrument(skip(self))]
    async fn create_delegation(&self, delegate_id: &str, capabilities: Capabilities) -> AppResult<Delegation> {
        self.fetch(self.request(Method::POST, "/api/delegations").json(&json!({
            "delegateId": delegate_id,
            "canPost": capabilities.can_post,
            "canMessage": capabilities.can_message,
            "canDeletePosts": capabilities.can_delete_posts,
        })))
        .await
    }

    #[instrument(skip(self))]
    async fn revoke_delegation(&self, delegate_id: &str) -> AppResult<()> {
        self.send(self.request(Method::DELETE, &format!("/api/delegations/{}", delegate_id)))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_delegations(&self) -> AppResult<Vec<Delegation>> {
        self.fetch(self.request(Method::GET, "/api/delegations")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageCategory;
    use httpmock::Method::{DELETE, GET, POST};
    use httpmock::MockServer;

    fn api(server: &MockServer) -> HttpDashboardApi {
        HttpDashboardApi::new(server.base_url(), SessionCredentials::Cookie("tok".into())).unwrap()
    }

    #[tokio::test]
    async fn sends_session_cookie_and_parses_messages() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/conversations/c1/messages")
                .header("cookie", "session=tok");
            then.status(200).json_body(serde_json::json!([
                { "id": "m1", "conversationId": "c1", "senderId": "u1", "content": "[{\"type\":\"text\",\"text\":\"hey\"}]" }
            ]));
        });

        let messages = api(&server).get_messages("c1").await.unwrap();
        mock.assert();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "hey");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/delegations");
            then.status(401);
        });
        let err = api(&server).list_delegations().await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn acting_as_adds_query_param() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/posts")
                .query_param("actAs", "owner")
                .body_contains("\"text\":\"launch day\"");
            then.status(201).json_body(serde_json::json!({
                "id": "p1", "content": [{ "type": "text", "text": "launch day" }],
                "createdBy": "me", "userId": "owner"
            }));
        });

        let post = api(&server)
            .acting_as("owner")
            .create_post(vec![ContentBlock::text("launch day")])
            .await
            .unwrap();
        mock.assert();
        assert_eq!(post.user_id, "owner");
        assert_eq!(post.created_by, "me");
    }

    #[tokio::test]
    async fn categorized_listing_and_revoke() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/conversations/c1/messages/categorized");
            then.status(200).json_body(serde_json::json!([
                { "id": "m1", "conversationId": "c1", "senderId": "u2", "content": "hi", "category": "urgent", "reasoning": "asap" }
            ]));
        });
        let revoke = server.mock(|when, then| {
            when.method(DELETE).path("/api/delegations/d1");
            then.status(204);
        });

        let client = api(&server);
        let listed = client.get_categorized_messages("c1").await.unwrap();
        assert_eq!(listed[0].category, Some(MessageCategory::Urgent));
        client.revoke_delegation("d1").await.unwrap();
        revoke.assert();
    }
}
