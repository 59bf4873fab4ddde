use std::env;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use url::Url;

use exam_core::model::{Question, SessionId};

use crate::collaborators::{
    CheatEvent, CheatEventSink, GradingClient, GradingReceipt, QuestionSetLoader, Readiness,
    SessionStatusProbe, SubmissionPayload,
};
use crate::error::CollaboratorError;

#[derive(Clone, Debug)]
pub struct CollaboratorConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
}

impl CollaboratorConfig {
    /// Read `EXAM_API_BASE_URL` and `EXAM_API_TOKEN`.
    ///
    /// Returns `None` when the base URL is unset, blank or not a valid URL.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let raw = env::var("EXAM_API_BASE_URL").ok()?;
        let base_url = parse_base_url(&raw)?;
        let api_token = env::var("EXAM_API_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Some(Self {
            base_url,
            api_token,
        })
    }

    fn endpoint(&self, session_id: &SessionId, tail: &str) -> Result<Url, CollaboratorError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CollaboratorError::Unavailable("base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["sessions", session_id.as_str(), tail]);
        Ok(url)
    }
}

fn parse_base_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Url::parse(trimmed).ok()
}

/// All four collaborator contracts over one HTTP client.
///
/// Endpoints live under `{base}/sessions/{id}/`: `status`, `questions`,
/// `submit` and `cheat-events`.
#[derive(Clone)]
pub struct HttpCollaborators {
    client: Client,
    config: Option<CollaboratorConfig>,
}

impl HttpCollaborators {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(CollaboratorConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<CollaboratorConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    fn request(
        &self,
        method: reqwest::Method,
        session_id: &SessionId,
        tail: &str,
    ) -> Result<RequestBuilder, CollaboratorError> {
        let config = self.config.as_ref().ok_or(CollaboratorError::Disabled)?;
        let url = config.endpoint(session_id, tail)?;
        let builder = self.client.request(method, url);
        Ok(match &config.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }
}

async fn check(response: Response) -> Result<Response, CollaboratorError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(CollaboratorError::HttpStatus(response.status()))
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Readiness,
}

#[async_trait]
impl SessionStatusProbe for HttpCollaborators {
    async fn status(&self, session_id: &SessionId) -> Result<Readiness, CollaboratorError> {
        let response = self
            .request(reqwest::Method::GET, session_id, "status")?
            .send()
            .await?;
        let body: StatusResponse = check(response).await?.json().await?;
        Ok(body.status)
    }
}

#[async_trait]
impl QuestionSetLoader for HttpCollaborators {
    async fn load(&self, session_id: &SessionId) -> Result<Vec<Question>, CollaboratorError> {
        let response = self
            .request(reqwest::Method::GET, session_id, "questions")?
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

#[async_trait]
impl GradingClient for HttpCollaborators {
    async fn submit(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<GradingReceipt, CollaboratorError> {
        let response = self
            .request(reqwest::Method::POST, &payload.session_id, "submit")?
            .json(payload)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

#[async_trait]
impl CheatEventSink for HttpCollaborators {
    async fn record(&self, event: &CheatEvent) -> Result<(), CollaboratorError> {
        let response = self
            .request(reqwest::Method::POST, &event.session_id, "cheat-events")?
            .json(event)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
