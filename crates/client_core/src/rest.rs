//! Typed calls against the control server's REST API.
//!
//! Every operation feeds its outcome into the [`Store`]: successes as the
//! matching transition, request and server failures as `SetError`. The error
//! is returned as well so the caller can react.

use std::{sync::Arc, time::Duration};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::CueId,
    protocol::{
        ControlCommand, CreateCueRequest, Cue, CueDraft, CueEnvelope, CuesEnvelope,
        SystemStatus, Transcription, TranscriptionsEnvelope, UpdateCueRequest,
    },
};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    store::{Store, Transition},
};

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    store: Arc<Store>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, store: Arc<Store>) -> Self {
        Self::with_http_client(Client::new(), base_url, store)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
        store: Arc<Store>,
    ) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http_client(http, base_url, store))
    }

    pub fn with_http_client(http: Client, base_url: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn fetch_status(&self) -> Result<SystemStatus, ClientError> {
        self.store.dispatch(Transition::SetLoading(true));
        let result: Result<SystemStatus, _> = self
            .send_json("fetch_status", self.http.get(self.url("/api/status")))
            .await;
        match result {
            Ok(status) => {
                self.store
                    .dispatch(Transition::ReplaceStatus(status.clone().into()));
                self.store.dispatch(Transition::SetLoading(false));
                Ok(status)
            }
            Err(err) => {
                let err = self.fail("fetch_status", err);
                // set-error already ends loading; transport failures skip it.
                if !err.is_user_visible() {
                    self.store.dispatch(Transition::SetLoading(false));
                }
                Err(err)
            }
        }
    }

    pub async fn fetch_cues(&self) -> Result<Vec<Cue>, ClientError> {
        let body: CuesEnvelope = self
            .send_json("fetch_cues", self.http.get(self.url("/api/cues")))
            .await
            .map_err(|err| self.fail("fetch_cues", err))?;
        self.store.dispatch(Transition::ReplaceCues(body.cues.clone()));
        Ok(body.cues)
    }

    pub async fn create_cue(&self, draft: &CueDraft) -> Result<Cue, ClientError> {
        let request = self
            .http
            .post(self.url("/api/cues"))
            .json(&CreateCueRequest::from(draft));
        let body: CueEnvelope = self
            .send_json("create_cue", request)
            .await
            .map_err(|err| self.fail("create_cue", err))?;
        info!(cue_id = %body.cue.id, "rest: cue created");
        self.store.dispatch(Transition::AddCue(body.cue.clone()));
        Ok(body.cue)
    }

    pub async fn update_cue(&self, id: CueId, draft: &CueDraft) -> Result<Cue, ClientError> {
        let request = self
            .http
            .put(self.url(&format!("/api/cues/{id}")))
            .json(&UpdateCueRequest::new(id, draft));
        let body: CueEnvelope = self
            .send_json("update_cue", request)
            .await
            .map_err(|err| self.fail("update_cue", err))?;
        self.store.dispatch(Transition::UpdateCue(body.cue.clone()));
        Ok(body.cue)
    }

    pub async fn delete_cue(&self, id: CueId) -> Result<(), ClientError> {
        self.send_empty("delete_cue", self.http.delete(self.url(&format!("/api/cues/{id}"))))
            .await
            .map_err(|err| self.fail("delete_cue", err))?;
        self.store.dispatch(Transition::DeleteCue(id));
        Ok(())
    }

    pub async fn fetch_transcriptions(&self) -> Result<Vec<Transcription>, ClientError> {
        let body: TranscriptionsEnvelope = self
            .send_json(
                "fetch_transcriptions",
                self.http.get(self.url("/api/transcriptions")),
            )
            .await
            .map_err(|err| self.fail("fetch_transcriptions", err))?;
        self.store.dispatch(Transition::ReplaceTranscriptions(
            body.transcriptions.clone(),
        ));
        Ok(body.transcriptions)
    }

    /// Pulls status, cues and transcription history concurrently. Each call
    /// reports into the store on its own; the first failure is returned.
    pub async fn sync_all(&self) -> Result<(), ClientError> {
        let (status, cues, transcriptions) = tokio::join!(
            self.fetch_status(),
            self.fetch_cues(),
            self.fetch_transcriptions(),
        );
        status?;
        cues?;
        transcriptions?;
        Ok(())
    }

    /// Asks the server to play a cue. Playback state arrives later as push events.
    pub async fn play_cue(&self, id: CueId) -> Result<Value, ClientError> {
        self.send_json("play_cue", self.http.get(self.url(&format!("/api/play/{id}"))))
            .await
            .map_err(|err| self.fail("play_cue", err))
    }

    /// Issues a control command, then re-pulls status instead of guessing its effect.
    pub async fn control(&self, command: ControlCommand) -> Result<Value, ClientError> {
        let ack = self
            .send_json(
                "control",
                self.http.get(self.url(&format!("/api/control/{command}"))),
            )
            .await
            .map_err(|err| self.fail("control", err))?;
        info!(%command, "rest: control command accepted");
        self.fetch_status().await?;
        Ok(ack)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(operation, status = status.as_u16(), "rest: response");

        if !status.is_success() {
            if status.is_server_error() {
                warn!(operation, status = status.as_u16(), body = %text, "rest: server error");
            }
            return Err(ClientError::from_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|err| {
            warn!(operation, error = %err, "rest: undecodable response body");
            ClientError::malformed(status)
        })
    }

    async fn send_empty(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<(), ClientError> {
        let resp = request.send().await?;
        let status = resp.status();
        debug!(operation, status = status.as_u16(), "rest: response");
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await?;
        Err(ClientError::from_status(status, &text))
    }

    fn fail(&self, operation: &'static str, err: ClientError) -> ClientError {
        if err.is_user_visible() {
            warn!(operation, error = %err, "rest: request failed");
            self.store.dispatch(Transition::SetError(err.to_string()));
        } else {
            warn!(operation, error = %err, "rest: server unreachable");
        }
        err
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
