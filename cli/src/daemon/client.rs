// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

use marshal_core::application::ApplicationStatus;
use marshal_core::domain::application::ApplicationConfiguration;
use marshal_core::domain::goal::TransitionRecord;

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    reason: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, port)
        } else {
            format!("http://{}:{}", host, port)
        };
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        // deletion waits for every container to stop
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1.0/{}", self.base_url, path)
    }

    /// Turns a non-success response into an error carrying the daemon's reason.
    async fn check(response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.reason)
            .unwrap_or(text);
        anyhow::bail!("Failed to {}: {} ({})", action, reason, status)
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/_ping", self.base_url))
            .send()
            .await
            .context("Daemon is not reachable")?;
        Self::check(response, "ping daemon").await?;
        Ok(())
    }

    pub async fn list_applications(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("applications"))
            .send()
            .await
            .context("Failed to list applications")?;

        Self::check(response, "list applications")
            .await?
            .json()
            .await
            .context("Failed to parse application list")
    }

    pub async fn create_application(
        &self,
        name: &str,
        configuration: &ApplicationConfiguration,
    ) -> Result<ApplicationStatus> {
        let response = self
            .client
            .put(self.url(&format!("applications/{}", name)))
            .json(configuration)
            .send()
            .await
            .context("Failed to create application")?;

        Self::check(response, "create application")
            .await?
            .json()
            .await
            .context("Failed to parse application status")
    }

    pub async fn delete_application(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("applications/{}", name)))
            .send()
            .await
            .context("Failed to delete application")?;

        Self::check(response, "delete application").await?;
        Ok(())
    }

    pub async fn application_status(&self, name: &str) -> Result<ApplicationStatus> {
        let response = self
            .client
            .get(self.url(&format!("applications/{}", name)))
            .send()
            .await
            .context("Failed to get application")?;

        Self::check(response, "get application")
            .await?
            .json()
            .await
            .context("Failed to parse application status")
    }

    pub async fn goal_logs(&self, application: &str, goal: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("applications/{}/goals/{}/logs", application, goal)))
            .send()
            .await
            .context("Failed to get goal logs")?;

        Self::check(response, "get goal logs")
            .await?
            .text()
            .await
            .context("Failed to read goal logs")
    }

    pub async fn transition_log(&self, application: &str, goal: &str) -> Result<Vec<TransitionRecord>> {
        let response = self
            .client
            .get(self.url(&format!(
                "applications/{}/goals/{}/transition_log",
                application, goal
            )))
            .send()
            .await
            .context("Failed to get transition log")?;

        Self::check(response, "get transition log")
            .await?
            .json()
            .await
            .context("Failed to parse transition log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marshal_core::domain::goal::GoalState;

    #[tokio::test]
    async fn test_list_applications() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1.0/applications")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"["billing","shop"]"#)
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        let names = client.list_applications().await.unwrap();
        assert_eq!(names, vec!["billing", "shop"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_reason_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/api/v1.0/applications/shop")
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(r#"{"reason":"Application \"shop\" already exists"}"#)
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        let configuration = ApplicationConfiguration::from_json_str(
            r#"{"main_goal":"web","goals":{"web":{"image":"nginx:1.27"}}}"#,
        )
        .unwrap();
        let err = client.create_application("shop", &configuration).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to create application: Application \"shop\" already exists (409 Conflict)"
        );
    }

    #[tokio::test]
    async fn test_application_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1.0/applications/shop")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"name":"shop","main_goal":"web","goals":{
                    "migrate":{"name":"migrate","status":"terminated","exit_code":0},
                    "web":{"name":"web","status":"running"}}}"#,
            )
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        let status = client.application_status("shop").await.unwrap();
        assert_eq!(status.main_goal, "web");
        assert_eq!(status.goals["migrate"].exit_code, Some(0));
        assert_eq!(status.goals["web"].status, GoalState::Running);
    }
}
