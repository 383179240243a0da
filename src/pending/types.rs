use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::http::{Headers, Request};

/// Delivery state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
  /// Never attempted since being queued
  Pending,
  /// At least one replay failed; still eligible
  Retrying,
  /// Retry ceiling exceeded; kept for the user to inspect, never replayed
  FailedPermanent,
}

impl ActionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Retrying => "retrying",
      Self::FailedPermanent => "failed_permanent",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "retrying" => Ok(Self::Retrying),
      "failed_permanent" => Ok(Self::FailedPermanent),
      other => Err(eyre!("Unknown action status '{}'", other)),
    }
  }
}

/// A mutating call waiting for the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingAction {
  pub id: Uuid,
  pub method: String,
  pub url: String,
  pub headers: Headers,
  #[serde(skip)]
  pub payload: Option<Vec<u8>>,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
  pub status: ActionStatus,
  /// Earliest time a timer-driven pass may replay this action
  pub next_attempt_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

impl PendingAction {
  pub fn from_request(request: &Request) -> Self {
    Self {
      id: Uuid::new_v4(),
      method: request.method.as_str().to_string(),
      url: request.url.to_string(),
      headers: request.headers.clone(),
      payload: request.body.clone(),
      created_at: Utc::now(),
      retry_count: 0,
      status: ActionStatus::Pending,
      next_attempt_at: None,
      last_error: None,
    }
  }

  /// Rebuild the original call for replay.
  pub fn to_request(&self) -> Result<Request> {
    let method = Method::from_bytes(self.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", self.method, e))?;
    let url = Url::parse(&self.url).map_err(|e| eyre!("Invalid url '{}': {}", self.url, e))?;
    Ok(Request {
      method,
      url,
      headers: self.headers.clone(),
      body: self.payload.clone(),
    })
  }

  /// Whether a backoff-respecting pass should attempt this action at `now`.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.status != ActionStatus::FailedPermanent
      && self.next_attempt_at.map_or(true, |at| at <= now)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_round_trip_keeps_payload_and_headers() {
    let request = Request::new(
      Method::PUT,
      Url::parse("https://app.test/api/projects/3").unwrap(),
    )
    .with_header("Content-Type", "application/json")
    .with_body(r#"{"name":"Depot"}"#);

    let action = PendingAction::from_request(&request);
    assert_eq!(action.status, ActionStatus::Pending);
    assert_eq!(action.retry_count, 0);

    let replay = action.to_request().unwrap();
    assert_eq!(replay.method, Method::PUT);
    assert_eq!(replay.url, request.url);
    assert_eq!(replay.body, request.body);
    assert_eq!(replay.headers.get("content-type").map(String::as_str), Some("application/json"));
  }

  #[test]
  fn test_due_respects_backoff_and_terminal_state() {
    let request = Request::new(Method::POST, Url::parse("https://app.test/api/users").unwrap());
    let mut action = PendingAction::from_request(&request);
    let now = Utc::now();
    assert!(action.is_due(now));

    action.next_attempt_at = Some(now + chrono::Duration::seconds(30));
    assert!(!action.is_due(now));
    assert!(action.is_due(now + chrono::Duration::seconds(31)));

    action.next_attempt_at = None;
    action.status = ActionStatus::FailedPermanent;
    assert!(!action.is_due(now));
  }

  #[test]
  fn test_status_strings() {
    for status in [
      ActionStatus::Pending,
      ActionStatus::Retrying,
      ActionStatus::FailedPermanent,
    ] {
      assert_eq!(ActionStatus::parse(status.as_str()).unwrap(), status);
    }
    assert!(ActionStatus::parse("done").is_err());
  }
}
