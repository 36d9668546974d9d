//! Time-bounded, single-shot correlation against the network event stream.
//!
//! An [`EventWindow`] owns one private subscription to the shared
//! [`EventStream`]. It is opened *before* the action that triggers the
//! answer (submission or reload) so nothing emitted in between is missed,
//! then consumed by [`EventWindow::await_match`], which resolves exactly once
//! to a match or an expiry. The subscription is a `broadcast::Receiver`
//! owned by the window, so it is removed on every exit path: match, timeout,
//! stream closure, or the awaiting future being dropped.
//!
//! Each observed event goes through, in order:
//! 1. the coarse relevance filter (host and content type)
//! 2. the view filter (events tagged with another session view are dropped)
//! 3. the scope predicate (URL references the session's backend resource)
//! 4. body parsing (malformed bodies are skipped silently)
//! 5. payload extraction (empty extraction is not a match)
//!
//! A window without a known identifier only narrows to an announced one
//! when the announcement is tagged with the window's own view. Anything it
//! accepts before that is reported as [`Attribution::Unscoped`].

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

use harvest_types::config::CorrelationConfig;
use harvest_types::{EventStream, HarvestError, NetworkEvent};

use crate::payload::collect_field;

// ============================================================
// Correlation Rules
// ============================================================

/// Static rules shared by every window of a run.
#[derive(Debug)]
pub struct CorrelationRules {
    relevant_hosts: Vec<String>,
    content_type: String,
    payload_field: String,
    conversation_resource: String,
    discovery_field: String,
    session_pattern: Regex,
}

impl CorrelationRules {
    /// Build rules from config, compiling the session identifier pattern.
    pub fn from_config(config: &CorrelationConfig) -> Result<Self, HarvestError> {
        let pattern = format!("{}([0-9a-fA-F-]+)", regex::escape(&config.session_marker));
        let session_pattern = Regex::new(&pattern).map_err(|e| {
            HarvestError::Config(format!(
                "invalid correlation.session_marker '{}': {e}",
                config.session_marker
            ))
        })?;

        Ok(Self {
            relevant_hosts: config
                .relevant_hosts
                .iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            content_type: config.content_type.to_ascii_lowercase(),
            payload_field: config.payload_field.clone(),
            conversation_resource: config.conversation_resource.clone(),
            discovery_field: config.discovery_field.clone(),
            session_pattern,
        })
    }

    /// Whether the event belongs to the target service at all.
    pub fn is_relevant(&self, event: &NetworkEvent) -> bool {
        self.relevant_hosts
            .iter()
            .any(|host| event.url.contains(host.as_str()))
            && event
                .content_type
                .to_ascii_lowercase()
                .contains(&self.content_type)
    }

    /// Extract a session identifier from a location such as
    /// `https://chatgpt.com/c/6650f1a2-...`.
    pub fn session_id_from(&self, location: &str) -> Option<String> {
        self.session_pattern
            .captures(location)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|id| id.chars().any(|c| c.is_ascii_hexdigit()))
    }

    /// Whether `url` addresses the backend resource of exactly `session_id`.
    ///
    /// `.../conversation/abc` does not reference `ab`.
    pub fn references_session(&self, url: &str, session_id: &str) -> bool {
        let needle = format!("{}{}", self.conversation_resource, session_id);
        url.match_indices(&needle).any(|(start, matched)| {
            url[start + matched.len()..]
                .chars()
                .next()
                .is_none_or(|c| !(c.is_ascii_hexdigit() || c == '-'))
        })
    }

    /// Field holding answer fragments.
    pub fn payload_field(&self) -> &str {
        &self.payload_field
    }

    /// Identifier announced inside a parsed body, if any.
    fn discovered_session_id(&self, body: &Value) -> Option<String> {
        body.get(&self.discovery_field)
            .and_then(Value::as_str)
            .and_then(|href| self.session_id_from(href))
    }
}

// ============================================================
// Scope and Outcome
// ============================================================

/// Which events a window may accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationScope {
    /// Only events addressing this session's backend resource.
    Session(String),
    /// No identifier known: accept any relevant event, and narrow to the
    /// first identifier announced in an event body.
    Discovering,
}

impl CorrelationScope {
    /// Scope for an optional identifier.
    pub fn for_session(session_id: Option<&str>) -> Self {
        match session_id {
            Some(id) => CorrelationScope::Session(id.to_string()),
            None => CorrelationScope::Discovering,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            CorrelationScope::Session(id) => Some(id),
            CorrelationScope::Discovering => None,
        }
    }
}

/// What tied an accepted event to this window's conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// The identifier was known when the wait started.
    Session,
    /// The identifier was announced by the window's own view while waiting.
    Discovered,
    /// Nothing: the event was accepted on relevance alone.
    Unscoped,
}

/// How a window resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// The first accepted event's extracted fragments (never empty).
    Matched {
        fragments: Vec<Value>,
        attribution: Attribution,
    },
    /// No accepted event before the deadline (or the stream closed).
    Expired,
}

/// Outcome plus the scope the window ended in, which carries any
/// identifier discovered while waiting.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResolution {
    pub outcome: WindowOutcome,
    pub scope: CorrelationScope,
}

impl WindowResolution {
    /// Fragments of a match, `None` on expiry.
    pub fn into_fragments(self) -> Option<Vec<Value>> {
        match self.outcome {
            WindowOutcome::Matched { fragments, .. } => Some(fragments),
            WindowOutcome::Expired => None,
        }
    }
}

// ============================================================
// EventWindow
// ============================================================

/// One scoped subscription awaiting a single matching event.
pub struct EventWindow {
    rx: broadcast::Receiver<NetworkEvent>,
    rules: Arc<CorrelationRules>,
    view: Option<String>,
}

impl EventWindow {
    /// Subscribe to `stream`. Events published from now on are buffered
    /// until [`await_match`](Self::await_match) inspects them.
    pub fn open(stream: &EventStream, rules: Arc<CorrelationRules>) -> Self {
        Self {
            rx: stream.subscribe(),
            rules,
            view: None,
        }
    }

    /// Restrict the window to events from `view`. Untagged events still
    /// pass, but only tagged ones may announce an identifier.
    pub fn with_view(mut self, view: Option<&str>) -> Self {
        self.view = view.map(str::to_string);
        self
    }

    /// Wait up to `timeout` for the first event accepted under `scope`.
    ///
    /// Consumes the window: it resolves at most once and its subscription
    /// ends when this returns.
    pub async fn await_match(
        mut self,
        mut scope: CorrelationScope,
        timeout: Duration,
    ) -> WindowResolution {
        let deadline = Instant::now() + timeout;
        let known = matches!(scope, CorrelationScope::Session(_));

        loop {
            let event = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => break,
                Ok(Ok(event)) => event,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped, "event window fell behind the stream, events skipped");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => {
                    debug!("event stream closed while waiting");
                    break;
                }
            };

            if let Some(fragments) = self.inspect(&event, &mut scope) {
                let attribution = match &scope {
                    CorrelationScope::Session(_) if known => Attribution::Session,
                    CorrelationScope::Session(_) => Attribution::Discovered,
                    CorrelationScope::Discovering => Attribution::Unscoped,
                };
                return WindowResolution {
                    outcome: WindowOutcome::Matched {
                        fragments,
                        attribution,
                    },
                    scope,
                };
            }
        }

        WindowResolution {
            outcome: WindowOutcome::Expired,
            scope,
        }
    }

    /// Apply the filter chain to one event. `Some` means the window resolves.
    fn inspect(&self, event: &NetworkEvent, scope: &mut CorrelationScope) -> Option<Vec<Value>> {
        if !self.rules.is_relevant(event) {
            return None;
        }
        if let (Some(own), Some(other)) = (self.view.as_deref(), event.view.as_deref()) {
            if own != other {
                return None;
            }
        }
        if let CorrelationScope::Session(id) = &*scope {
            if !self.rules.references_session(&event.url, id) {
                return None;
            }
        }

        let body = event.parse_body()?;

        if *scope == CorrelationScope::Discovering {
            if let Some(id) = self.rules.discovered_session_id(&body) {
                let own_view = self.view.as_deref().is_some_and(|v| event.observed_in(v));
                if own_view {
                    debug!(session_id = %id, url = %event.url, "discovered session id in event stream");
                    let admits = self.rules.references_session(&event.url, &id);
                    *scope = CorrelationScope::Session(id);
                    if !admits {
                        return None;
                    }
                } else {
                    debug!(
                        session_id = %id,
                        view = event.view.as_deref().unwrap_or("-"),
                        "ignoring session id announced outside this view"
                    );
                }
            }
        }

        let fragments = collect_field(&body, self.rules.payload_field());
        (!fragments.is_empty()).then_some(fragments)
    }
}
