//! Two-phase execution for mutating operations.
//!
//! Anything that rewrites shared state (indexing a change, forgetting one,
//! purging a cached assessment) goes through preview first. The preview
//! carries a short-lived approval token; execution requires the caller to
//! echo that token back before the expiry, so a mutation is always the
//! second step of an explicit handshake.

use std::sync::Arc;

use gauge_cache::Clock;
use gauge_core::{ChangeRequest, RiskResult, content_hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EngineError, RiskEngine};

const DEFAULT_APPROVAL_TTL_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("approval expired at {expired_at}")]
    Expired { expired_at: i64 },
    #[error("approval token does not match this preview")]
    TokenMismatch,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineAction {
    IndexChange {
        request: ChangeRequest,
        risk: RiskResult,
    },
    ForgetChange {
        source_id: String,
    },
    PurgeCached {
        fingerprint: String,
    },
}

impl EngineAction {
    fn summary(&self) -> String {
        match self {
            Self::IndexChange { request, risk } => format!(
                "index change {} (risk {:.2}, {} files)",
                request.id,
                risk.overall_score,
                request.changed_file_count()
            ),
            Self::ForgetChange { source_id } => format!("forget indexed change {source_id}"),
            Self::PurgeCached { fingerprint } => {
                format!("purge cached assessment {fingerprint}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken(String);

impl ApprovalToken {
    fn issue(summary: &str, issued_at: i64, expires_at: i64) -> Self {
        Self(content_hash(&format!("{summary}\n{issued_at}\n{expires_at}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPreview {
    pub action: EngineAction,
    pub summary: String,
    pub issued_at: i64,
    pub expires_at: i64,
    token: ApprovalToken,
}

impl ActionPreview {
    /// The token the approving side must echo back to `execute`.
    pub fn token(&self) -> ApprovalToken {
        self.token.clone()
    }
}

pub struct ActionPlanner {
    clock: Arc<dyn Clock>,
    approval_ttl_secs: i64,
}

impl ActionPlanner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, DEFAULT_APPROVAL_TTL_SECS)
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, approval_ttl_secs: i64) -> Self {
        Self {
            clock,
            approval_ttl_secs: approval_ttl_secs.max(1),
        }
    }

    pub fn preview(&self, action: EngineAction) -> ActionPreview {
        let summary = action.summary();
        let issued_at = self.clock.now_unix();
        let expires_at = issued_at + self.approval_ttl_secs;
        let token = ApprovalToken::issue(&summary, issued_at, expires_at);

        ActionPreview {
            action,
            summary,
            issued_at,
            expires_at,
            token,
        }
    }

    /// Runs the previewed action once the approval checks out. Expiry is
    /// checked before the token so a stale approval reads as stale, not as
    /// tampered.
    pub async fn execute(
        &self,
        engine: &RiskEngine,
        preview: ActionPreview,
        token: &ApprovalToken,
    ) -> Result<(), ActionError> {
        let now = self.clock.now_unix();
        if now >= preview.expires_at {
            return Err(ActionError::Expired {
                expired_at: preview.expires_at,
            });
        }
        if *token != preview.token {
            return Err(ActionError::TokenMismatch);
        }

        match preview.action {
            EngineAction::IndexChange { request, risk } => {
                engine.index_change(&request, &risk).await?;
            }
            EngineAction::ForgetChange { source_id } => {
                engine.forget_change(&source_id).await;
            }
            EngineAction::PurgeCached { fingerprint } => {
                engine.purge_cached(&fingerprint).await;
            }
        }

        Ok(())
    }
}
