use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LotteryError, Result};
use crate::instructions::LotteryEngine;
use crate::state::EditToken;

/// Issues a fresh token for the creator, invalidating any earlier one.
pub(crate) async fn process_issue_edit_token(
    engine: &LotteryEngine,
    id: &str,
    requester_id: i64,
    ttl: chrono::Duration,
) -> Result<EditToken> {
    let mut tx = engine.store.begin().await?;

    let lottery = tx.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    if lottery.creator_id != requester_id {
        return Err(LotteryError::PermissionDenied);
    }

    let token = EditToken {
        token: Uuid::new_v4().to_string(),
        lottery_id: lottery.id,
        expires_at: Utc::now() + ttl,
    };
    tx.replace_edit_token(&token).await?;
    tx.commit().await?;

    info!(lottery_id = %id, expires_at = %token.expires_at, "edit token issued");
    Ok(token)
}

/// Fails closed: anything short of a live token for this lottery is
/// `TokenInvalid`, storage errors included.
pub(crate) async fn process_validate_edit_token(engine: &LotteryEngine, id: &str, token: &str) -> Result<()> {
    match engine.store.find_edit_token(id, token).await {
        Ok(Some(found)) if found.lottery_id == id && found.is_live_at(Utc::now()) => Ok(()),
        Ok(_) => Err(LotteryError::TokenInvalid),
        Err(err) => {
            debug!(lottery_id = %id, error = %err, "edit token lookup failed");
            Err(LotteryError::TokenInvalid)
        }
    }
}
