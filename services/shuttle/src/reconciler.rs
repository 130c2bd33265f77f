//! Per-fid diff between the hub's live inventory and the store.
//!
//! The hook is awaited before advancing to the next message; that
//! sequencing is the caller's backpressure control and is deliberately not
//! parallelized here. Cancellation happens between batches: drop the future
//! and nothing is left half-applied, since the reconciler itself never
//! writes.

use std::collections::HashMap;
use std::future::Future;

use hub_protocol::{Message, MessageType};
use sqlx::PgPool;
use tracing::debug;

use crate::dispatcher::HandlerError;
use crate::hub_client::{HubClient, HubClientError};
use crate::repo::messages::{self, LifecycleRow};

/// Message types with add-semantics, the only ones worth diffing against
/// the hub's live inventory.
pub const RECONCILABLE_TYPES: [MessageType; 5] = [
    MessageType::CastAdd,
    MessageType::ReactionAdd,
    MessageType::LinkAdd,
    MessageType::VerificationAddAddress,
    MessageType::UserDataAdd,
];

/// Hub inventory page size.
pub const RECONCILE_PAGE_SIZE: u32 = 3000;

/// Caller hook invoked once per hub message, in hub order.
///
/// A row the store has marked deleted but the hub still returns reports all
/// flags false; deletion is not a reconciler signal.
pub trait ReconcileHandler: Send {
    fn on_hub_message(
        &mut self,
        message: Message,
        missing_in_db: bool,
        pruned_in_db: bool,
        revoked_in_db: bool,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("hub: {0}")]
    Hub(#[from] HubClientError),
    #[error("storage: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("handler: {0}")]
    Handler(#[source] HandlerError),
}

pub struct Reconciler {
    hub: HubClient,
    pool: PgPool,
}

impl Reconciler {
    pub fn new(hub: HubClient, pool: PgPool) -> Self {
        Self { hub, pool }
    }

    /// Reconcile every reconcilable message type for one fid. The first
    /// failed (fid, type) unit aborts; the caller may continue with other
    /// fids.
    pub async fn reconcile_fid<H: ReconcileHandler>(
        &self,
        fid: u64,
        handler: &mut H,
    ) -> Result<(), ReconcileError> {
        for message_type in RECONCILABLE_TYPES {
            self.reconcile_fid_type(fid, message_type, handler).await?;
        }
        Ok(())
    }

    /// Page the hub's inventory of one (fid, type) and surface the delta of
    /// each message to the handler.
    pub async fn reconcile_fid_type<H: ReconcileHandler>(
        &self,
        fid: u64,
        message_type: MessageType,
        handler: &mut H,
    ) -> Result<(), ReconcileError> {
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .hub
                .get_messages_by_fid(fid, message_type, RECONCILE_PAGE_SIZE, page_token.as_deref())
                .await?;
            debug!(fid, message_type = message_type.as_str(), batch = page.messages.len(), "inventory page");
            if !page.messages.is_empty() {
                self.diff_batch(fid, message_type, &page.messages, handler)
                    .await?;
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(()),
            }
        }
    }

    async fn diff_batch<H: ReconcileHandler>(
        &self,
        fid: u64,
        message_type: MessageType,
        batch: &[Message],
        handler: &mut H,
    ) -> Result<(), ReconcileError> {
        let hashes: Vec<Vec<u8>> = batch.iter().map(|m| m.hash.clone()).collect();
        let rows =
            messages::fetch_lifecycle_by_hashes(&self.pool, fid as i64, message_type, &hashes)
                .await?;
        let by_hash: HashMap<&[u8], &LifecycleRow> =
            rows.iter().map(|r| (r.hash.as_slice(), r)).collect();

        for message in batch {
            let (missing, pruned, revoked) = match by_hash.get(message.hash.as_slice()) {
                None => (true, false, false),
                Some(row) => (false, row.pruned_at.is_some(), row.revoked_at.is_some()),
            };
            handler
                .on_hub_message(message.clone(), missing, pruned, revoked)
                .await
                .map_err(ReconcileError::Handler)?;
        }
        Ok(())
    }
}
