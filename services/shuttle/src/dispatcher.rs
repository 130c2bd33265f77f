//! Hub event -> transactional store application.
//!
//! One dispatcher consumes events from one subscriber and holds at most one
//! open transaction at a time. The checkpoint is advanced only after the
//! transaction that persisted an event commits, so a crash mid-event
//! redelivers it and the store absorbs the duplicate.

use std::future::Future;

use hub_protocol::{HubEvent, HubEventBody, Message};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::codec::{self, DecodeError};
use crate::repo::messages::{self, ApplyOutcome, StoreOperation};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Caller hook invoked inside the dispatch transaction, after the row is
/// applied. An error aborts the transaction and the checkpoint is not
/// advanced, so the event is redelivered on the next subscriber start.
pub trait MergeHandler: Send + Sync {
    fn on_message_merge(
        &self,
        message: &Message,
        tx: &mut Transaction<'_, Postgres>,
        operation: StoreOperation,
        was_missed: bool,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// Default handler: trace the merge, touch nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMergeHandler;

impl MergeHandler for LogMergeHandler {
    async fn on_message_merge(
        &self,
        message: &Message,
        _tx: &mut Transaction<'_, Postgres>,
        operation: StoreOperation,
        was_missed: bool,
    ) -> Result<(), HandlerError> {
        let fid = message.data.as_ref().map(|d| d.fid);
        debug!(?fid, ?operation, was_missed, "merged message");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("storage: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("handler: {0}")]
    Handler(#[source] HandlerError),
}

pub struct Dispatcher<H> {
    pool: PgPool,
    checkpoint: Checkpoint,
    hub_id: String,
    handler: H,
}

impl<H: MergeHandler> Dispatcher<H> {
    pub fn new(
        pool: PgPool,
        checkpoint: Checkpoint,
        hub_id: impl Into<String>,
        handler: H,
    ) -> Self {
        Self {
            pool,
            checkpoint,
            hub_id: hub_id.into(),
            handler,
        }
    }

    /// Drain events until the channel closes or an event fails.
    pub async fn run(&mut self, mut events_rx: mpsc::Receiver<HubEvent>) -> Result<(), DispatchError> {
        while let Some(event) = events_rx.recv().await {
            self.dispatch(event).await?;
        }
        Ok(())
    }

    /// Apply one hub event and advance the checkpoint.
    pub async fn dispatch(&mut self, event: HubEvent) -> Result<(), DispatchError> {
        match &event.body {
            HubEventBody::MergeMessage(body) => {
                self.merge_event(event.id, &body.message).await?;
            }
            // prune_message, revoke_message, merge_username_proof and
            // merge_on_chain_event are not applied to the store; this match
            // is the extension point for those arms. They still advance the
            // checkpoint so resume stays exact.
            other => {
                debug!(event_id = event.id, kind = ?other.event_type(), "unhandled event kind");
                self.checkpoint.save(&self.hub_id, event.id).await?;
            }
        }
        Ok(())
    }

    async fn merge_event(&mut self, event_id: u64, message: &Message) -> Result<(), DispatchError> {
        match self.apply_message(message, StoreOperation::Merge, false).await {
            Ok(_) => {}
            // Permanent: retrying can never succeed, so skip and advance.
            Err(DispatchError::Decode(e)) => {
                warn!(event_id, error = %e, "skipping undecodable message");
            }
            Err(e) => return Err(e),
        }
        self.checkpoint.save(&self.hub_id, event_id).await?;
        Ok(())
    }

    /// Apply a message under any operation, in one transaction, invoking the
    /// handler hook. Does not touch the checkpoint: event-driven callers
    /// advance it themselves after this returns.
    ///
    /// The subscriber wiring only ever passes `Merge`; the full tag set is
    /// exposed for out-of-band callers (explicit deletes, prune/revoke
    /// commands).
    pub async fn apply_message(
        &self,
        message: &Message,
        operation: StoreOperation,
        was_missed: bool,
    ) -> Result<ApplyOutcome, DispatchError> {
        let row = codec::decode(message)?;
        let mut tx = self.pool.begin().await?;
        let outcome = messages::apply(&mut tx, &row, operation).await?;
        if let Err(e) = self
            .handler
            .on_message_merge(message, &mut tx, operation, was_missed)
            .await
        {
            tx.rollback().await?;
            return Err(DispatchError::Handler(e));
        }
        tx.commit().await?;
        Ok(outcome)
    }

    /// Re-entry point for the reconciler: same transactional body as a
    /// merge dispatch, with `was_missed` flagged for the handler.
    pub async fn handle_missing(&self, message: &Message) -> Result<ApplyOutcome, DispatchError> {
        self.apply_message(message, StoreOperation::Merge, true).await
    }
}
