//! Signed message -> insertable row conversion.
//!
//! Every error here is permanent: the caller logs, skips the message, and
//! moves on. Retrying a decode failure can never succeed.

use hub_protocol::{
    CastParent, Embed, Message, MessageBody, MessageValidationError, ReactionTarget,
    farcaster_time_to_datetime, farcaster_time_to_unix_ms, validate_message,
};
use serde_json::{Value, json};

use crate::repo::messages::MessageRow;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] MessageValidationError),
    #[error("message has no data section")]
    MissingBody,
    #[error("body is {actual} but message type is {expected}")]
    BodyMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("timestamp offset {0} is unrepresentable")]
    BadTimestamp(u32),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convert a hub message into the row shape persisted by the store.
///
/// Lifecycle flags on the returned row are all null; the store stamps the
/// flag implied by the operation it is applied under.
pub fn decode(msg: &Message) -> Result<MessageRow, DecodeError> {
    validate_message(msg)?;
    let data = msg.data.as_ref().ok_or(DecodeError::MissingBody)?;
    if data.body.message_type() != data.message_type {
        return Err(DecodeError::BodyMismatch {
            expected: data.message_type.as_str(),
            actual: data.body.message_type().as_str(),
        });
    }
    let timestamp =
        farcaster_time_to_datetime(data.timestamp).ok_or(DecodeError::BadTimestamp(data.timestamp))?;

    Ok(MessageRow {
        fid: data.fid as i64,
        message_type: data.message_type,
        timestamp,
        hash_scheme: msg.hash_scheme,
        signature_scheme: msg.signature_scheme,
        hash: msg.hash.clone(),
        signer: msg.signer.clone(),
        raw: serde_json::to_vec(msg)?,
        body: decode_body(&data.body),
        deleted_at: None,
        pruned_at: None,
        revoked_at: None,
    })
}

fn hex0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// An embed is either a bare url string or a cast reference object.
fn embed_value(embed: &Embed) -> Value {
    match embed {
        Embed::Url { url } => json!(url),
        Embed::Cast { cast_id } => json!({ "fid": cast_id.fid, "hash": hex0x(&cast_id.hash) }),
    }
}

fn parent_value(parent: &CastParent) -> Value {
    match parent {
        CastParent::Url { url } => json!(url),
        CastParent::Cast { cast_id } => json!({ "fid": cast_id.fid, "hash": hex0x(&cast_id.hash) }),
    }
}

fn target_value(target: &ReactionTarget) -> Value {
    match target {
        ReactionTarget::Url { url } => json!(url),
        ReactionTarget::Cast { cast_id } => json!({ "fid": cast_id.fid, "hash": hex0x(&cast_id.hash) }),
    }
}

/// Build the structured body blob stored in the `body` column.
///
/// Byte fields under verification variants are rendered in the protocol's
/// text form (0x-hex for Ethereum, base58 for Solana); all other byte
/// fields are 0x-hex. A link display timestamp is converted to unix
/// milliseconds.
fn decode_body(body: &MessageBody) -> Value {
    match body {
        MessageBody::CastAdd(b) => {
            let mut v = json!({
                "text": b.text,
                "embeds": b.embeds.iter().map(embed_value).collect::<Vec<_>>(),
                "mentions": b.mentions,
                "mentions_positions": b.mentions_positions,
            });
            if let Some(parent) = &b.parent {
                v["parent"] = parent_value(parent);
            }
            v
        }
        MessageBody::CastRemove(b) => json!({ "target_hash": hex0x(&b.target_hash) }),
        MessageBody::ReactionAdd(b) | MessageBody::ReactionRemove(b) => json!({
            "reaction_type": b.reaction_type,
            "target": target_value(&b.target),
        }),
        MessageBody::LinkAdd(b) | MessageBody::LinkRemove(b) => {
            let mut v = json!({
                "link_type": b.link_type,
                "target_fid": b.target_fid,
            });
            if let Some(offset) = b.display_timestamp {
                v["display_timestamp"] = json!(farcaster_time_to_unix_ms(offset));
            }
            v
        }
        MessageBody::VerificationAddAddress(b) => json!({
            "address": b.protocol.encode_bytes(&b.address),
            "claim_signature": b.protocol.encode_bytes(&b.claim_signature),
            "block_hash": b.protocol.encode_bytes(&b.block_hash),
            "protocol": b.protocol,
        }),
        MessageBody::VerificationRemove(b) => json!({
            "address": b.protocol.encode_bytes(&b.address),
            "protocol": b.protocol,
        }),
        MessageBody::UserDataAdd(b) => json!({
            "user_data_type": b.user_data_type,
            "value": b.value,
        }),
        MessageBody::UsernameProof(b) => json!({
            "timestamp": b.timestamp,
            "name": hex0x(&b.name),
            "owner": hex0x(&b.owner),
            "signature": hex0x(&b.signature),
            "fid": b.fid,
            "proof_type": b.proof_type,
        }),
    }
}
