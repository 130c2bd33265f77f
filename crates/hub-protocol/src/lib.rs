// hub-protocol: Hub wire types and serialization.
//
// All WebSocket frames use a top-level `kind` field for discriminated
// deserialization, as do the tagged unions nested inside message bodies.
// Byte fields travel as lowercase hex strings (no 0x prefix on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Epoch-offset timestamps
// ---------------------------------------------------------------------------

/// Unix milliseconds of the hub epoch (2021-01-01T00:00:00Z). Message
/// timestamps are second offsets from this instant.
pub const FARCASTER_EPOCH_MS: i64 = 1_609_459_200_000;

/// Convert an epoch-offset timestamp to unix milliseconds.
pub fn farcaster_time_to_unix_ms(secs: u32) -> i64 {
    FARCASTER_EPOCH_MS + i64::from(secs) * 1000
}

/// Convert an epoch-offset timestamp to a wall-clock instant.
///
/// `None` when the resulting instant is unrepresentable; callers treat that
/// as a permanent decode failure.
pub fn farcaster_time_to_datetime(secs: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(farcaster_time_to_unix_ms(secs))
}

// ---------------------------------------------------------------------------
// Hex byte-string serde helper
// ---------------------------------------------------------------------------

/// Serde adapter for byte fields carried as hex strings.
///
/// Accepts an optional `0x` prefix on input; always emits bare lowercase hex.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Enumerated message kinds. The snake_case wire name doubles as the
/// `message_type` column value in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    CastAdd,
    CastRemove,
    ReactionAdd,
    ReactionRemove,
    LinkAdd,
    LinkRemove,
    VerificationAddAddress,
    VerificationRemove,
    UserDataAdd,
    UsernameProof,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CastAdd => "cast_add",
            Self::CastRemove => "cast_remove",
            Self::ReactionAdd => "reaction_add",
            Self::ReactionRemove => "reaction_remove",
            Self::LinkAdd => "link_add",
            Self::LinkRemove => "link_remove",
            Self::VerificationAddAddress => "verification_add_address",
            Self::VerificationRemove => "verification_remove",
            Self::UserDataAdd => "user_data_add",
            Self::UsernameProof => "username_proof",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cast_add" => Some(Self::CastAdd),
            "cast_remove" => Some(Self::CastRemove),
            "reaction_add" => Some(Self::ReactionAdd),
            "reaction_remove" => Some(Self::ReactionRemove),
            "link_add" => Some(Self::LinkAdd),
            "link_remove" => Some(Self::LinkRemove),
            "verification_add_address" => Some(Self::VerificationAddAddress),
            "verification_remove" => Some(Self::VerificationRemove),
            "user_data_add" => Some(Self::UserDataAdd),
            "username_proof" => Some(Self::UsernameProof),
            _ => None,
        }
    }
}

/// Content-address scheme of `Message.hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashScheme {
    Blake3,
}

impl HashScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
        }
    }
}

/// Signature scheme of the signed message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    Ed25519,
    Eip712,
}

impl SignatureScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Eip712 => "eip712",
        }
    }
}

/// Address protocol tag for verification bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Ethereum,
    Solana,
}

impl Protocol {
    /// Render raw bytes in the protocol's canonical text form: 0x-prefixed
    /// hex for Ethereum, base58 for Solana.
    pub fn encode_bytes(self, bytes: &[u8]) -> String {
        match self {
            Self::Ethereum => format!("0x{}", hex::encode(bytes)),
            Self::Solana => bs58::encode(bytes).into_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    Like,
    Recast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDataType {
    Pfp,
    Display,
    Bio,
    Url,
    Username,
    Location,
}

/// Kind of a username proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserNameType {
    Fname,
    EnsL1,
}

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

/// A reference to a cast by author and content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastId {
    pub fid: u64,
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
}

/// One embed inside a cast: either a bare url or a cast reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Embed {
    Url { url: String },
    Cast { cast_id: CastId },
}

/// Parent of a cast: a cast reference for replies, a url for channel roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CastParent {
    Url { url: String },
    Cast { cast_id: CastId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastAddBody {
    pub text: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// Fids mentioned in `text`.
    #[serde(default)]
    pub mentions: Vec<u64>,
    /// Byte offsets into `text`, one per entry in `mentions`.
    #[serde(default)]
    pub mentions_positions: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CastParent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastRemoveBody {
    /// Hash of the cast being removed.
    #[serde(with = "hex_bytes")]
    pub target_hash: Vec<u8>,
}

/// Target of a reaction: a cast or a url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReactionTarget {
    Cast { cast_id: CastId },
    Url { url: String },
}

/// Shared by reaction_add and reaction_remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionBody {
    pub reaction_type: ReactionType,
    pub target: ReactionTarget,
}

/// Shared by link_add and link_remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBody {
    /// E.g. "follow".
    pub link_type: String,
    pub target_fid: u64,
    /// Epoch-offset seconds; only meaningful on link_add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_timestamp: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationAddAddressBody {
    #[serde(with = "hex_bytes")]
    pub address: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub claim_signature: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub block_hash: Vec<u8>,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRemoveBody {
    #[serde(with = "hex_bytes")]
    pub address: Vec<u8>,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataBody {
    pub user_data_type: UserDataType,
    pub value: String,
}

/// A name-ownership proof. Unlike other bodies its timestamp is plain unix
/// seconds, not epoch-offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameProofBody {
    pub timestamp: u64,
    #[serde(with = "hex_bytes")]
    pub name: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub owner: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub fid: u64,
    pub proof_type: UserNameType,
}

/// Message body, discriminated on `kind`. The variant must agree with the
/// enclosing `MessageData.message_type`; disagreement is a decode failure,
/// not a store failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    CastAdd(CastAddBody),
    CastRemove(CastRemoveBody),
    ReactionAdd(ReactionBody),
    ReactionRemove(ReactionBody),
    LinkAdd(LinkBody),
    LinkRemove(LinkBody),
    VerificationAddAddress(VerificationAddAddressBody),
    VerificationRemove(VerificationRemoveBody),
    UserDataAdd(UserDataBody),
    UsernameProof(UsernameProofBody),
}

impl MessageBody {
    /// The message type this body variant belongs to.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CastAdd(_) => MessageType::CastAdd,
            Self::CastRemove(_) => MessageType::CastRemove,
            Self::ReactionAdd(_) => MessageType::ReactionAdd,
            Self::ReactionRemove(_) => MessageType::ReactionRemove,
            Self::LinkAdd(_) => MessageType::LinkAdd,
            Self::LinkRemove(_) => MessageType::LinkRemove,
            Self::VerificationAddAddress(_) => MessageType::VerificationAddAddress,
            Self::VerificationRemove(_) => MessageType::VerificationRemove,
            Self::UserDataAdd(_) => MessageType::UserDataAdd,
            Self::UsernameProof(_) => MessageType::UsernameProof,
        }
    }
}

// ---------------------------------------------------------------------------
// Signed messages
// ---------------------------------------------------------------------------

/// The signed content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub message_type: MessageType,
    pub fid: u64,
    /// Seconds since [`FARCASTER_EPOCH_MS`].
    pub timestamp: u32,
    pub body: MessageBody,
}

/// A cryptographically-signed user message as delivered by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Absent data is rejected at decode time (`missing_body`).
    pub data: Option<MessageData>,
    /// Content-addressed identifier over the serialized data.
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
    pub hash_scheme: HashScheme,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub signature_scheme: SignatureScheme,
    /// Public key (ed25519) or custody address (eip712) that signed.
    #[serde(with = "hex_bytes")]
    pub signer: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Truncated blake3 digest length used for message hashes.
pub const HASH_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageValidationError {
    #[error("hash must be {HASH_LEN} bytes, got {0}")]
    BadHashLength(usize),
    #[error("signature must be {expected} bytes for {scheme}, got {actual}")]
    BadSignatureLength {
        scheme: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("signer must be {expected} bytes for {scheme}, got {actual}")]
    BadSignerLength {
        scheme: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Structural validation of a signed message envelope.
///
/// Checks hash and key lengths against the declared schemes. Does not verify
/// the signature itself; the hub already did, and `raw` is persisted so a
/// downstream consumer can re-verify.
pub fn validate_message(msg: &Message) -> Result<(), MessageValidationError> {
    if msg.hash.len() != HASH_LEN {
        return Err(MessageValidationError::BadHashLength(msg.hash.len()));
    }
    let (sig_len, signer_len) = match msg.signature_scheme {
        SignatureScheme::Ed25519 => (64, 32),
        SignatureScheme::Eip712 => (65, 20),
    };
    if msg.signature.len() != sig_len {
        return Err(MessageValidationError::BadSignatureLength {
            scheme: msg.signature_scheme.as_str(),
            expected: sig_len,
            actual: msg.signature.len(),
        });
    }
    if msg.signer.len() != signer_len {
        return Err(MessageValidationError::BadSignerLength {
            scheme: msg.signature_scheme.as_str(),
            expected: signer_len,
            actual: msg.signer.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Hub events
// ---------------------------------------------------------------------------

/// Event kinds a subscription can be filtered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubEventType {
    MergeMessage,
    PruneMessage,
    RevokeMessage,
    MergeUsernameProof,
    MergeOnChainEvent,
}

/// The default subscription filter: everything the shuttle can absorb.
pub fn default_event_types() -> Vec<HubEventType> {
    vec![
        HubEventType::MergeOnChainEvent,
        HubEventType::MergeMessage,
        HubEventType::MergeUsernameProof,
        HubEventType::PruneMessage,
        HubEventType::RevokeMessage,
    ]
}

/// An on-chain registry event (id registration, signer add, storage rent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainEvent {
    pub fid: u64,
    pub block_number: u64,
    #[serde(with = "hex_bytes")]
    pub transaction_hash: Vec<u8>,
    pub log_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMessageBody {
    pub message: Message,
    /// Messages displaced by CRDT conflict resolution on the hub.
    #[serde(default)]
    pub deleted_messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneMessageBody {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeMessageBody {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeUsernameProofBody {
    pub username_proof: UsernameProofBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOnChainEventBody {
    pub on_chain_event: OnChainEvent,
}

/// Typed payload of a hub event, discriminated on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HubEventBody {
    MergeMessage(MergeMessageBody),
    PruneMessage(PruneMessageBody),
    RevokeMessage(RevokeMessageBody),
    MergeUsernameProof(MergeUsernameProofBody),
    MergeOnChainEvent(MergeOnChainEventBody),
}

impl HubEventBody {
    pub fn event_type(&self) -> HubEventType {
        match self {
            Self::MergeMessage(_) => HubEventType::MergeMessage,
            Self::PruneMessage(_) => HubEventType::PruneMessage,
            Self::RevokeMessage(_) => HubEventType::RevokeMessage,
            Self::MergeUsernameProof(_) => HubEventType::MergeUsernameProof,
            Self::MergeOnChainEvent(_) => HubEventType::MergeOnChainEvent,
        }
    }
}

/// One frame of the subscription stream.
///
/// `id` is assigned by the hub, monotonically increasing within a single
/// subscription, and is the value persisted by the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubEvent {
    pub id: u64,
    pub body: HubEventBody,
}

// ---------------------------------------------------------------------------
// Subscription wire frames
// ---------------------------------------------------------------------------

/// Frozen hub error codes.
pub mod error_codes {
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Terminal error frame (hub -> shuttle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// First frame of a subscription (shuttle -> hub).
///
/// `from_id` of `None` means "from the current stream head"; otherwise the
/// hub replays retained events with `id >= from_id` before going live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub event_types: Vec<HubEventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_id: Option<u64>,
}

/// All WebSocket frame kinds spoken on the subscription socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HubWsMessage {
    Subscribe(SubscribeRequest),
    Event(HubEvent),
    Error(HubError),
}

// ---------------------------------------------------------------------------
// Paged inventory API
// ---------------------------------------------------------------------------

/// One page of `GET /v1/messages/{fid}/{message_type}`.
///
/// An absent or empty `next_page_token` marks the final page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesPage {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast_add_message() -> Message {
        Message {
            data: Some(MessageData {
                message_type: MessageType::CastAdd,
                fid: 7,
                timestamp: 100_000_000,
                body: MessageBody::CastAdd(CastAddBody {
                    text: "gm".to_owned(),
                    embeds: vec![Embed::Url {
                        url: "https://example.com".to_owned(),
                    }],
                    mentions: vec![1],
                    mentions_positions: vec![0],
                    parent: Some(CastParent::Cast {
                        cast_id: CastId {
                            fid: 2,
                            hash: vec![0xab; HASH_LEN],
                        },
                    }),
                }),
            }),
            hash: vec![0x01; HASH_LEN],
            hash_scheme: HashScheme::Blake3,
            signature: vec![0x02; 64],
            signature_scheme: SignatureScheme::Ed25519,
            signer: vec![0x03; 32],
        }
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = cast_add_message();
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn body_kind_tag_is_snake_case() {
        let msg = cast_add_message();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["data"]["body"]["kind"], "cast_add");
        assert_eq!(value["data"]["body"]["embeds"][0]["kind"], "url");
    }

    #[test]
    fn hex_bytes_accepts_0x_prefix() {
        let json = r#"{"fid":1,"hash":"0x0102030405060708090a0b0c0d0e0f1011121314"}"#;
        let cast_id: CastId = serde_json::from_str(json).unwrap();
        assert_eq!(cast_id.hash.len(), HASH_LEN);
        assert_eq!(cast_id.hash[0], 0x01);
        // Output is bare lowercase hex.
        let out = serde_json::to_value(&cast_id).unwrap();
        assert_eq!(out["hash"], "0102030405060708090a0b0c0d0e0f1011121314");
    }

    #[test]
    fn ws_frame_round_trips() {
        let frame = HubWsMessage::Event(HubEvent {
            id: 42,
            body: HubEventBody::MergeMessage(MergeMessageBody {
                message: cast_add_message(),
                deleted_messages: vec![],
            }),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""kind":"event""#));
        let back: HubWsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn subscribe_frame_omits_absent_from_id() {
        let frame = HubWsMessage::Subscribe(SubscribeRequest {
            event_types: default_event_types(),
            from_id: None,
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("from_id").is_none());
    }

    #[test]
    fn message_type_text_form_round_trips() {
        for ty in [
            MessageType::CastAdd,
            MessageType::CastRemove,
            MessageType::ReactionAdd,
            MessageType::ReactionRemove,
            MessageType::LinkAdd,
            MessageType::LinkRemove,
            MessageType::VerificationAddAddress,
            MessageType::VerificationRemove,
            MessageType::UserDataAdd,
            MessageType::UsernameProof,
        ] {
            assert_eq!(MessageType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(MessageType::parse("cast"), None);
    }

    #[test]
    fn epoch_conversion_matches_known_instant() {
        // Offset 0 is exactly the epoch.
        assert_eq!(farcaster_time_to_unix_ms(0), FARCASTER_EPOCH_MS);
        let dt = farcaster_time_to_datetime(0).unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-01-01T00:00:00+00:00");
        // One hour in.
        assert_eq!(
            farcaster_time_to_datetime(3600).unwrap().to_rfc3339(),
            "2021-01-01T01:00:00+00:00"
        );
    }

    #[test]
    fn protocol_text_encodings() {
        let addr = [0x01u8, 0x02, 0x03];
        assert_eq!(Protocol::Ethereum.encode_bytes(&addr), "0x010203");
        assert_eq!(Protocol::Solana.encode_bytes(&addr), bs58::encode(addr).into_string());
    }

    #[test]
    fn validation_rejects_bad_lengths() {
        let mut msg = cast_add_message();
        assert!(validate_message(&msg).is_ok());

        msg.hash = vec![0x01; 32];
        assert_eq!(
            validate_message(&msg),
            Err(MessageValidationError::BadHashLength(32))
        );

        let mut msg = cast_add_message();
        msg.signature = vec![0x02; 65];
        assert!(matches!(
            validate_message(&msg),
            Err(MessageValidationError::BadSignatureLength { expected: 64, .. })
        ));

        let mut msg = cast_add_message();
        msg.signature_scheme = SignatureScheme::Eip712;
        msg.signature = vec![0x02; 65];
        msg.signer = vec![0x03; 20];
        assert!(validate_message(&msg).is_ok());
    }
}
