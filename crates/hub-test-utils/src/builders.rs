// builders: Deterministic signed-message and hub-event constructors.
//
// Hashes are sha256 digests of the builder inputs truncated to the message
// hash length, so equal inputs build equal messages and distinct inputs
// never collide in practice.

use hub_protocol::{
    CastAddBody, CastRemoveBody, HASH_LEN, HashScheme, HubEvent, HubEventBody, LinkBody,
    MergeMessageBody, Message, MessageBody, MessageData, MessageType, Protocol, PruneMessageBody,
    ReactionBody, ReactionTarget, ReactionType, RevokeMessageBody, SignatureScheme, UserDataBody,
    UserDataType, VerificationAddAddressBody,
};
use sha2::{Digest, Sha256};

/// A deterministic 20-byte hash derived from `seed`.
pub fn test_hash(seed: &str) -> Vec<u8> {
    Sha256::digest(seed.as_bytes())[..HASH_LEN].to_vec()
}

/// Wrap message data in a signed envelope with filler ed25519 key material.
pub fn signed(data: MessageData, hash: Vec<u8>) -> Message {
    Message {
        data: Some(data),
        hash,
        hash_scheme: HashScheme::Blake3,
        signature: vec![0x5a; 64],
        signature_scheme: SignatureScheme::Ed25519,
        signer: vec![0x6b; 32],
    }
}

pub fn cast_add(fid: u64, timestamp: u32, text: &str) -> Message {
    let hash = test_hash(&format!("cast_add/{fid}/{timestamp}/{text}"));
    signed(
        MessageData {
            message_type: MessageType::CastAdd,
            fid,
            timestamp,
            body: MessageBody::CastAdd(CastAddBody {
                text: text.to_owned(),
                embeds: vec![],
                mentions: vec![],
                mentions_positions: vec![],
                parent: None,
            }),
        },
        hash,
    )
}

pub fn cast_remove(fid: u64, timestamp: u32, target_hash: Vec<u8>) -> Message {
    let hash = test_hash(&format!(
        "cast_remove/{fid}/{timestamp}/{}",
        hex_string(&target_hash)
    ));
    signed(
        MessageData {
            message_type: MessageType::CastRemove,
            fid,
            timestamp,
            body: MessageBody::CastRemove(CastRemoveBody { target_hash }),
        },
        hash,
    )
}

pub fn reaction_add(fid: u64, timestamp: u32, target_url: &str) -> Message {
    let hash = test_hash(&format!("reaction_add/{fid}/{timestamp}/{target_url}"));
    signed(
        MessageData {
            message_type: MessageType::ReactionAdd,
            fid,
            timestamp,
            body: MessageBody::ReactionAdd(ReactionBody {
                reaction_type: ReactionType::Like,
                target: ReactionTarget::Url {
                    url: target_url.to_owned(),
                },
            }),
        },
        hash,
    )
}

pub fn link_add(fid: u64, timestamp: u32, target_fid: u64) -> Message {
    let hash = test_hash(&format!("link_add/{fid}/{timestamp}/{target_fid}"));
    signed(
        MessageData {
            message_type: MessageType::LinkAdd,
            fid,
            timestamp,
            body: MessageBody::LinkAdd(LinkBody {
                link_type: "follow".to_owned(),
                target_fid,
                display_timestamp: None,
            }),
        },
        hash,
    )
}

pub fn user_data_add(fid: u64, timestamp: u32, value: &str) -> Message {
    let hash = test_hash(&format!("user_data_add/{fid}/{timestamp}/{value}"));
    signed(
        MessageData {
            message_type: MessageType::UserDataAdd,
            fid,
            timestamp,
            body: MessageBody::UserDataAdd(UserDataBody {
                user_data_type: UserDataType::Bio,
                value: value.to_owned(),
            }),
        },
        hash,
    )
}

pub fn verification_add(fid: u64, timestamp: u32, protocol: Protocol, address: Vec<u8>) -> Message {
    let hash = test_hash(&format!(
        "verification_add/{fid}/{timestamp}/{}",
        hex_string(&address)
    ));
    signed(
        MessageData {
            message_type: MessageType::VerificationAddAddress,
            fid,
            timestamp,
            body: MessageBody::VerificationAddAddress(VerificationAddAddressBody {
                address,
                claim_signature: vec![0x7c; 65],
                block_hash: vec![0x8d; 32],
                protocol,
            }),
        },
        hash,
    )
}

pub fn merge_event(id: u64, message: Message) -> HubEvent {
    HubEvent {
        id,
        body: HubEventBody::MergeMessage(MergeMessageBody {
            message,
            deleted_messages: vec![],
        }),
    }
}

pub fn prune_event(id: u64, message: Message) -> HubEvent {
    HubEvent {
        id,
        body: HubEventBody::PruneMessage(PruneMessageBody { message }),
    }
}

pub fn revoke_event(id: u64, message: Message) -> HubEvent {
    HubEvent {
        id,
        body: HubEventBody::RevokeMessage(RevokeMessageBody { message }),
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
