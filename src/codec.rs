use std::collections::BTreeMap;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::contact::ContactRecord;
use crate::{ADDRESS_LEN, Address, Error, PublicKey, Trytes};

/// Separates the public key from the return address in an announcement.
pub const LINE_BREAK: &str = "9TANGLELINEBREAK9";

/// Marks the logical end of a payload.
pub const END: &str = "9ENDOFPAYLOAD9";

/// Separates fragment content from the sender tag.
pub const FIRST_BREAK: &str = "9FIRSTFRAGMENTBREAK9";

/// Separates the sender tag from the timestamp.
pub const SECOND_BREAK: &str = "9SECONDFRAGMENTBREAK9";

/// Tag attached to every transaction this protocol submits. 27 trytes.
pub const TRANSACTION_TAG: &str = "TANGLEGRAM9MESSENGER9999999";

/// Maximum message text length in characters.
pub const CHARACTER_LIMIT: usize = 105;

/// Length of the truncated sender digest attached to chat fragments.
pub const SENDER_TAG_LEN: usize = 30;

/// Length of the encoded millisecond timestamp.
pub const TIMESTAMP_LEN: usize = 16;

const MARKER_FIRST: char = 'A';
const MARKER_CONTINUATION: char = 'B';

/// Encode a public-key announcement: key, line break, return address, end.
pub fn encode_key_announcement(
    public_key: &PublicKey,
    return_address: &Address,
) -> Result<Trytes, Error> {
    let key = Trytes::from_bytes(public_key.as_bytes());
    Trytes::try_from(format!("{key}{LINE_BREAK}{return_address}{END}"))
}

/// Decode a public-key announcement.
///
/// The return address is read as exactly [`ADDRESS_LEN`] trytes between the
/// line break and the end marker.
pub fn decode_key_announcement(stream: &Trytes) -> Result<(PublicKey, Address), Error> {
    let raw = stream.as_str();

    let break_at = raw
        .find(LINE_BREAK)
        .ok_or_else(|| Error::MalformedPayload("announcement missing line break".to_string()))?;
    let end_at = raw
        .find(END)
        .ok_or_else(|| Error::MalformedPayload("announcement missing end marker".to_string()))?;
    if end_at < break_at {
        return Err(Error::MalformedPayload(
            "announcement end marker precedes line break".to_string(),
        ));
    }

    let address_part = &raw[break_at + LINE_BREAK.len()..end_at];
    if address_part.len() != ADDRESS_LEN {
        return Err(Error::MalformedPayload(format!(
            "announcement return address must be {ADDRESS_LEN} trytes, got {}",
            address_part.len()
        )));
    }

    let key_part = &raw[..break_at];
    if key_part.is_empty() {
        return Err(Error::MalformedPayload(
            "announcement carries no key".to_string(),
        ));
    }
    let key_bytes = Trytes::from_str(key_part)?.to_bytes()?;

    Ok((PublicKey::from(key_bytes), address_part.parse()?))
}

/// Encode a contact record (request or acceptance) as JSON wrapped in trytes.
pub fn encode_contact_record(record: &ContactRecord) -> Result<Trytes, Error> {
    let json = serde_json::to_vec(record)?;
    let body = Trytes::from_bytes(&json);
    Trytes::try_from(format!("{body}{END}"))
}

/// Decode a contact record, the inverse of [`encode_contact_record`].
pub fn decode_contact_record(stream: &Trytes) -> Result<ContactRecord, Error> {
    let raw = stream.as_str();
    let end_at = raw
        .find(END)
        .ok_or_else(|| Error::MalformedPayload("contact record missing end marker".to_string()))?;

    let json = Trytes::from_str(&raw[..end_at])?.to_bytes()?;
    Ok(serde_json::from_slice(&json)?)
}

/// Encode an asymmetrically encrypted chat-key payload.
pub fn encode_chat_key(ciphertext: &[u8]) -> Result<Trytes, Error> {
    let body = Trytes::from_bytes(ciphertext);
    Trytes::try_from(format!("{body}{END}"))
}

/// Decode a chat-key payload back to its ciphertext bytes.
pub fn decode_chat_key(stream: &Trytes) -> Result<Vec<u8>, Error> {
    let raw = stream.as_str();
    let end_at = raw
        .find(END)
        .ok_or_else(|| Error::MalformedPayload("chat key payload missing end marker".to_string()))?;
    Trytes::from_str(&raw[..end_at])?.to_bytes()
}

/// Truncated digest identifying a sender on chat fragments.
///
/// Attribution only, not authentication: the digest of the sender's public
/// key, truncated to [`SENDER_TAG_LEN`] trytes.
pub fn sender_tag(public_key: &PublicKey) -> Trytes {
    let digest = Sha256::digest(public_key.as_bytes());
    Trytes::from_bytes(&digest[..SENDER_TAG_LEN / 2])
}

/// Position of a fragment within its two-part message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentMarker {
    First,
    Continuation,
}

impl FragmentMarker {
    fn as_char(self) -> char {
        match self {
            Self::First => MARKER_FIRST,
            Self::Continuation => MARKER_CONTINUATION,
        }
    }

    fn from_char(value: char) -> Result<Self, Error> {
        match value {
            MARKER_FIRST => Ok(Self::First),
            MARKER_CONTINUATION => Ok(Self::Continuation),
            other => Err(Error::MalformedPayload(format!(
                "unknown fragment marker {other:?}"
            ))),
        }
    }
}

/// One half of a chat message as written to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatFragment {
    pub part: Trytes,
    pub sender_tag: Trytes,
    pub timestamp: u64,
    pub marker: FragmentMarker,
}

impl ChatFragment {
    /// Encode: content, first break, sender tag, second break, timestamp,
    /// trailing marker.
    pub fn encode(&self) -> Result<Trytes, Error> {
        let timestamp = Trytes::from_bytes(&self.timestamp.to_be_bytes());
        Trytes::try_from(format!(
            "{}{FIRST_BREAK}{}{SECOND_BREAK}{timestamp}{}",
            self.part,
            self.sender_tag,
            self.marker.as_char()
        ))
    }

    /// Decode a fragment, the inverse of [`ChatFragment::encode`].
    pub fn decode(stream: &Trytes) -> Result<Self, Error> {
        let raw = stream.as_str();

        let first_at = raw
            .find(FIRST_BREAK)
            .ok_or_else(|| Error::MalformedPayload("fragment missing first break".to_string()))?;
        let tail = &raw[first_at + FIRST_BREAK.len()..];

        let second_at = tail
            .find(SECOND_BREAK)
            .ok_or_else(|| Error::MalformedPayload("fragment missing second break".to_string()))?;
        let sender_part = &tail[..second_at];
        if sender_part.len() != SENDER_TAG_LEN {
            return Err(Error::MalformedPayload(format!(
                "fragment sender tag must be {SENDER_TAG_LEN} trytes, got {}",
                sender_part.len()
            )));
        }

        let rest = &tail[second_at + SECOND_BREAK.len()..];
        if rest.len() != TIMESTAMP_LEN + 1 {
            return Err(Error::MalformedPayload(
                "fragment timestamp or marker truncated".to_string(),
            ));
        }

        let timestamp_bytes = Trytes::from_str(&rest[..TIMESTAMP_LEN])?.to_bytes()?;
        let timestamp_fixed: [u8; 8] = timestamp_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::MalformedPayload("fragment timestamp truncated".to_string()))?;

        let marker = rest
            .chars()
            .last()
            .ok_or_else(|| Error::MalformedPayload("fragment missing marker".to_string()))?;

        Ok(Self {
            part: Trytes::from_str(&raw[..first_at])?,
            sender_tag: Trytes::from_str(sender_part)?,
            timestamp: u64::from_be_bytes(timestamp_fixed),
            marker: FragmentMarker::from_char(marker)?,
        })
    }
}

/// Split an encrypted message into its two wire fragments.
///
/// Every message becomes exactly one first part and one continuation part;
/// readers pair them back by timestamp and sender tag.
pub fn fragment_message(
    ciphertext: &Trytes,
    sender_tag: &Trytes,
    timestamp: u64,
) -> Result<(Trytes, Trytes), Error> {
    let raw = ciphertext.as_str();
    let middle = raw.len().div_ceil(2);

    let first = ChatFragment {
        part: Trytes::from_str(&raw[..middle])?,
        sender_tag: sender_tag.clone(),
        timestamp,
        marker: FragmentMarker::First,
    };
    let continuation = ChatFragment {
        part: Trytes::from_str(&raw[middle..])?,
        sender_tag: sender_tag.clone(),
        timestamp,
        marker: FragmentMarker::Continuation,
    };

    Ok((first.encode()?, continuation.encode()?))
}

/// A message reassembled from a matched pair of fragments.
#[derive(Clone, Debug)]
pub struct PairedMessage<I> {
    /// Identifiers of the two source fragments, first part then continuation.
    pub sources: [I; 2],
    pub sender_tag: Trytes,
    pub timestamp: u64,
    pub ciphertext: Trytes,
}

/// Pair retrieved fragments into complete messages.
///
/// Fragments are grouped by `(timestamp, sender tag)`; a group completes only
/// when it holds exactly one first part and one continuation part. Groups
/// with a missing half, or with duplicate halves left over after discarding
/// byte-identical replays, stay pending and are retried on the next poll.
/// The result is ordered by timestamp.
pub fn pair_fragments<I: Clone>(fragments: Vec<(I, ChatFragment)>) -> Vec<PairedMessage<I>> {
    let mut groups: BTreeMap<(u64, String), Vec<(I, ChatFragment)>> = BTreeMap::new();
    for (id, fragment) in fragments {
        let key = (fragment.timestamp, fragment.sender_tag.as_str().to_string());
        let group = groups.entry(key).or_default();
        // A replayed transaction carries the exact same fragment; keep one.
        if !group.iter().any(|(_, seen)| seen == &fragment) {
            group.push((id, fragment));
        }
    }

    let mut messages = Vec::new();
    for ((timestamp, _), group) in groups {
        let firsts: Vec<_> = group
            .iter()
            .filter(|(_, f)| f.marker == FragmentMarker::First)
            .collect();
        let continuations: Vec<_> = group
            .iter()
            .filter(|(_, f)| f.marker == FragmentMarker::Continuation)
            .collect();

        let (first_entry, cont_entry) = match (firsts.as_slice(), continuations.as_slice()) {
            ([first], [continuation]) => (*first, *continuation),
            _ => continue,
        };
        let (first_id, first) = first_entry;
        let (cont_id, cont) = cont_entry;

        let ciphertext = match Trytes::try_from(format!("{}{}", first.part, cont.part)) {
            Ok(trytes) => trytes,
            Err(_) => continue,
        };

        messages.push(PairedMessage {
            sources: [first_id.clone(), cont_id.clone()],
            sender_tag: first.sender_tag.clone(),
            timestamp,
            ciphertext,
        });
    }

    messages
}
