//! Binary frames carried over the control and message streams.
//!
//! Every frame starts with a one-byte opcode. Frames with a body follow
//! the opcode with a big-endian `u32` length and that many bytes of JSON.

use crate::api::MessageReceipt;
use crate::error::ProtoError;
use crate::message::Message;

/// Acknowledges a control signal or a delivered message.
pub const OPCODE_ACK: u8 = 0x0B;
/// The container's configuration changed on the fog node.
pub const OPCODE_CONTROL_SIGNAL: u8 = 0x0C;
/// A data message.
pub const OPCODE_MESSAGE: u8 = 0x0D;
/// Receipt for a message the container published.
pub const OPCODE_RECEIPT: u8 = 0x0E;

const LEN_PREFIX: usize = 4;

/// A decoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Acknowledgement.
    Ack,
    /// New configuration is available.
    ControlSignal,
    /// Data message.
    Message(Message),
    /// Receipt for a published message.
    Receipt(MessageReceipt),
}

impl Frame {
    /// Opcode byte for this frame.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::Ack => OPCODE_ACK,
            Self::ControlSignal => OPCODE_CONTROL_SIGNAL,
            Self::Message(_) => OPCODE_MESSAGE,
            Self::Receipt(_) => OPCODE_RECEIPT,
        }
    }

    /// Encode the frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized or exceeds
    /// `u32::MAX` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let body = match self {
            Self::Ack | Self::ControlSignal => return Ok(vec![self.opcode()]),
            Self::Message(msg) => serde_json::to_vec(msg),
            Self::Receipt(receipt) => serde_json::to_vec(receipt),
        }
        .map_err(|e| ProtoError::Encoding(e.to_string()))?;

        let len = u32::try_from(body.len())
            .map_err(|_| ProtoError::Encoding(format!("frame body too large: {}", body.len())))?;

        let mut out = Vec::with_capacity(1 + LEN_PREFIX + body.len());
        out.push(self.opcode());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error for empty input, unknown opcodes, truncated or
    /// oversized bodies and malformed JSON.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let (&opcode, rest) = bytes
            .split_first()
            .ok_or_else(|| ProtoError::Decoding("empty frame".to_string()))?;

        match opcode {
            OPCODE_ACK => Ok(Self::Ack),
            OPCODE_CONTROL_SIGNAL => Ok(Self::ControlSignal),
            OPCODE_MESSAGE => Ok(Self::Message(Message::from_slice(body(rest)?)?)),
            OPCODE_RECEIPT => Ok(Self::Receipt(serde_json::from_slice(body(rest)?)?)),
            other => Err(ProtoError::UnknownOpcode(other)),
        }
    }
}

fn body(rest: &[u8]) -> Result<&[u8], ProtoError> {
    if rest.len() < LEN_PREFIX {
        return Err(ProtoError::Truncated {
            expected: LEN_PREFIX,
            actual: rest.len(),
        });
    }
    let (len, body) = rest.split_at(LEN_PREFIX);
    let expected = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;

    match body.len().cmp(&expected) {
        std::cmp::Ordering::Less => Err(ProtoError::Truncated {
            expected,
            actual: body.len(),
        }),
        std::cmp::Ordering::Greater => Err(ProtoError::Decoding(format!(
            "{} trailing bytes after frame body",
            body.len() - expected
        ))),
        std::cmp::Ordering::Equal => Ok(body),
    }
}
