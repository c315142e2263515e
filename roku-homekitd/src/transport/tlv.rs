//! TLV8 encoding used by the pairing endpoints.

use thiserror::Error;

pub const METHOD: u8 = 0x00;
pub const IDENTIFIER: u8 = 0x01;
pub const SALT: u8 = 0x02;
pub const PUBLIC_KEY: u8 = 0x03;
pub const PROOF: u8 = 0x04;
pub const ENCRYPTED_DATA: u8 = 0x05;
pub const STATE: u8 = 0x06;
pub const ERROR: u8 = 0x07;
pub const SIGNATURE: u8 = 0x0a;
pub const PERMISSIONS: u8 = 0x0b;
pub const SEPARATOR: u8 = 0xff;

pub const METHOD_ADD_PAIRING: u8 = 3;
pub const METHOD_REMOVE_PAIRING: u8 = 4;
pub const METHOD_LIST_PAIRINGS: u8 = 5;

/// Values of the `ERROR` item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingError {
    Unknown = 1,
    Authentication = 2,
    MaxTries = 5,
    Unavailable = 6,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("truncated TLV item at offset {0}")]
pub struct TlvError(usize);

/// An ordered list of items. Values longer than 255 bytes are split into
/// consecutive fragments on encode and joined again on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: u8, value: impl AsRef<[u8]>) -> Self {
        self.items.push((kind, value.as_ref().to_vec()));
        self
    }

    pub fn state(state: u8) -> Self {
        Self::new().with(STATE, [state])
    }

    pub fn error(state: u8, error: PairingError) -> Self {
        Self::state(state).with(ERROR, [error as u8])
    }

    /// First item of the given type
    pub fn get(&self, kind: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_slice())
    }

    pub fn byte(&self, kind: u8) -> Option<u8> {
        self.get(kind).and_then(|v| v.first().copied())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (kind, value) in &self.items {
            if value.is_empty() {
                out.extend_from_slice(&[*kind, 0]);
                continue;
            }
            for chunk in value.chunks(255) {
                out.push(*kind);
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TlvError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut offset = 0;
        let mut continues = false;

        while offset < bytes.len() {
            if offset + 2 > bytes.len() {
                return Err(TlvError(offset));
            }
            let kind = bytes[offset];
            let len = bytes[offset + 1] as usize;
            let end = offset + 2 + len;
            let value = bytes.get(offset + 2..end).ok_or(TlvError(offset))?;

            match items.last_mut() {
                Some((last, existing)) if continues && *last == kind => existing.extend_from_slice(value),
                _ => items.push((kind, value.to_vec())),
            }

            continues = len == 255;
            offset = end;
        }

        Ok(Self { items })
    }
}
