use alloc::vec::Vec;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::{Error, Type};
use crate::format::{DataCrc, HeaderCrc};

/// Largest payload carried inline, without heap storage.
pub const SMALL_PAYLOAD_SIZE: usize = 28;

/// Small header on the wire: crc8, address, command, type/length byte.
pub(crate) const SMALL_HEADER_SIZE: usize = 4;
/// The large header adds an explicit 16-bit length and the 16-bit payload checksum.
pub(crate) const LARGE_HEADER_SIZE: usize = 8;

/// Length-bits value marking the extended header form. Any value above the inline
/// capacity is accepted as the marker on reception.
pub(crate) const LARGE_LENGTH_MARK: u8 = !Type::MASK;

/// One AMNB frame: header fields plus an owned payload.
///
/// Payloads up to [`SMALL_PAYLOAD_SIZE`] bytes live inline; anything larger goes on
/// the heap. A large message received without local interest carries no storage at
/// all, so its payload accessors return `None`.
#[derive(Debug, Clone)]
pub struct Message {
    address: u8,
    command: u8,
    message_type: Type,
    large: bool,
    length: u16,
    header_crc: u8,
    data_crc: u16,
    storage: Storage,
}

#[derive(Debug, Clone)]
enum Storage {
    Small([u8; SMALL_PAYLOAD_SIZE]),
    Large(Vec<u8>),
    /// Large message whose payload was skipped or could not be allocated.
    Absent,
}

impl Default for Message {
    fn default() -> Self {
        Self::new(0, 0, Type::Broadcast)
    }
}

impl Message {
    /// Creates an empty message.
    pub fn new(address: u8, command: u8, message_type: Type) -> Self {
        Self {
            address,
            command,
            message_type,
            large: false,
            length: 0,
            header_crc: 0,
            data_crc: 0,
            storage: Storage::Small([0; SMALL_PAYLOAD_SIZE]),
        }
    }

    /// Creates a message owning a copy of `payload`.
    ///
    /// Returns `None` when the payload does not fit a 16-bit length or heap
    /// allocation fails.
    pub fn with_payload(
        address: u8,
        command: u8,
        message_type: Type,
        payload: &[u8],
    ) -> Option<Self> {
        let mut msg = Self::new(address, command, message_type);
        if payload.len() <= SMALL_PAYLOAD_SIZE {
            if let Storage::Small(data) = &mut msg.storage {
                data[..payload.len()].copy_from_slice(payload);
            }
        } else {
            if payload.len() > usize::from(u16::MAX) {
                return None;
            }
            let mut vec = alloc_payload(payload.len())?;
            vec.copy_from_slice(payload);
            msg.large = true;
            msg.storage = Storage::Large(vec);
        }
        msg.length = payload.len() as u16;
        Some(msg)
    }

    /// Creates a message carrying the postcard encoding of `value`.
    pub fn with_value<T: Serialize>(
        address: u8,
        command: u8,
        message_type: Type,
        value: &T,
    ) -> Option<Self> {
        let bytes = postcard::to_allocvec(value).ok()?;
        Self::with_payload(address, command, message_type, &bytes)
    }

    /// Creates an `Error`-typed message carrying one protocol error code.
    pub fn with_error(address: u8, command: u8, error: Error) -> Self {
        let mut msg = Self::new(address, command, Type::Error);
        if let Storage::Small(data) = &mut msg.storage {
            data[0] = error.into_u8();
        }
        msg.length = 1;
        msg
    }

    pub(crate) fn from_small_wire(
        header_crc: u8,
        address: u8,
        command: u8,
        message_type: Type,
        payload: &[u8],
    ) -> Self {
        let mut msg = Self::new(address, command, message_type);
        if let Storage::Small(data) = &mut msg.storage {
            data[..payload.len()].copy_from_slice(payload);
        }
        msg.length = payload.len() as u16;
        msg.header_crc = header_crc;
        msg
    }

    pub(crate) fn from_large_wire(
        header_crc: u8,
        address: u8,
        command: u8,
        message_type: Type,
        length: u16,
        data_crc: u16,
    ) -> Self {
        Self {
            address,
            command,
            message_type,
            large: true,
            length,
            header_crc,
            data_crc,
            storage: Storage::Absent,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn set_command(&mut self, command: u8) {
        self.command = command;
    }

    pub fn message_type(&self) -> Type {
        self.message_type
    }

    pub fn set_message_type(&mut self, message_type: Type) {
        self.message_type = message_type;
    }

    pub fn length(&self) -> usize {
        usize::from(self.length)
    }

    /// True when the message uses the extended header with an explicit 16-bit length.
    pub fn is_large(&self) -> bool {
        self.large
    }

    pub fn header_length(&self) -> usize {
        if self.large {
            LARGE_HEADER_SIZE
        } else {
            SMALL_HEADER_SIZE
        }
    }

    pub(crate) fn data_crc(&self) -> u16 {
        self.data_crc
    }

    /// Obtains heap storage for a large message's payload. Inline storage always
    /// succeeds; heap allocation may fail.
    pub(crate) fn allocate(&mut self) -> bool {
        if !self.large || matches!(self.storage, Storage::Large(_)) {
            return true;
        }
        match alloc_payload(self.length()) {
            Some(vec) => {
                self.storage = Storage::Large(vec);
                true
            }
            None => false,
        }
    }

    /// Releases heap storage and resets to an empty small message. A no-op on
    /// messages that own no heap block, so repeated calls are safe.
    pub fn deallocate(&mut self) {
        self.storage = Storage::Small([0; SMALL_PAYLOAD_SIZE]);
        self.large = false;
        self.length = 0;
    }

    /// Payload bytes, `None` when a large message carries no storage.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Small(data) => Some(&data[..self.length()]),
            Storage::Large(vec) => Some(vec),
            Storage::Absent => None,
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut [u8]> {
        let length = self.length();
        match &mut self.storage {
            Storage::Small(data) => Some(&mut data[..length]),
            Storage::Large(vec) => Some(vec),
            Storage::Absent => None,
        }
    }

    /// Decodes the payload as one postcard-encoded `T`, requiring the payload to be
    /// consumed exactly.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let payload = self.payload().ok_or(Error::ResponseAllocationFailed)?;
        match postcard::take_from_bytes::<T>(payload) {
            Ok((value, rest)) if rest.is_empty() => Ok(value),
            _ => Err(Error::WrongArgumentSize),
        }
    }

    /// (Re)computes the stored checksums. Must be called before transmission,
    /// after all header fields and payload bytes are final.
    pub fn set_valid(&mut self) {
        if self.large {
            let mut crc = DataCrc::default();
            if let Some(payload) = self.payload() {
                crc.add_bytes(payload);
            }
            self.data_crc = crc.get();
        }
        self.header_crc = self.compute_header_crc();
    }

    pub fn is_header_valid(&self) -> bool {
        self.header_crc == self.compute_header_crc()
    }

    pub fn is_data_valid(&self) -> bool {
        if !self.large {
            // Covered by the header checksum.
            return true;
        }
        match self.payload() {
            Some(payload) => {
                let mut crc = DataCrc::default();
                crc.add_bytes(payload);
                crc.get() == self.data_crc
            }
            None => false,
        }
    }

    /// Header bytes in wire order and the number of valid bytes.
    pub(crate) fn header_bytes(&self) -> ([u8; LARGE_HEADER_SIZE], usize) {
        let mut bytes = [0u8; LARGE_HEADER_SIZE];
        bytes[0] = self.header_crc;
        bytes[1] = self.address;
        bytes[2] = self.command;
        if self.large {
            bytes[3] = self.message_type.into_u8() | LARGE_LENGTH_MARK;
            bytes[4..6].copy_from_slice(&self.length.to_le_bytes());
            bytes[6..8].copy_from_slice(&self.data_crc.to_le_bytes());
            (bytes, LARGE_HEADER_SIZE)
        } else {
            bytes[3] = self.message_type.into_u8() | self.length as u8;
            (bytes, SMALL_HEADER_SIZE)
        }
    }

    fn compute_header_crc(&self) -> u8 {
        let (bytes, header_length) = self.header_bytes();
        let mut crc = HeaderCrc::default();
        crc.add_bytes(&bytes[1..header_length]);
        if !self.large {
            if let Some(payload) = self.payload() {
                crc.add_bytes(payload);
            }
        }
        crc.get()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.command == other.command
            && self.message_type == other.message_type
            && self.length == other.length
            && self.payload() == other.payload()
    }
}

impl Eq for Message {}

fn alloc_payload(length: usize) -> Option<Vec<u8>> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(length).ok()?;
    vec.resize(length, 0);
    Some(vec)
}
