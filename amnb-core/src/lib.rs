//! AMNB protocol core data types
//!
//! This crate provides basic data type definitions used by other AMNB crates.
//! AMNB users should not depend on this crate directly. Use the `amnb::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Message class, carried in the top three bits of the type/length byte.
///
/// The remaining five bits hold the payload length of a small message, or a value
/// above the inline capacity marking the extended (16-bit length) header form.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Type {
    /// Unaddressed notification, dispatched to matching listeners on every node.
    Broadcast = 0x00,
    /// Addressed call expecting exactly one reply from the destination node.
    Request = 0x40,
    /// Successful reply to a request, payload carries the return value.
    Response = 0x60,
    /// Protocol-level failure reply, payload carries one [`Error`] code.
    Error = 0x80,
    /// Application-level failure reply, payload carries a user-defined error value.
    UserError = 0xA0,
}

impl Type {
    pub const MASK: u8 = 0b1110_0000;

    pub const fn try_from_u8(code: u8) -> Option<Type> {
        match code & Self::MASK {
            0x00 => Some(Type::Broadcast),
            0x40 => Some(Type::Request),
            0x60 => Some(Type::Response),
            0x80 => Some(Type::Error),
            0xA0 => Some(Type::UserError),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }

    /// True for replies that satisfy an outstanding request.
    pub const fn is_reply(self) -> bool {
        matches!(self, Type::Response | Type::Error | Type::UserError)
    }
}

impl From<Type> for u8 {
    fn from(value: Type) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Type {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, InvalidValue> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// Protocol error codes carried in the one-byte payload of an `Error`-typed message
/// and surfaced to requesters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Error {
    /// No reply arrived within the response timeout.
    RequestTimeout = 1,
    /// The payload length does not match the handler's expected argument.
    WrongArgumentSize = 2,
    /// The destination node has no action bound to the requested command.
    NoAction = 3,
    /// The responder could not allocate or encode the reply payload.
    ResponseAllocationFailed = 4,
    /// The requester could not allocate or encode the request payload.
    RequestAllocationFailed = 5,
    /// The reply is a user-defined error (see `UserError`-typed messages).
    UserError = 6,
    Unknown = 7,
}

impl Error {
    pub const fn try_from_u8(code: u8) -> Option<Error> {
        match code {
            1 => Some(Error::RequestTimeout),
            2 => Some(Error::WrongArgumentSize),
            3 => Some(Error::NoAction),
            4 => Some(Error::ResponseAllocationFailed),
            5 => Some(Error::RequestAllocationFailed),
            6 => Some(Error::UserError),
            7 => Some(Error::Unknown),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Error> for u8 {
    fn from(value: Error) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Error {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, InvalidValue> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}
