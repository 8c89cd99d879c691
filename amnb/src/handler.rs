use alloc::boxed::Box;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::{Error, Type};
use crate::message::Message;

/// Handler for incoming broadcasts, bound to one command id.
///
/// Broadcasts carry no reply channel, so argument validation failures are
/// silently dropped.
pub struct Listener {
    command: u8,
    callback: Box<dyn Fn(&Message)>,
}

impl Listener {
    /// Binds a callback taking only the sender address. Broadcasts carrying a
    /// payload are ignored.
    pub fn new(command: u8, listener: impl Fn(u8) + 'static) -> Self {
        Self {
            command,
            callback: Box::new(move |msg| {
                if msg.length() == 0 {
                    listener(msg.address());
                }
            }),
        }
    }

    /// Binds a callback taking a decoded argument. Broadcasts whose payload does
    /// not decode as exactly one `T` are ignored.
    pub fn with_argument<T, F>(command: u8, listener: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(u8, &T) + 'static,
    {
        Self {
            command,
            callback: Box::new(move |msg| {
                if let Ok(argument) = msg.decode::<T>() {
                    listener(msg.address(), &argument);
                }
            }),
        }
    }

    /// Binds a callback taking the raw payload bytes.
    pub fn with_payload(command: u8, listener: impl Fn(u8, &[u8]) + 'static) -> Self {
        Self {
            command,
            callback: Box::new(move |msg| {
                if let Some(payload) = msg.payload() {
                    listener(msg.address(), payload);
                }
            }),
        }
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub(crate) fn call(&self, msg: &Message) {
        (self.callback)(msg)
    }
}

/// Handler for incoming requests addressed to the local node, bound to one
/// command id. The returned [`Response`] travels back to the requester.
pub struct Action {
    command: u8,
    callback: Box<dyn FnMut(&Message) -> Response>,
}

impl Action {
    /// Binds a callback taking no argument. Requests carrying a payload are
    /// answered with [`Error::WrongArgumentSize`].
    pub fn new(command: u8, mut action: impl FnMut() -> Response + 'static) -> Self {
        Self {
            command,
            callback: Box::new(move |msg| {
                if msg.length() != 0 {
                    return Response::system_error(Error::WrongArgumentSize);
                }
                action()
            }),
        }
    }

    /// Binds a callback taking a decoded argument. A payload that does not decode
    /// as exactly one `T` is answered with [`Error::WrongArgumentSize`]; a payload
    /// whose storage could not be allocated with
    /// [`Error::ResponseAllocationFailed`].
    pub fn with_argument<T, F>(command: u8, mut action: F) -> Self
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> Response + 'static,
    {
        Self {
            command,
            callback: Box::new(move |msg| match msg.decode::<T>() {
                Ok(argument) => action(&argument),
                Err(error) => Response::system_error(error),
            }),
        }
    }

    /// Binds a callback taking the raw payload bytes.
    pub fn with_payload(command: u8, mut action: impl FnMut(&[u8]) -> Response + 'static) -> Self {
        Self {
            command,
            callback: Box::new(move |msg| match msg.payload() {
                Some(payload) => action(payload),
                None => Response::system_error(Error::ResponseAllocationFailed),
            }),
        }
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub(crate) fn call(&mut self, msg: &Message) -> Message {
        (self.callback)(msg).into_message()
    }
}

/// Outcome of an [`Action`]: success (empty or with a value), a user-defined
/// error, or a protocol error.
pub struct Response {
    msg: Message,
}

impl Response {
    /// Empty success reply.
    pub fn ok() -> Self {
        Self {
            msg: Message::new(0, 0, Type::Response),
        }
    }

    /// Success reply carrying `value`. Encoding or allocation failure degrades to
    /// a protocol [`Error::ResponseAllocationFailed`] reply.
    pub fn with<T: Serialize>(value: &T) -> Self {
        match Message::with_value(0, 0, Type::Response, value) {
            Some(msg) => Self { msg },
            None => Self::system_error(Error::ResponseAllocationFailed),
        }
    }

    /// Domain-error reply carrying a user-defined error value.
    pub fn error<E: Serialize>(error: &E) -> Self {
        match Message::with_value(0, 0, Type::UserError, error) {
            Some(msg) => Self { msg },
            None => Self::system_error(Error::ResponseAllocationFailed),
        }
    }

    pub(crate) fn system_error(error: Error) -> Self {
        Self {
            msg: Message::with_error(0, 0, error),
        }
    }

    fn into_message(self) -> Message {
        self.msg
    }
}

/// Failure outcome of a request, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError<E> {
    /// Protocol-level failure: timeout, argument mismatch, missing action,
    /// allocation failure.
    System(Error),
    /// The action answered with a user-defined error value.
    User(E),
}

/// Decodes a reply message into the caller-visible result.
pub(crate) fn decode_reply<T, E>(msg: &Message) -> Result<T, RequestError<E>>
where
    T: DeserializeOwned,
    E: DeserializeOwned,
{
    match msg.message_type() {
        Type::Response => msg.decode::<T>().map_err(RequestError::System),
        Type::UserError => match msg.decode::<E>() {
            Ok(error) => Err(RequestError::User(error)),
            Err(error) => Err(RequestError::System(error)),
        },
        Type::Error => {
            let code = msg
                .payload()
                .and_then(|payload| payload.first().copied())
                .unwrap_or(Error::Unknown.into_u8());
            Err(RequestError::System(
                Error::try_from_u8(code).unwrap_or(Error::Unknown),
            ))
        }
        _ => Err(RequestError::System(Error::Unknown)),
    }
}
