use std::{fmt, io};

use quinn::{ConnectError, ConnectionError, ReadExactError, WriteError};
use tokio::task::JoinError;

use crate::engine;

#[derive(Debug)]
pub enum Error {
    Connect(ConnectError),
    Connection(ConnectionError),
    Io(io::Error),
    Write(WriteError),
    ReadExact(ReadExactError),
    Tls(rustls::Error),
    Certificate(rcgen::RcgenError),
    CouldNotEncodeMessage,
    CouldNotDecodeMessage,
    MessageLengthOverflowed,
    /// A frame of this kind arrived where the protocol does not allow it.
    ReceivedUnexpectedFrame(&'static str),
    /// The peer closed its stream before the exchange was complete.
    StreamClosed,
    BadAddress(String),
    EndpointClosed,
    Task(JoinError),
    Engine(engine::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect(e) => write!(f, "could not connect: {e}"),
            Error::Connection(e) => write!(f, "connection failed: {e}"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Write(e) => write!(f, "write failed: {e}"),
            Error::ReadExact(e) => write!(f, "read failed: {e}"),
            Error::Tls(e) => write!(f, "tls error: {e}"),
            Error::Certificate(e) => {
                write!(f, "could not generate certificate: {e}")
            }
            Error::CouldNotEncodeMessage => f.write_str("could not encode frame"),
            Error::CouldNotDecodeMessage => f.write_str("could not decode frame"),
            Error::MessageLengthOverflowed => {
                f.write_str("frame length exceeds the limit")
            }
            Error::ReceivedUnexpectedFrame(kind) => {
                write!(f, "received unexpected {kind} frame")
            }
            Error::StreamClosed => f.write_str("peer closed the stream"),
            Error::BadAddress(addr) => write!(f, "bad address {addr:?}"),
            Error::EndpointClosed => f.write_str("endpoint closed"),
            Error::Task(e) => write!(f, "task failed: {e}"),
            Error::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connect(e) => Some(e),
            Error::Connection(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Write(e) => Some(e),
            Error::ReadExact(e) => Some(e),
            Error::Tls(e) => Some(e),
            Error::Certificate(e) => Some(e),
            Error::Task(e) => Some(e),
            Error::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectError> for Error {
    fn from(error: ConnectError) -> Self {
        Self::Connect(error)
    }
}

impl From<ConnectionError> for Error {
    fn from(error: ConnectionError) -> Self {
        Self::Connection(error)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        Self::Write(e)
    }
}

impl From<ReadExactError> for Error {
    fn from(e: ReadExactError) -> Self {
        Self::ReadExact(e)
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e)
    }
}

impl From<rcgen::RcgenError> for Error {
    fn from(e: rcgen::RcgenError) -> Self {
        Self::Certificate(e)
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Self::Task(e)
    }
}

impl From<engine::Error> for Error {
    fn from(e: engine::Error) -> Self {
        Self::Engine(e)
    }
}
