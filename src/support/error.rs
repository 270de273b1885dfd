//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mapistore.
//
// Mapistore is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mapistore is distributed in the hope  that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mapistore. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Handle does not refer to an object of the required kind")]
    NullObject,
    #[error("Object not found")]
    NotFound,
    #[error("Access denied")]
    AccessDenied,
    #[error("Message was modified through another transaction")]
    ObjectModified,
    #[error("Unsupported flag combination")]
    NotSupported,
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("Pending changes touch a read-only property")]
    ReadOnlyProperty,
    #[error("Identifier space exhausted")]
    StoreFull,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
}

impl Error {
    /// Return the MS-OXCDATA error code reported for this error.
    pub fn code(&self) -> ErrorCode {
        match *self {
            Error::NullObject => ErrorCode::NullObject,
            Error::NotFound => ErrorCode::NotFound,
            Error::AccessDenied => ErrorCode::AccessDenied,
            Error::ObjectModified => ErrorCode::ObjectModified,
            Error::NotSupported => ErrorCode::NotSupported,
            Error::InvalidParameter => ErrorCode::InvalidParameter,
            Error::ReadOnlyProperty
            | Error::StoreFull
            | Error::Io(..)
            | Error::Cbor(..) => ErrorCode::GeneralFailure,
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(e: tempfile::PersistError) -> Self {
        Error::Io(e.error)
    }
}

/// The subset of the MS-OXCDATA error vocabulary the engine can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0x0000_0000,
    NullObject = 0x0000_04B9,
    NotFound = 0x8004_010F,
    AccessDenied = 0x8007_0005,
    ObjectModified = 0x8004_0109,
    NotSupported = 0x8004_0102,
    InvalidParameter = 0x8007_0057,
    GeneralFailure = 0x8000_4005,
}

impl ErrorCode {
    pub fn value(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} (0x{:08X})", self, self.value())
    }
}
