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

//! Identifiers, property values and flag words shared by the whole engine.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use chrono::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::support::error::Error;

/// Identifies a folder within the store.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct FolderId(pub u64);

/// Identifies a message within the store.
///
/// Message ids are allocated when a message is first saved and are never
/// reassigned.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

/// Identifies a recipient within one message's recipient table.
///
/// Row ids are chosen by the client; the engine only requires them to be
/// unique within the message.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct RowId(pub u32);

impl RowId {
    /// Passed to `ReadRecipients` to start at the first row.
    pub const FIRST: Self = RowId(0);
}

/// Identifies an attachment within one message (`PidTagAttachNumber`).
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct AttachmentId(pub u32);

/// Index of an object in a session's handle table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub u32);

/// The type half of a property tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropType {
    Integer16,
    Integer32,
    Boolean,
    Integer64,
    String8,
    Unicode,
    Time,
    Binary,
}

impl PropType {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0002 => Some(PropType::Integer16),
            0x0003 => Some(PropType::Integer32),
            0x000B => Some(PropType::Boolean),
            0x0014 => Some(PropType::Integer64),
            0x001E => Some(PropType::String8),
            0x001F => Some(PropType::Unicode),
            0x0040 => Some(PropType::Time),
            0x0102 => Some(PropType::Binary),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            PropType::Integer16 => 0x0002,
            PropType::Integer32 => 0x0003,
            PropType::Boolean => 0x000B,
            PropType::Integer64 => 0x0014,
            PropType::String8 => 0x001E,
            PropType::Unicode => 0x001F,
            PropType::Time => 0x0040,
            PropType::Binary => 0x0102,
        }
    }
}

/// A property tag: the property id in the high 16 bits and the type code in
/// the low 16 bits.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct PropTag(pub u32);

impl PropTag {
    pub const fn new(id: u16, type_code: u16) -> Self {
        PropTag(((id as u32) << 16) | type_code as u32)
    }

    pub fn id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn type_code(self) -> u16 {
        self.0 as u16
    }

    pub fn prop_type(self) -> Option<PropType> {
        PropType::from_code(self.type_code())
    }

    pub fn with_type(self, prop_type: PropType) -> Self {
        PropTag::new(self.id(), prop_type.code())
    }

    /// Whether this tag lies in the named-property range.
    pub fn is_named(self) -> bool {
        self.id() >= 0x8000
    }
}

impl fmt::Debug for PropTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PropTag(0x{:08X})", self.0)
    }
}

/// Well-known property tags.
pub mod tags {
    use super::PropTag;

    pub const READ_RECEIPT_REQUESTED: PropTag = PropTag(0x0029_000B);
    pub const IMPORTANCE: PropTag = PropTag(0x0017_0003);
    pub const MESSAGE_CLASS: PropTag = PropTag(0x001A_001F);
    pub const SENSITIVITY: PropTag = PropTag(0x0036_0003);
    pub const SUBJECT: PropTag = PropTag(0x0037_001F);
    pub const SUBJECT_PREFIX: PropTag = PropTag(0x003D_001F);
    pub const NON_RECEIPT_NOTIFICATION_REQUESTED: PropTag =
        PropTag(0x0C06_000B);
    pub const RECIPIENT_TYPE: PropTag = PropTag(0x0C15_0003);
    pub const SENDER_EMAIL_ADDRESS: PropTag = PropTag(0x0C1F_001F);
    pub const DISPLAY_BCC: PropTag = PropTag(0x0E02_001F);
    pub const DISPLAY_CC: PropTag = PropTag(0x0E03_001F);
    pub const DISPLAY_TO: PropTag = PropTag(0x0E04_001F);
    pub const MESSAGE_FLAGS: PropTag = PropTag(0x0E07_0003);
    pub const MESSAGE_SIZE: PropTag = PropTag(0x0E08_0003);
    pub const MESSAGE_STATUS: PropTag = PropTag(0x0E17_0003);
    pub const HAS_ATTACHMENTS: PropTag = PropTag(0x0E1B_000B);
    pub const NORMALIZED_SUBJECT: PropTag = PropTag(0x0E1D_001F);
    pub const ACCESS_LEVEL: PropTag = PropTag(0x0FF7_0003);
    pub const ENTRY_ID: PropTag = PropTag(0x0FFF_0102);
    pub const ROW_ID: PropTag = PropTag(0x3000_0003);
    pub const DISPLAY_NAME: PropTag = PropTag(0x3001_001F);
    pub const ADDRESS_TYPE: PropTag = PropTag(0x3002_001F);
    pub const EMAIL_ADDRESS: PropTag = PropTag(0x3003_001F);
    pub const CREATION_TIME: PropTag = PropTag(0x3007_0040);
    pub const LAST_MODIFICATION_TIME: PropTag = PropTag(0x3008_0040);
    pub const SEARCH_KEY: PropTag = PropTag(0x300B_0102);
    pub const DISPLAY_TYPE: PropTag = PropTag(0x3900_0003);
    pub const SMTP_ADDRESS: PropTag = PropTag(0x39FE_001F);
    pub const CREATOR_NAME: PropTag = PropTag(0x3FF8_001F);
    pub const LAST_MODIFIER_NAME: PropTag = PropTag(0x3FFA_001F);
    pub const READ_RECEIPT_EMAIL_ADDRESS: PropTag = PropTag(0x4029_001F);
    pub const CHANGE_KEY: PropTag = PropTag(0x65E2_0102);
    pub const HAS_NAMED_PROPERTIES: PropTag = PropTag(0x664A_000B);
    pub const LOCAL_COMMIT_TIME: PropTag = PropTag(0x6709_0040);
    pub const ATTACH_SIZE: PropTag = PropTag(0x0E20_0003);
    pub const ATTACH_NUMBER: PropTag = PropTag(0x0E21_0003);
    pub const ATTACH_DATA_BINARY: PropTag = PropTag(0x3701_0102);
    pub const ATTACH_EXTENSION: PropTag = PropTag(0x3703_001F);
    pub const ATTACH_FILENAME: PropTag = PropTag(0x3704_001F);
    pub const ATTACH_METHOD: PropTag = PropTag(0x3705_0003);
    pub const ATTACH_LONG_FILENAME: PropTag = PropTag(0x3707_001F);
    pub const RENDERING_POSITION: PropTag = PropTag(0x370B_0003);
    pub const ATTACH_MIME_TAG: PropTag = PropTag(0x370E_001F);
    pub const ATTACH_FLAGS: PropTag = PropTag(0x3714_0003);
}

/// A typed property value.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PropValue {
    Integer16(i16),
    Integer32(i32),
    Boolean(bool),
    Integer64(i64),
    String8(String),
    Unicode(String),
    Time(DateTime<Utc>),
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl PropValue {
    pub fn prop_type(&self) -> PropType {
        match *self {
            PropValue::Integer16(..) => PropType::Integer16,
            PropValue::Integer32(..) => PropType::Integer32,
            PropValue::Boolean(..) => PropType::Boolean,
            PropValue::Integer64(..) => PropType::Integer64,
            PropValue::String8(..) => PropType::String8,
            PropValue::Unicode(..) => PropType::Unicode,
            PropValue::Time(..) => PropType::Time,
            PropValue::Binary(..) => PropType::Binary,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            PropValue::String8(ref s) | PropValue::Unicode(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            PropValue::Integer32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            PropValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Convert between the two string representations, if this is a string.
    pub fn coerce_string(&self, target: PropType) -> Option<PropValue> {
        let s = self.as_str()?.to_owned();
        match target {
            PropType::Unicode => Some(PropValue::Unicode(s)),
            PropType::String8 => Some(PropValue::String8(s)),
            _ => None,
        }
    }

    /// The number of bytes this value occupies in a serialised property row.
    pub fn encoded_len(&self) -> usize {
        match *self {
            PropValue::Integer16(..) => 2,
            PropValue::Integer32(..) => 4,
            PropValue::Boolean(..) => 1,
            PropValue::Integer64(..) | PropValue::Time(..) => 8,
            PropValue::String8(ref s) => s.len() + 1,
            PropValue::Unicode(ref s) => (s.encode_utf16().count() + 1) * 2,
            PropValue::Binary(ref b) => 2 + b.len(),
        }
    }
}

macro_rules! serde_bits {
    ($t:ty, $repr:ty) => {
        impl Serialize for $t {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                self.bits().serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                <$repr>::deserialize(deserializer).map(<$t>::from_bits_truncate)
            }
        }
    };
}

bitflags! {
    /// The bits of `PidTagMessageFlags`.
    pub struct MessageFlags: u32 {
        const READ = 0x0000_0001;
        const UNMODIFIED = 0x0000_0002;
        const SUBMITTED = 0x0000_0004;
        const UNSENT = 0x0000_0008;
        const HAS_ATTACH = 0x0000_0010;
        const FROM_ME = 0x0000_0020;
        const FAI = 0x0000_0040;
        const RESEND = 0x0000_0080;
        const NOTIFY_READ = 0x0000_0100;
        const NOTIFY_UNREAD = 0x0000_0200;
        const EVER_READ = 0x0000_0400;
        const INTERNET = 0x0000_2000;
        const UNTRUSTED = 0x0000_8000;
    }
}

serde_bits!(MessageFlags, u32);

impl MessageFlags {
    /// Bits the client may no longer change once the message has been saved.
    pub const READ_ONLY_AFTER_SAVE: MessageFlags = MessageFlags {
        bits: 0x0000_0001 | 0x0000_0002 | 0x0000_0004 | 0x0000_0008
            | 0x0000_0010 | 0x0000_0080,
    };
}

/// The value of `PidTagMessageStatus`.
///
/// Unlike `MessageFlags`, arbitrary bits are preserved, since the status
/// word is manipulated purely through masks.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default,
)]
#[serde(transparent)]
pub struct MessageStatus(pub u32);

impl MessageStatus {
    pub const HIGHLIGHTED: u32 = 0x0000_0001;
    pub const TAGGED: u32 = 0x0000_0002;
    pub const HIDDEN: u32 = 0x0000_0004;
    pub const DEL_MARKED: u32 = 0x0000_0008;
    pub const DRAFT: u32 = 0x0000_0100;
    pub const ANSWERED: u32 = 0x0000_0200;
    pub const IN_CONFLICT: u32 = 0x0000_0800;
    pub const REMOTE_DOWNLOAD: u32 = 0x0000_1000;
    pub const REMOTE_DELETE: u32 = 0x0000_2000;

    /// Change the bits selected by `mask` to their values in `flags`.
    pub fn apply(self, flags: u32, mask: u32) -> Self {
        MessageStatus((self.0 & !mask) | (flags & mask))
    }
}

impl fmt::Debug for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MessageStatus(0x{:08X})", self.0)
    }
}

bitflags! {
    /// Folder permissions, as far as they concern Message objects.
    pub struct FolderRights: u32 {
        const READ_ANY = 0x0000_0001;
        const CREATE = 0x0000_0002;
        const EDIT_OWNED = 0x0000_0008;
        const DELETE_OWNED = 0x0000_0010;
        const EDIT_ANY = 0x0000_0020;
        const DELETE_ANY = 0x0000_0040;
        const FOLDER_OWNER = 0x0000_0100;
        const FOLDER_VISIBLE = 0x0000_0400;
    }
}

serde_bits!(FolderRights, u32);

impl FolderRights {
    /// Rights typically granted to the mailbox owner.
    pub fn owner() -> Self {
        FolderRights::all()
    }

    /// Rights for a user who may read but not change anything.
    pub fn reviewer() -> Self {
        FolderRights::READ_ANY | FolderRights::FOLDER_VISIBLE
    }

    pub fn can_read(self) -> bool {
        self.intersects(FolderRights::READ_ANY | FolderRights::FOLDER_OWNER)
    }

    /// Whether these rights allow modifying a message created by `creator`
    /// on behalf of `user`.
    pub fn can_edit(self, user: &str, creator: &str) -> bool {
        self.intersects(FolderRights::EDIT_ANY | FolderRights::FOLDER_OWNER)
            || (self.contains(FolderRights::EDIT_OWNED) && user == creator)
    }

    pub fn can_create(self) -> bool {
        self.intersects(FolderRights::CREATE | FolderRights::FOLDER_OWNER)
    }
}

/// The access requested by `RopOpenMessage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestedAccess {
    ReadOnly,
    ReadWrite,
    BestAccess,
}

/// The decoded `OpenModeFlags` byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenMode {
    pub access: RequestedAccess,
    pub open_soft_deleted: bool,
}

impl OpenMode {
    pub const READ_ONLY: u8 = 0x00;
    pub const READ_WRITE: u8 = 0x01;
    pub const BEST_ACCESS: u8 = 0x03;
    pub const OPEN_SOFT_DELETED: u8 = 0x04;

    /// Decode a raw mode byte.
    ///
    /// Values other than the four defined ones all decode to the same plain
    /// read-only mode.
    pub fn from_raw(raw: u8) -> Self {
        let (access, open_soft_deleted) = match raw {
            OpenMode::READ_WRITE => (RequestedAccess::ReadWrite, false),
            OpenMode::BEST_ACCESS => (RequestedAccess::BestAccess, false),
            OpenMode::OPEN_SOFT_DELETED => (RequestedAccess::ReadOnly, true),
            _ => (RequestedAccess::ReadOnly, false),
        };

        OpenMode {
            access,
            open_soft_deleted,
        }
    }
}

/// Values of `PidTagAttachMethod`.
pub mod attach_method {
    pub const NONE: i32 = 0x0000_0000;
    pub const BY_VALUE: i32 = 0x0000_0001;
    pub const BY_REFERENCE: i32 = 0x0000_0002;
    pub const BY_REFERENCE_ONLY: i32 = 0x0000_0004;
    pub const EMBEDDED_MESSAGE: i32 = 0x0000_0005;
    pub const STORAGE: i32 = 0x0000_0006;
}

/// The `OpenModeFlags` of `RopOpenEmbeddedMessage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddedOpenMode {
    ReadOnly,
    ReadWrite,
    /// Read/write, creating the embedded message if there is none yet.
    Create,
}

impl EmbeddedOpenMode {
    pub fn from_raw(raw: u8) -> Result<Self, Error> {
        match raw {
            0x00 => Ok(EmbeddedOpenMode::ReadOnly),
            0x01 => Ok(EmbeddedOpenMode::ReadWrite),
            0x02 => Ok(EmbeddedOpenMode::Create),
            _ => Err(Error::InvalidParameter),
        }
    }
}

/// The access actually granted to a Message handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

bitflags! {
    /// The `SaveFlags` of `RopSaveChangesMessage`.
    pub struct SaveFlags: u8 {
        const KEEP_OPEN_READ_ONLY = 0x01;
        const KEEP_OPEN_READ_WRITE = 0x02;
        const FORCE_SAVE = 0x04;
    }
}

impl SaveFlags {
    pub fn from_raw(raw: u8) -> Result<Self, Error> {
        let flags = SaveFlags::from_bits(raw).ok_or(Error::NotSupported)?;
        if flags.contains(
            SaveFlags::KEEP_OPEN_READ_ONLY | SaveFlags::KEEP_OPEN_READ_WRITE,
        ) {
            return Err(Error::NotSupported);
        }

        Ok(flags)
    }

    /// The access the handle retains after a successful save.
    pub fn access_after_save(self) -> Access {
        if self.intersects(
            SaveFlags::KEEP_OPEN_READ_WRITE | SaveFlags::FORCE_SAVE,
        ) {
            Access::ReadWrite
        } else {
            Access::ReadOnly
        }
    }
}

bitflags! {
    /// The `ReadFlags` of `RopSetReadFlags` and `RopSetMessageReadFlag`.
    ///
    /// The empty set is `rfDefault`.
    pub struct ReadFlags: u8 {
        const SUPPRESS_RECEIPT = 0x01;
        const CLEAR_READ_FLAG = 0x04;
        const GENERATE_RECEIPT_ONLY = 0x10;
        const CLEAR_NOTIFY_READ = 0x20;
        const CLEAR_NOTIFY_UNREAD = 0x40;
    }
}

impl ReadFlags {
    pub fn from_raw(raw: u8) -> Result<Self, Error> {
        ReadFlags::from_bits(raw).ok_or(Error::InvalidParameter)
    }
}

/// The kind of a recipient row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "u8", into = "u8")]
pub enum RecipientType {
    Primary,
    Cc,
    Bcc,
    Other(u8),
}

impl From<u8> for RecipientType {
    fn from(v: u8) -> Self {
        match v {
            0x01 => RecipientType::Primary,
            0x02 => RecipientType::Cc,
            0x03 => RecipientType::Bcc,
            v => RecipientType::Other(v),
        }
    }
}

impl From<RecipientType> for u8 {
    fn from(t: RecipientType) -> u8 {
        match t {
            RecipientType::Primary => 0x01,
            RecipientType::Cc => 0x02,
            RecipientType::Bcc => 0x03,
            RecipientType::Other(v) => v,
        }
    }
}

/// One entry of a message's recipient table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecipientRow {
    pub row_id: RowId,
    pub recipient_type: RecipientType,
    pub properties: BTreeMap<PropTag, PropValue>,
}

impl RecipientRow {
    pub fn display_name(&self) -> Option<&str> {
        self.properties
            .get(&tags::DISPLAY_NAME)
            .or_else(|| {
                self.properties
                    .get(&tags::DISPLAY_NAME.with_type(PropType::String8))
            })
            .and_then(PropValue::as_str)
    }

    /// The approximate size of this row in a response buffer: row id, type,
    /// flags, column count, then the values.
    pub fn encoded_len(&self) -> usize {
        9 + self
            .properties
            .values()
            .map(PropValue::encoded_len)
            .sum::<usize>()
    }
}
