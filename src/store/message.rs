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

//! The committed form of a Message object.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::model::*;
use super::overlay::{TransactionOverlay, View};
use crate::support::error::Error;
use crate::support::system_config::{EngineConfig, ReadOnlyPropertyPolicy};

/// Properties the client can never change.
const READ_ONLY_TAGS: &[PropTag] = &[
    tags::HAS_ATTACHMENTS,
    tags::MESSAGE_SIZE,
    tags::ACCESS_LEVEL,
    tags::SEARCH_KEY,
];

/// Properties maintained by the store itself. Client writes to these are
/// silently dropped on save.
const DERIVED_TAGS: &[PropTag] = &[
    tags::CREATION_TIME,
    tags::LAST_MODIFICATION_TIME,
    tags::LAST_MODIFIER_NAME,
    tags::CHANGE_KEY,
    tags::LOCAL_COMMIT_TIME,
    tags::HAS_NAMED_PROPERTIES,
    tags::MESSAGE_STATUS,
    tags::DISPLAY_TO,
    tags::DISPLAY_CC,
    tags::DISPLAY_BCC,
];

/// Attachment properties the client can never change.
const ATTACHMENT_READ_ONLY_TAGS: &[PropTag] =
    &[tags::ATTACH_SIZE, tags::ATTACH_NUMBER, tags::ACCESS_LEVEL];

/// Attachment properties maintained on save.
const ATTACHMENT_DERIVED_TAGS: &[PropTag] =
    &[tags::CREATION_TIME, tags::LAST_MODIFICATION_TIME];

/// A committed message, or the pending base of one that has never been
/// saved.
///
/// `PidTagMessageFlags` and `PidTagMessageStatus` are held outside the
/// property map since they are also changed outside of transactions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    properties: BTreeMap<PropTag, PropValue>,
    recipients: BTreeMap<RowId, RecipientRow>,
    flags: MessageFlags,
    status: MessageStatus,
    creator: String,
    soft_deleted: bool,
    #[serde(default)]
    attachments: BTreeMap<AttachmentId, Attachment>,
    /// Incremented by every save. Status and read flag changes do not
    /// affect it.
    version: u64,
}

impl Message {
    /// Create the initial state of a message created by `creator`.
    pub fn new_draft(
        creator: &str,
        associated: bool,
        config: &EngineConfig,
        now: DateTime<Utc>,
        search_key: Vec<u8>,
    ) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(tags::IMPORTANCE, PropValue::Integer32(1));
        properties.insert(
            tags::MESSAGE_CLASS,
            PropValue::Unicode("IPM.Note".to_owned()),
        );
        properties.insert(tags::SENSITIVITY, PropValue::Integer32(0));
        properties.insert(tags::DISPLAY_TO, PropValue::Unicode(String::new()));
        properties.insert(tags::DISPLAY_CC, PropValue::Unicode(String::new()));
        properties
            .insert(tags::DISPLAY_BCC, PropValue::Unicode(String::new()));
        properties.insert(tags::HAS_ATTACHMENTS, PropValue::Boolean(false));
        properties.insert(tags::CREATION_TIME, PropValue::Time(now));
        properties.insert(tags::LAST_MODIFICATION_TIME, PropValue::Time(now));
        properties.insert(
            tags::CREATOR_NAME,
            PropValue::Unicode(creator.to_owned()),
        );
        properties.insert(
            tags::LAST_MODIFIER_NAME,
            PropValue::Unicode(creator.to_owned()),
        );
        properties.insert(tags::SEARCH_KEY, PropValue::Binary(search_key));

        let mut flags = MessageFlags::READ | MessageFlags::UNSENT;
        if config.set_ever_read {
            flags |= MessageFlags::EVER_READ;
        }
        if associated {
            flags |= MessageFlags::FAI;
        }

        Message {
            properties,
            recipients: BTreeMap::new(),
            flags,
            status: MessageStatus::default(),
            creator: creator.to_owned(),
            soft_deleted: false,
            attachments: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn property(&self, tag: PropTag) -> Option<&PropValue> {
        self.properties.get(&tag)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&PropTag, &PropValue)> {
        self.properties.iter()
    }

    pub fn recipient(&self, row_id: RowId) -> Option<&RecipientRow> {
        self.recipients.get(&row_id)
    }

    pub fn recipients(&self) -> impl Iterator<Item = &RecipientRow> {
        self.recipients.values()
    }

    pub fn attachment(&self, id: AttachmentId) -> Option<&Attachment> {
        self.attachments.get(&id)
    }

    pub fn attachments(
        &self,
    ) -> impl Iterator<Item = (AttachmentId, &Attachment)> {
        self.attachments.iter().map(|(&id, a)| (id, a))
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: MessageFlags) {
        self.flags = flags;
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn set_status(&mut self, status: MessageStatus) {
        self.status = status;
    }

    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.soft_deleted
    }

    pub fn set_soft_deleted(&mut self, soft_deleted: bool) {
        self.soft_deleted = soft_deleted;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn change_key(&self) -> Option<&[u8]> {
        match self.properties.get(&tags::CHANGE_KEY) {
            Some(&PropValue::Binary(ref ck)) => Some(ck),
            _ => None,
        }
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match self.properties.get(&tags::LAST_MODIFICATION_TIME) {
            Some(&PropValue::Time(t)) => Some(t),
            _ => None,
        }
    }

    /// `PidTagMessageSize` as of the last save.
    pub fn size(&self) -> usize {
        self.properties
            .get(&tags::MESSAGE_SIZE)
            .and_then(PropValue::as_i32)
            .map_or(0, |s| s.max(0) as usize)
    }

    /// Apply the deltas in `overlay` to this message.
    ///
    /// On error, `self` may be partially modified; callers apply overlays to
    /// a private copy.
    pub fn apply(
        &mut self,
        overlay: &TransactionOverlay,
        config: &EngineConfig,
        first_save: bool,
    ) -> Result<(), Error> {
        let reject =
            ReadOnlyPropertyPolicy::Reject == config.read_only_properties;

        for (tag, value) in overlay.properties() {
            if tags::MESSAGE_FLAGS == tag {
                let requested = match value.and_then(PropValue::as_i32) {
                    Some(v) => MessageFlags::from_bits_truncate(v as u32),
                    None => continue,
                };

                if first_save {
                    self.flags = requested;
                } else {
                    let fixed = MessageFlags::READ_ONLY_AFTER_SAVE;
                    if !((requested ^ self.flags) & fixed).is_empty() && reject
                    {
                        return Err(Error::ReadOnlyProperty);
                    }
                    self.flags = (self.flags & fixed) | (requested - fixed);
                }
                continue;
            }

            if READ_ONLY_TAGS.contains(&tag) {
                if reject {
                    return Err(Error::ReadOnlyProperty);
                }
                continue;
            }

            if DERIVED_TAGS.contains(&tag) {
                continue;
            }

            match value {
                Some(value) => {
                    self.properties.insert(tag, value.clone());
                },
                None => {
                    self.properties.remove(&tag);
                },
            }
        }

        for &(tag, bit) in &[
            (tags::READ_RECEIPT_REQUESTED, MessageFlags::NOTIFY_READ),
            (
                tags::NON_RECEIPT_NOTIFICATION_REQUESTED,
                MessageFlags::NOTIFY_UNREAD,
            ),
        ] {
            if overlay.touches_property(tag) {
                let requested = self
                    .properties
                    .get(&tag)
                    .and_then(PropValue::as_bool)
                    .unwrap_or(false);
                self.flags.set(bit, requested);
            }
        }

        if config.set_ever_read && self.flags.contains(MessageFlags::READ) {
            self.flags |= MessageFlags::EVER_READ;
        }

        for (row_id, row) in overlay.recipients() {
            match row {
                Some(row) => {
                    self.recipients.insert(row_id, row.clone());
                },
                None => {
                    self.recipients.remove(&row_id);
                },
            }
        }

        for (id, attachment) in overlay.attachments() {
            match attachment {
                Some(attachment) => {
                    self.attachments.insert(id, attachment.clone());
                },
                None => {
                    self.attachments.remove(&id);
                },
            }
        }

        Ok(())
    }

    /// Update everything a save maintains on behalf of the client.
    pub fn finish_commit(
        &mut self,
        change_key: Vec<u8>,
        now: DateTime<Utc>,
        modifier: &str,
    ) {
        self.properties
            .insert(tags::CHANGE_KEY, PropValue::Binary(change_key));
        self.properties
            .insert(tags::LAST_MODIFICATION_TIME, PropValue::Time(now));
        self.properties
            .insert(tags::LOCAL_COMMIT_TIME, PropValue::Time(now));
        self.properties.insert(
            tags::LAST_MODIFIER_NAME,
            PropValue::Unicode(modifier.to_owned()),
        );

        for &(tag, kind) in &[
            (tags::DISPLAY_TO, RecipientType::Primary),
            (tags::DISPLAY_CC, RecipientType::Cc),
            (tags::DISPLAY_BCC, RecipientType::Bcc),
        ] {
            let names = self
                .recipients
                .values()
                .filter(|r| kind == r.recipient_type)
                .filter_map(RecipientRow::display_name)
                .collect::<Vec<_>>();
            self.properties
                .insert(tag, PropValue::Unicode(names.join("; ")));
        }

        let has_attachments = !self.attachments.is_empty();
        self.properties.insert(
            tags::HAS_ATTACHMENTS,
            PropValue::Boolean(has_attachments),
        );
        self.flags.set(MessageFlags::HAS_ATTACH, has_attachments);

        self.properties.remove(&tags::MESSAGE_SIZE);
        let size = self
            .properties
            .values()
            .map(PropValue::encoded_len)
            .chain(self.recipients.values().map(RecipientRow::encoded_len))
            .chain(self.attachments.values().map(Attachment::size))
            .sum::<usize>();
        self.properties.insert(
            tags::MESSAGE_SIZE,
            PropValue::Integer32(size.min(i32::MAX as usize) as i32),
        );

        self.version += 1;
    }
}

/// One row of a message's attachment table.
///
/// An embedded message is held as its own `Message`, saved independently of
/// the message it is attached to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    properties: BTreeMap<PropTag, PropValue>,
    embedded: Option<Arc<Message>>,
}

impl Attachment {
    pub fn new(id: AttachmentId, now: DateTime<Utc>) -> Self {
        let mut properties = BTreeMap::new();
        properties
            .insert(tags::ATTACH_NUMBER, PropValue::Integer32(id.0 as i32));
        properties.insert(tags::RENDERING_POSITION, PropValue::Integer32(-1));
        properties.insert(
            tags::ATTACH_METHOD,
            PropValue::Integer32(attach_method::NONE),
        );
        properties.insert(tags::ATTACH_SIZE, PropValue::Integer32(0));
        properties.insert(tags::CREATION_TIME, PropValue::Time(now));
        properties.insert(tags::LAST_MODIFICATION_TIME, PropValue::Time(now));

        Attachment {
            properties,
            embedded: None,
        }
    }

    pub fn property(&self, tag: PropTag) -> Option<&PropValue> {
        self.properties.get(&tag)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&PropTag, &PropValue)> {
        self.properties.iter()
    }

    pub fn embedded(&self) -> Option<&Arc<Message>> {
        self.embedded.as_ref()
    }

    pub fn set_embedded(&mut self, embedded: Option<Arc<Message>>) {
        self.embedded = embedded;
    }

    /// Apply the property deltas in `overlay` with the same read-only
    /// policy as messages.
    pub fn apply(
        &mut self,
        overlay: &TransactionOverlay,
        config: &EngineConfig,
    ) -> Result<(), Error> {
        for (tag, value) in overlay.properties() {
            if ATTACHMENT_READ_ONLY_TAGS.contains(&tag) {
                if ReadOnlyPropertyPolicy::Reject
                    == config.read_only_properties
                {
                    return Err(Error::ReadOnlyProperty);
                }
                continue;
            }

            if ATTACHMENT_DERIVED_TAGS.contains(&tag) {
                continue;
            }

            match value {
                Some(value) => {
                    self.properties.insert(tag, value.clone());
                },
                None => {
                    self.properties.remove(&tag);
                },
            }
        }

        Ok(())
    }

    /// Update the modification time and `PidTagAttachSize`.
    pub fn finish_save(&mut self, now: DateTime<Utc>) {
        self.properties
            .insert(tags::LAST_MODIFICATION_TIME, PropValue::Time(now));
        self.properties.remove(&tags::ATTACH_SIZE);
        let size = self
            .properties
            .values()
            .map(PropValue::encoded_len)
            .sum::<usize>()
            + self.embedded.as_ref().map_or(0, |m| m.size());
        self.properties.insert(
            tags::ATTACH_SIZE,
            PropValue::Integer32(size.min(i32::MAX as usize) as i32),
        );
    }

    /// The contribution of this attachment to `PidTagMessageSize`.
    fn size(&self) -> usize {
        self.properties
            .get(&tags::ATTACH_SIZE)
            .and_then(PropValue::as_i32)
            .map_or(0, |s| s.max(0) as usize)
    }
}

/// The summary returned by `RopOpenMessage` and
/// `RopReloadCachedInformation`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub has_named_properties: bool,
    pub subject_prefix: Option<String>,
    pub normalized_subject: Option<String>,
    pub recipient_count: usize,
    pub recipient_columns: Vec<PropTag>,
    pub recipient_rows: Vec<RecipientRow>,
}

impl HeaderInfo {
    pub fn from_view(view: View<'_>, buffer_size: usize) -> Self {
        let rows = view.recipients();
        let mut recipient_columns = rows
            .iter()
            .flat_map(|r| r.properties.keys().copied())
            .collect::<Vec<_>>();
        recipient_columns.sort_unstable();
        recipient_columns.dedup();

        HeaderInfo {
            has_named_properties: view.has_named_properties(),
            subject_prefix: view
                .property(tags::SUBJECT_PREFIX)
                .and_then(PropValue::as_str)
                .map(str::to_owned),
            normalized_subject: view
                .property(tags::NORMALIZED_SUBJECT)
                .and_then(PropValue::as_str)
                .map(str::to_owned),
            recipient_count: rows.len(),
            recipient_columns,
            recipient_rows: fit_rows(rows, buffer_size),
        }
    }
}

/// Take rows from the front of `rows` while they fit in `budget` bytes.
///
/// The first row is always taken, so that a client paging through the table
/// always makes progress.
pub fn fit_rows<'a>(
    rows: impl IntoIterator<Item = &'a RecipientRow>,
    budget: usize,
) -> Vec<RecipientRow> {
    let mut used = 0usize;
    let mut fitted = Vec::new();
    for row in rows {
        used += row.encoded_len();
        if used > budget && !fitted.is_empty() {
            break;
        }
        fitted.push(row.clone());
    }

    fitted
}

/// Split a subject into its prefix (e.g. `"RE: "`) and the normalised
/// remainder.
///
/// A prefix is one to three letters followed by a colon and a space.
pub fn split_subject(subject: &str) -> (&str, &str) {
    let letters = subject
        .char_indices()
        .take_while(|&(_, c)| c.is_alphabetic())
        .take(4)
        .count();
    if (1..=3).contains(&letters) {
        let colon = subject
            .char_indices()
            .nth(letters)
            .map(|(ix, _)| ix)
            .unwrap_or(subject.len());
        if subject[colon..].starts_with(": ") {
            return subject.split_at(colon + 2);
        }
    }

    ("", subject)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::support::system_config::ReadOnlyPropertyPolicy;

    fn draft(config: &EngineConfig) -> Message {
        Message::new_draft("alice", false, config, Utc::now(), vec![1, 2])
    }

    fn recipient(id: u32, kind: RecipientType, name: &str) -> RecipientRow {
        let mut properties = BTreeMap::new();
        properties
            .insert(tags::DISPLAY_NAME, PropValue::Unicode(name.to_owned()));
        RecipientRow {
            row_id: RowId(id),
            recipient_type: kind,
            properties,
        }
    }

    #[test]
    fn draft_initial_data() {
        let config = EngineConfig::default();
        let message = draft(&config);
        assert_eq!(
            MessageFlags::READ | MessageFlags::UNSENT | MessageFlags::EVER_READ,
            message.flags()
        );
        assert_eq!(
            Some(&PropValue::Unicode("IPM.Note".to_owned())),
            message.property(tags::MESSAGE_CLASS)
        );
        assert_eq!(
            Some(&PropValue::Integer32(1)),
            message.property(tags::IMPORTANCE)
        );
        assert_eq!(None, message.change_key());
        assert_eq!(0, message.version());

        let config = EngineConfig {
            set_ever_read: false,
            ..EngineConfig::default()
        };
        let message =
            Message::new_draft("alice", true, &config, Utc::now(), vec![]);
        assert_eq!(
            MessageFlags::READ | MessageFlags::UNSENT | MessageFlags::FAI,
            message.flags()
        );
    }

    #[test]
    fn first_save_accepts_any_flags() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        let mut overlay = TransactionOverlay::new();
        overlay.set_property(tags::MESSAGE_FLAGS, PropValue::Integer32(0));
        message.apply(&overlay, &config, true).unwrap();
        assert_eq!(MessageFlags::empty(), message.flags());
    }

    #[test]
    fn read_only_flags_after_save() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        message.finish_commit(vec![1], Utc::now(), "alice");

        let mut overlay = TransactionOverlay::new();
        overlay.set_property(
            tags::MESSAGE_FLAGS,
            PropValue::Integer32(MessageFlags::FROM_ME.bits() as i32),
        );
        let mut rejected = message.clone();
        assert_matches!(
            Err(Error::ReadOnlyProperty),
            rejected.apply(&overlay, &config, false)
        );

        let lenient = EngineConfig {
            read_only_properties: ReadOnlyPropertyPolicy::Ignore,
            ..EngineConfig::default()
        };
        message.apply(&overlay, &lenient, false).unwrap();
        assert_eq!(
            MessageFlags::READ
                | MessageFlags::UNSENT
                | MessageFlags::EVER_READ
                | MessageFlags::FROM_ME,
            message.flags()
        );
    }

    #[test]
    fn writable_flag_bits_after_save() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        message.finish_commit(vec![1], Utc::now(), "alice");

        let mut overlay = TransactionOverlay::new();
        overlay.set_property(
            tags::MESSAGE_FLAGS,
            PropValue::Integer32(
                (message.flags() | MessageFlags::FROM_ME).bits() as i32,
            ),
        );
        message.apply(&overlay, &config, false).unwrap();
        assert!(message.flags().contains(MessageFlags::FROM_ME));
    }

    #[test]
    fn read_only_properties() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        let mut overlay = TransactionOverlay::new();
        overlay.set_property(tags::HAS_ATTACHMENTS, PropValue::Boolean(true));
        assert_matches!(
            Err(Error::ReadOnlyProperty),
            message.clone().apply(&overlay, &config, false)
        );

        let lenient = EngineConfig {
            read_only_properties: ReadOnlyPropertyPolicy::Ignore,
            ..EngineConfig::default()
        };
        message.apply(&overlay, &lenient, false).unwrap();
        assert_eq!(
            Some(&PropValue::Boolean(false)),
            message.property(tags::HAS_ATTACHMENTS)
        );
    }

    #[test]
    fn derived_properties_are_not_client_writable() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        let before = message.property(tags::CREATION_TIME).cloned();

        let mut overlay = TransactionOverlay::new();
        overlay.set_property(
            tags::CREATION_TIME,
            PropValue::Time(Utc.timestamp_opt(0, 0).unwrap()),
        );
        overlay.set_property(tags::CHANGE_KEY, PropValue::Binary(vec![9]));
        message.apply(&overlay, &config, false).unwrap();

        assert_eq!(before.as_ref(), message.property(tags::CREATION_TIME));
        assert_eq!(None, message.change_key());
    }

    #[test]
    fn receipt_requests_set_notify_bits() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        let mut overlay = TransactionOverlay::new();
        overlay.set_property(
            tags::READ_RECEIPT_REQUESTED,
            PropValue::Boolean(true),
        );
        overlay.set_property(
            tags::NON_RECEIPT_NOTIFICATION_REQUESTED,
            PropValue::Boolean(true),
        );
        message.apply(&overlay, &config, true).unwrap();
        assert!(message.flags().contains(
            MessageFlags::NOTIFY_READ | MessageFlags::NOTIFY_UNREAD
        ));

        let mut overlay = TransactionOverlay::new();
        overlay.delete_property(tags::READ_RECEIPT_REQUESTED);
        message.apply(&overlay, &config, false).unwrap();
        assert!(!message.flags().contains(MessageFlags::NOTIFY_READ));
        assert!(message.flags().contains(MessageFlags::NOTIFY_UNREAD));
    }

    #[test]
    fn commit_derives_display_lists() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        let mut overlay = TransactionOverlay::new();
        overlay.put_recipient(recipient(1, RecipientType::Primary, "Ann"));
        overlay.put_recipient(recipient(2, RecipientType::Primary, "Bob"));
        overlay.put_recipient(recipient(3, RecipientType::Bcc, "Cat"));
        message.apply(&overlay, &config, true).unwrap();

        let now = Utc::now();
        message.finish_commit(vec![7, 7], now, "bob");
        assert_eq!(
            Some(&PropValue::Unicode("Ann; Bob".to_owned())),
            message.property(tags::DISPLAY_TO)
        );
        assert_eq!(
            Some(&PropValue::Unicode(String::new())),
            message.property(tags::DISPLAY_CC)
        );
        assert_eq!(
            Some(&PropValue::Unicode("Cat".to_owned())),
            message.property(tags::DISPLAY_BCC)
        );
        assert_eq!(Some(&[7u8, 7][..]), message.change_key());
        assert_eq!(Some(now), message.last_modified());
        assert_eq!(1, message.version());
        assert_matches!(
            Some(&PropValue::Integer32(size)) if size > 0,
            message.property(tags::MESSAGE_SIZE)
        );
    }

    #[test]
    fn commit_derives_attachment_state() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        let mut attachment = Attachment::new(AttachmentId(0), Utc::now());
        let mut overlay = TransactionOverlay::new();
        overlay.set_property(
            tags::ATTACH_DATA_BINARY,
            PropValue::Binary(vec![0; 100]),
        );
        attachment.apply(&overlay, &config).unwrap();
        attachment.finish_save(Utc::now());
        assert_matches!(
            Some(&PropValue::Integer32(size)) if size >= 100,
            attachment.property(tags::ATTACH_SIZE)
        );

        let mut overlay = TransactionOverlay::new();
        overlay.put_attachment(AttachmentId(0), attachment);
        message.apply(&overlay, &config, true).unwrap();
        message.finish_commit(vec![1], Utc::now(), "alice");
        assert_eq!(
            Some(&PropValue::Boolean(true)),
            message.property(tags::HAS_ATTACHMENTS)
        );
        assert!(message.flags().contains(MessageFlags::HAS_ATTACH));
        assert!(message.size() > 100);

        let mut overlay = TransactionOverlay::new();
        overlay.delete_attachment(AttachmentId(0));
        message.apply(&overlay, &config, false).unwrap();
        message.finish_commit(vec![2], Utc::now(), "alice");
        assert_eq!(
            Some(&PropValue::Boolean(false)),
            message.property(tags::HAS_ATTACHMENTS)
        );
        assert!(!message.flags().contains(MessageFlags::HAS_ATTACH));
        assert!(message.size() < 100);
    }

    #[test]
    fn attachment_read_only_properties() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut attachment = Attachment::new(AttachmentId(3), now);
        let mut overlay = TransactionOverlay::new();
        overlay.set_property(tags::ATTACH_SIZE, PropValue::Integer32(1));
        assert_matches!(
            Err(Error::ReadOnlyProperty),
            attachment.clone().apply(&overlay, &config)
        );

        let mut overlay = TransactionOverlay::new();
        overlay.set_property(
            tags::CREATION_TIME,
            PropValue::Time(Utc.timestamp_opt(0, 0).unwrap()),
        );
        overlay.set_property(
            tags::ATTACH_METHOD,
            PropValue::Integer32(attach_method::BY_VALUE),
        );
        attachment.apply(&overlay, &config).unwrap();
        assert_eq!(
            Some(&PropValue::Time(now)),
            attachment.property(tags::CREATION_TIME)
        );
        assert_eq!(
            Some(&PropValue::Integer32(3)),
            attachment.property(tags::ATTACH_NUMBER)
        );
        assert_eq!(
            Some(&PropValue::Integer32(attach_method::BY_VALUE)),
            attachment.property(tags::ATTACH_METHOD)
        );
    }

    #[test]
    fn header_info_limits_rows() {
        let config = EngineConfig::default();
        let mut message = draft(&config);
        let mut overlay = TransactionOverlay::new();
        for i in 1..=10 {
            overlay.put_recipient(recipient(
                i,
                RecipientType::Cc,
                &format!("Recipient {i}"),
            ));
        }
        overlay.set_property(
            tags::SUBJECT_PREFIX,
            PropValue::Unicode("RE: ".to_owned()),
        );
        overlay.set_property(
            tags::NORMALIZED_SUBJECT,
            PropValue::Unicode("Lunch".to_owned()),
        );
        message.apply(&overlay, &config, true).unwrap();

        let empty = TransactionOverlay::new();
        let row_len = message.recipient(RowId(1)).unwrap().encoded_len();
        let header = HeaderInfo::from_view(empty.view(&message), row_len * 3);
        assert_eq!(10, header.recipient_count);
        assert_eq!(3, header.recipient_rows.len());
        assert_eq!(vec![tags::DISPLAY_NAME], header.recipient_columns);
        assert_eq!(Some("RE: ".to_owned()), header.subject_prefix);
        assert_eq!(Some("Lunch".to_owned()), header.normalized_subject);
        assert!(!header.has_named_properties);

        let header = HeaderInfo::from_view(empty.view(&message), 1);
        assert_eq!(1, header.recipient_rows.len());
    }

    #[test]
    fn subject_splitting() {
        assert_eq!(("RE: ", "Lunch"), split_subject("RE: Lunch"));
        assert_eq!(("Fwd: ", "x"), split_subject("Fwd: x"));
        assert_eq!(("", "Lunch"), split_subject("Lunch"));
        assert_eq!(("", "Note: today"), split_subject("Note: today"));
        assert_eq!(("", "RE:Lunch"), split_subject("RE:Lunch"));
        assert_eq!(("", ""), split_subject(""));
        assert_eq!(("", "1: x"), split_subject("1: x"));
    }
}
