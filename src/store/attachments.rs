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


//! Attachments and embedded messages.
//!
//! An attachment handle accumulates its own property changes. Saving it
//! moves the attachment into its parent message's transaction, so nothing
//! reaches the store until the parent itself is saved. An embedded message
//! is saved into its attachment handle in the same way.

use std::sync::Arc;

use chrono::prelude::*;
use log::debug;

use super::message::{Attachment, HeaderInfo, Message};
use super::model::*;
use super::session::{AttachmentObject, MessageObject, ServerObject, Session};
use crate::support::error::{Error, ErrorCode};

/// The id `save_changes()` reports for an embedded message, which is stored
/// inside its attachment rather than in a folder.
pub const EMBEDDED_MESSAGE_ID: MessageId = MessageId(0);

impl Session {
    /// `RopCreateAttachment`: start a new attachment on a writable message.
    ///
    /// The attachment is invisible to the message's attachment table until
    /// it is saved.
    pub fn create_attachment(
        &mut self,
        handle: HandleId,
    ) -> Result<(HandleId, AttachmentId), Error> {
        let object = self.message_mut(handle)?;
        object.require_writable()?;
        let id = object.overlay.allocate_attachment(&object.base)?;

        let attachment_handle =
            self.insert(ServerObject::Attachment(AttachmentObject {
                parent: handle,
                id,
                base: Attachment::new(id, Utc::now()),
                overlay: Default::default(),
                embedded: None,
                access: Access::ReadWrite,
            }))?;

        debug!(
            "{} Created attachment {:?} on {:?} as {:?}",
            self.log_prefix, id, handle, attachment_handle
        );
        Ok((attachment_handle, id))
    }

    /// `RopOpenAttachment`: open an attachment as seen by the message
    /// handle.
    ///
    /// Read/write access requires a writable message; `BestAccess` follows
    /// the message's own access.
    pub fn open_attachment(
        &mut self,
        handle: HandleId,
        id: AttachmentId,
        open_mode: u8,
    ) -> Result<HandleId, Error> {
        let object = self.message(handle)?;
        let base = object.view().attachment(id).ok_or(Error::NotFound)?;
        let requested = OpenMode::from_raw(open_mode).access;
        let access = match (requested, object.access) {
            (RequestedAccess::ReadOnly, _) => Access::ReadOnly,
            (RequestedAccess::ReadWrite, Access::ReadOnly) => {
                return Err(Error::AccessDenied)
            },
            (_, parent_access) => parent_access,
        };

        let attachment = AttachmentObject {
            parent: handle,
            id,
            embedded: base.embedded().cloned(),
            base: base.clone(),
            overlay: Default::default(),
            access,
        };
        let attachment_handle =
            self.insert(ServerObject::Attachment(attachment))?;

        debug!(
            "{} Opened attachment {:?} on {:?} as {:?} ({:?})",
            self.log_prefix, id, handle, attachment_handle, access
        );
        Ok(attachment_handle)
    }

    /// `RopSaveChangesAttachment`: move the attachment's pending changes into
    /// its parent message's transaction.
    pub fn save_changes_attachment(
        &mut self,
        handle: HandleId,
        save_flags: u8,
    ) -> Result<(), Error> {
        let save_flags = SaveFlags::from_raw(save_flags)?;
        let object = match *self.object(handle)? {
            ServerObject::Attachment(ref object) => object,
            _ => return Err(Error::NotSupported),
        };
        object.require_writable()?;

        let mut saved = object.base.clone();
        saved.apply(&object.overlay, self.store.config())?;
        saved.set_embedded(object.embedded.clone());
        saved.finish_save(Utc::now());
        let (parent, id) = (object.parent, object.id);

        let parent_object = self.message_mut(parent)?;
        parent_object.require_writable()?;
        parent_object.overlay.put_attachment(id, saved.clone());

        let object = self.attachment_mut(handle)?;
        object.base = saved;
        object.overlay.clear();
        object.access = save_flags.access_after_save();

        debug!(
            "{} Saved attachment {:?} into {:?}",
            self.log_prefix, id, parent
        );
        Ok(())
    }

    /// `RopDeleteAttachment`: record the removal in the message's
    /// transaction.
    pub fn delete_attachment(
        &mut self,
        handle: HandleId,
        id: AttachmentId,
    ) -> Result<(), Error> {
        let object = self.message_mut(handle)?;
        object.require_writable()?;
        if object.view().attachment(id).is_none() {
            return Err(Error::NotFound);
        }

        object.overlay.delete_attachment(id);
        Ok(())
    }

    /// `RopGetAttachmentTable` followed by a full read of the table.
    ///
    /// One row per attachment, in number order, with one cell per column.
    pub fn get_attachment_table(
        &self,
        handle: HandleId,
        columns: &[PropTag],
    ) -> Result<Vec<Vec<Result<PropValue, ErrorCode>>>, Error> {
        let object = self.message(handle)?;
        Ok(object
            .view()
            .attachments()
            .into_iter()
            .map(|(_, attachment)| {
                columns
                    .iter()
                    .map(|&tag| {
                        attachment
                            .property(tag)
                            .cloned()
                            .ok_or(ErrorCode::NotFound)
                    })
                    .collect()
            })
            .collect())
    }

    /// `RopOpenEmbeddedMessage`: open the message held by an attachment.
    ///
    /// `Create` makes a new embedded message if the attachment has none and
    /// marks the attachment as holding one. The message is stored into the
    /// attachment by `save_changes()`.
    pub fn open_embedded_message(
        &mut self,
        handle: HandleId,
        open_mode: u8,
    ) -> Result<(HandleId, HeaderInfo), Error> {
        let store = Arc::clone(&self.store);
        let user = self.logon.user.clone();
        let parent = self.attachment(handle)?.parent;
        let folder = self.message(parent)?.folder;
        let mode = EmbeddedOpenMode::from_raw(open_mode)?;

        let attachment = self.attachment_mut(handle)?;
        if EmbeddedOpenMode::ReadOnly != mode {
            attachment.require_writable()?;
        }

        let base = match attachment.embedded {
            Some(ref embedded) => Arc::clone(embedded),
            None if EmbeddedOpenMode::Create == mode => {
                attachment.overlay.set_property(
                    tags::ATTACH_METHOD,
                    PropValue::Integer32(attach_method::EMBEDDED_MESSAGE),
                );
                Arc::new(Message::new_draft(
                    &user,
                    false,
                    store.config(),
                    Utc::now(),
                    rand::random::<[u8; 16]>().to_vec(),
                ))
            },
            None => return Err(Error::NotFound),
        };

        let object = MessageObject {
            folder,
            message: None,
            base,
            overlay: Default::default(),
            access: if EmbeddedOpenMode::ReadOnly == mode {
                Access::ReadOnly
            } else {
                Access::ReadWrite
            },
            can_commit: true,
            embedded_in: Some(handle),
        };
        let header = HeaderInfo::from_view(
            object.view(),
            store.config().response_buffer_size,
        );
        let embedded_handle = self.insert(ServerObject::Message(object))?;

        debug!(
            "{} Opened embedded message of {:?} as {:?} ({:?})",
            self.log_prefix, handle, embedded_handle, mode
        );
        Ok((embedded_handle, header))
    }

    /// The `save_changes()` of an embedded message.
    pub(super) fn save_embedded_message(
        &mut self,
        handle: HandleId,
        attachment: HandleId,
        save_flags: SaveFlags,
    ) -> Result<MessageId, Error> {
        let store = Arc::clone(&self.store);
        let user = self.logon.user.clone();
        self.attachment(attachment)?.require_writable()?;

        let object = self.message_mut(handle)?;
        let mut message = Message::clone(&object.base);
        message.apply(
            &object.overlay,
            store.config(),
            0 == object.base.version(),
        )?;
        message.finish_commit(store.allocate_change_key()?, Utc::now(), &user);
        let message = Arc::new(message);

        object.base = Arc::clone(&message);
        object.overlay.clear();
        object.access = save_flags.access_after_save();
        self.attachment_mut(attachment)?.embedded = Some(message);

        debug!(
            "{} Saved embedded message {:?} into {:?}",
            self.log_prefix, handle, attachment
        );
        Ok(EMBEDDED_MESSAGE_ID)
    }
}

#[cfg(test)]
mod test {
    use super::super::test_prelude::*;
    use super::*;

    fn open_read_write(
        setup: &Setup,
        session: &mut Session,
        id: MessageId,
    ) -> HandleId {
        session
            .open_message(LOGON_HANDLE, setup.inbox, id, OpenMode::READ_WRITE)
            .unwrap()
            .0
    }

    fn column(
        session: &Session,
        handle: HandleId,
        tag: PropTag,
    ) -> Vec<Result<PropValue, ErrorCode>> {
        session
            .get_attachment_table(handle, &[tag])
            .unwrap()
            .into_iter()
            .map(|mut row| row.remove(0))
            .collect()
    }

    #[test]
    fn attachment_is_committed_with_its_message() {
        let setup = set_up();
        let id = setup.create_message("alice", "with file", &[]);
        let mut session = setup.session("alice");
        let message = open_read_write(&setup, &mut session, id);

        let (attachment, number) = session.create_attachment(message).unwrap();
        assert_eq!(AttachmentId(0), number);
        session
            .set_properties(
                attachment,
                vec![
                    (tags::ATTACH_LONG_FILENAME, unicode("notes.txt")),
                    (
                        tags::ATTACH_DATA_BINARY,
                        PropValue::Binary(b"hello".to_vec()),
                    ),
                ],
            )
            .unwrap();
        // Not part of the message until the attachment is saved
        assert!(session
            .get_attachment_table(message, &[tags::ATTACH_NUMBER])
            .unwrap()
            .is_empty());

        session.save_changes_attachment(attachment, 0x01).unwrap();
        assert_eq!(
            vec![Ok(unicode("notes.txt"))],
            column(&session, message, tags::ATTACH_LONG_FILENAME)
        );
        // Nor part of the store until the message is saved
        let committed = setup
            .store
            .snapshot_message(setup.inbox, id, false)
            .unwrap();
        assert_eq!(0, committed.attachments().count());

        session.save_changes(message, 0x01).unwrap();
        let committed = setup
            .store
            .snapshot_message(setup.inbox, id, false)
            .unwrap();
        assert_eq!(1, committed.attachments().count());
        assert_eq!(
            Some(&PropValue::Boolean(true)),
            committed.property(tags::HAS_ATTACHMENTS)
        );
        assert!(committed.flags().contains(MessageFlags::HAS_ATTACH));

        let mut bob = setup.session("bob");
        let (reader, _) = bob
            .open_message(LOGON_HANDLE, setup.inbox, id, OpenMode::READ_ONLY)
            .unwrap();
        let opened = bob.open_attachment(reader, number, 0x00).unwrap();
        assert_eq!(
            vec![
                Ok(PropValue::Binary(b"hello".to_vec())),
                Ok(PropValue::Integer32(0)),
                Ok(PropValue::Integer32(0)),
            ],
            bob.get_properties(
                opened,
                &[
                    tags::ATTACH_DATA_BINARY,
                    tags::ATTACH_NUMBER,
                    tags::ACCESS_LEVEL,
                ]
            )
            .unwrap()
        );
        assert_matches!(
            Ok(PropValue::Integer32(size)) if size > 5,
            bob.get_properties(opened, &[tags::ATTACH_SIZE])
                .unwrap()
                .remove(0)
        );
    }

    #[test]
    fn deleting_last_attachment_clears_has_attachments() {
        let setup = set_up();
        let mut session = setup.session("alice");
        let message = session
            .create_message(LOGON_HANDLE, setup.inbox, false)
            .unwrap();
        let (first, a) = session.create_attachment(message).unwrap();
        let (second, b) = session.create_attachment(message).unwrap();
        assert_eq!(AttachmentId(1), b);
        session.save_changes_attachment(second, 0x01).unwrap();
        session.save_changes_attachment(first, 0x01).unwrap();
        assert_eq!(
            vec![Ok(PropValue::Integer32(0)), Ok(PropValue::Integer32(1))],
            column(&session, message, tags::ATTACH_NUMBER)
        );

        let id = session.save_changes(message, 0x02).unwrap();
        session.delete_attachment(message, a).unwrap();
        assert_eq!(1, column(&session, message, tags::ATTACH_NUMBER).len());
        session.save_changes(message, 0x02).unwrap();
        let committed = setup
            .store
            .snapshot_message(setup.inbox, id, false)
            .unwrap();
        assert!(committed.flags().contains(MessageFlags::HAS_ATTACH));

        session.delete_attachment(message, b).unwrap();
        session.save_changes(message, 0x02).unwrap();
        let committed = setup
            .store
            .snapshot_message(setup.inbox, id, false)
            .unwrap();
        assert_eq!(
            Some(&PropValue::Boolean(false)),
            committed.property(tags::HAS_ATTACHMENTS)
        );
        assert!(!committed.flags().contains(MessageFlags::HAS_ATTACH));

        // Numbers are not reused within the handle
        let (_, c) = session.create_attachment(message).unwrap();
        assert_eq!(AttachmentId(2), c);
    }

    #[test]
    fn attachment_error_codes() {
        let setup = set_up();
        let id = setup.create_message("alice", "x", &[]);
        let mut session = setup.session("alice");
        let folder = session.open_folder(LOGON_HANDLE, setup.inbox).unwrap();
        let message = open_read_write(&setup, &mut session, id);
        let (attachment, number) = session.create_attachment(message).unwrap();
        session.save_changes_attachment(attachment, 0x02).unwrap();
        session.save_changes(message, 0x02).unwrap();

        assert_matches!(
            Err(Error::NullObject),
            session.create_attachment(folder)
        );
        assert_matches!(
            Err(Error::NullObject),
            session.open_attachment(folder, number, 0x00)
        );
        assert_matches!(
            Err(Error::NullObject),
            session.get_attachment_table(folder, &[tags::ATTACH_NUMBER])
        );
        assert_matches!(
            Err(Error::NullObject),
            session.delete_attachment(folder, number)
        );
        assert_matches!(
            Err(Error::NullObject),
            session.open_embedded_message(message, 0x00)
        );
        assert_matches!(
            Err(Error::NotFound),
            session.open_attachment(message, AttachmentId(7), 0x00)
        );
        assert_matches!(
            Err(Error::NotFound),
            session.delete_attachment(message, AttachmentId(7))
        );
        assert_matches!(
            Err(Error::NotSupported),
            session.save_changes_attachment(message, 0x01)
        );
        assert_matches!(
            Err(Error::NotSupported),
            session.save_changes_attachment(attachment, 0x03)
        );

        let (reader, _) = session
            .open_message(LOGON_HANDLE, setup.inbox, id, OpenMode::READ_ONLY)
            .unwrap();
        assert_matches!(
            Err(Error::AccessDenied),
            session.create_attachment(reader)
        );
        assert_matches!(
            Err(Error::AccessDenied),
            session.delete_attachment(reader, number)
        );
        assert_matches!(
            Err(Error::AccessDenied),
            session.open_attachment(reader, number, 0x01)
        );
        let best = session.open_attachment(reader, number, 0x03).unwrap();
        assert_eq!(Access::ReadOnly, session.attachment(best).unwrap().access);
        assert_matches!(
            Err(Error::AccessDenied),
            session.set_properties(
                best,
                vec![(tags::ATTACH_FILENAME, unicode("x.txt"))]
            )
        );
        assert_matches!(
            Err(Error::AccessDenied),
            session.save_changes_attachment(best, 0x01)
        );
    }

    #[test]
    fn attachment_size_is_read_only() {
        let setup = set_up();
        let mut session = setup.session("alice");
        let message = session
            .create_message(LOGON_HANDLE, setup.inbox, false)
            .unwrap();
        let (attachment, _) = session.create_attachment(message).unwrap();
        session
            .set_properties(
                attachment,
                vec![(tags::ATTACH_SIZE, PropValue::Integer32(12345))],
            )
            .unwrap();

        assert_matches!(
            Err(Error::ReadOnlyProperty),
            session.save_changes_attachment(attachment, 0x01)
        );
        assert_eq!(
            ErrorCode::GeneralFailure,
            Error::ReadOnlyProperty.code()
        );
        assert!(session
            .get_attachment_table(message, &[tags::ATTACH_SIZE])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn embedded_message_is_saved_through_its_attachment() {
        let setup = set_up();
        let mut session = setup.session("alice");
        let message = session
            .create_message(LOGON_HANDLE, setup.inbox, false)
            .unwrap();
        let (attachment, number) = session.create_attachment(message).unwrap();

        assert_matches!(
            Err(Error::NotFound),
            session.open_embedded_message(attachment, 0x01)
        );
        assert_matches!(
            Err(Error::InvalidParameter),
            session.open_embedded_message(attachment, 0x07)
        );

        let (embedded, header) =
            session.open_embedded_message(attachment, 0x02).unwrap();
        assert_eq!(0, header.recipient_count);
        session
            .set_properties(
                embedded,
                vec![(tags::SUBJECT, unicode("FW: inner"))],
            )
            .unwrap();
        assert_eq!(
            EMBEDDED_MESSAGE_ID,
            session.save_changes(embedded, 0x01).unwrap()
        );
        assert_matches!(
            Ok(PropValue::Binary(_)),
            session
                .get_properties(embedded, &[tags::CHANGE_KEY])
                .unwrap()
                .remove(0)
        );

        session.save_changes_attachment(attachment, 0x01).unwrap();
        let id = session.save_changes(message, 0x01).unwrap();

        let mut bob = setup.session("bob");
        let (reader, _) = bob
            .open_message(LOGON_HANDLE, setup.inbox, id, OpenMode::READ_ONLY)
            .unwrap();
        let opened = bob.open_attachment(reader, number, 0x00).unwrap();
        assert_eq!(
            vec![Ok(PropValue::Integer32(attach_method::EMBEDDED_MESSAGE))],
            bob.get_properties(opened, &[tags::ATTACH_METHOD]).unwrap()
        );
        assert_matches!(
            Err(Error::AccessDenied),
            bob.open_embedded_message(opened, 0x01)
        );

        let (inner, header) = bob.open_embedded_message(opened, 0x00).unwrap();
        assert_eq!(Some("FW: ".to_owned()), header.subject_prefix);
        assert_eq!(Some("inner".to_owned()), header.normalized_subject);
        assert_eq!(
            vec![Ok(PropValue::Integer32(0))],
            bob.get_properties(inner, &[tags::ACCESS_LEVEL]).unwrap()
        );
        assert_matches!(
            Err(Error::AccessDenied),
            bob.set_properties(inner, vec![(tags::SUBJECT, unicode("no"))])
        );

        let committed = setup
            .store
            .snapshot_message(setup.inbox, id, false)
            .unwrap();
        let stored = committed
            .attachment(number)
            .and_then(Attachment::embedded)
            .unwrap();
        assert_eq!(1, stored.version());
    }

    #[test]
    fn embedded_save_needs_open_attachment() {
        let setup = set_up();
        let mut session = setup.session("alice");
        let message = session
            .create_message(LOGON_HANDLE, setup.inbox, false)
            .unwrap();
        let (attachment, _) = session.create_attachment(message).unwrap();
        let (embedded, _) =
            session.open_embedded_message(attachment, 0x02).unwrap();

        session.release(attachment);
        assert_matches!(
            Err(Error::NullObject),
            session.save_changes(embedded, 0x01)
        );
    }
}
