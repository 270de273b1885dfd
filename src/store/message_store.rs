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

//! The committed state shared by every session.
//!
//! All cross-handle interaction goes through this type. Committed messages
//! are held as `Arc<Message>` so that handles can keep their base snapshot
//! without holding the lock; a commit builds the new record on a private copy
//! and swaps it in, so a failed commit never leaves partial state behind.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use byteorder::{BigEndian, WriteBytesExt};
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::message::Message;
use super::model::*;
use super::overlay::TransactionOverlay;
use crate::support::error::Error;
use crate::support::system_config::{ConflictDetection, EngineConfig};

/// Change counters are 48 bits wide on the wire.
const MAX_CHANGE_NUMBER: u64 = (1 << 48) - 1;

#[derive(Debug)]
pub struct MessageStore {
    config: EngineConfig,
    state: Mutex<StoreState>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(super) struct StoreState {
    /// The replica GUID that prefixes every change key issued by this store.
    pub(super) replica: [u8; 16],
    pub(super) next_folder: u64,
    pub(super) next_message: u64,
    pub(super) next_change: u64,
    pub(super) folders: BTreeMap<FolderId, Folder>,
    pub(super) receipts: Vec<Receipt>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(super) struct Folder {
    pub(super) name: String,
    /// Rights of users with no explicit entry.
    pub(super) default_rights: FolderRights,
    pub(super) rights: BTreeMap<String, FolderRights>,
    pub(super) messages: BTreeMap<MessageId, Arc<Message>>,
}

impl Folder {
    fn rights_of(&self, user: &str) -> FolderRights {
        self.rights.get(user).copied().unwrap_or(self.default_rights)
    }

    fn live_message(&self, id: MessageId) -> Result<&Arc<Message>, Error> {
        self.messages
            .get(&id)
            .filter(|m| !m.is_soft_deleted())
            .ok_or(Error::NotFound)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ReceiptKind {
    Read = 0,
    NonRead = 1,
}

/// A read or non-read notification waiting to be handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub kind: ReceiptKind,
    pub folder: FolderId,
    pub message: MessageId,
    /// Where the notification should go, if the message says.
    pub address: Option<String>,
    /// The user whose action generated the receipt.
    pub user: String,
    pub at: DateTime<Utc>,
}

/// One message as listed by `MessageStore::folder_summary()`.
#[derive(Clone, Debug)]
pub struct MessageSummary {
    pub id: MessageId,
    pub subject: Option<String>,
    pub flags: MessageFlags,
    pub status: MessageStatus,
    pub recipients: usize,
    pub soft_deleted: bool,
}

/// Everything a commit needs to know about the handle being saved.
pub struct CommitRequest<'a> {
    pub folder: FolderId,
    /// `None` if the message has never been saved.
    pub message: Option<MessageId>,
    /// The snapshot the handle's overlay was built against.
    pub base: &'a Message,
    pub overlay: &'a TransactionOverlay,
    pub user: &'a str,
    pub force: bool,
}

impl MessageStore {
    pub fn new(config: EngineConfig) -> Self {
        Self::from_state(
            config,
            StoreState {
                replica: rand::random(),
                next_folder: 1,
                next_message: 1,
                next_change: 1,
                folders: BTreeMap::new(),
                receipts: Vec::new(),
            },
        )
    }

    pub(super) fn from_state(config: EngineConfig, state: StoreState) -> Self {
        MessageStore {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn create_folder(
        &self,
        name: &str,
        default_rights: FolderRights,
    ) -> Result<FolderId, Error> {
        let mut state = self.lock();
        let id = FolderId(state.next_folder);
        state.next_folder =
            state.next_folder.checked_add(1).ok_or(Error::StoreFull)?;
        state.folders.insert(
            id,
            Folder {
                name: name.to_owned(),
                default_rights,
                rights: BTreeMap::new(),
                messages: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    pub fn set_rights(
        &self,
        folder: FolderId,
        user: &str,
        rights: FolderRights,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        state
            .folder_mut(folder)?
            .rights
            .insert(user.to_owned(), rights);
        Ok(())
    }

    pub fn folder_rights(
        &self,
        folder: FolderId,
        user: &str,
    ) -> Result<FolderRights, Error> {
        Ok(self.lock().folder(folder)?.rights_of(user))
    }

    /// List the folders in the store with their names.
    pub fn folders(&self) -> Vec<(FolderId, String)> {
        self.lock()
            .folders
            .iter()
            .map(|(&id, f)| (id, f.name.clone()))
            .collect()
    }

    pub fn folder_summary(
        &self,
        folder: FolderId,
    ) -> Result<Vec<MessageSummary>, Error> {
        let state = self.lock();
        Ok(state
            .folder(folder)?
            .messages
            .iter()
            .map(|(&id, m)| MessageSummary {
                id,
                subject: m
                    .property(tags::SUBJECT)
                    .and_then(PropValue::as_str)
                    .map(str::to_owned),
                flags: m.flags(),
                status: m.status(),
                recipients: m.recipients().count(),
                soft_deleted: m.is_soft_deleted(),
            })
            .collect())
    }

    /// Return the current committed snapshot of a message.
    ///
    /// Soft-deleted messages are only returned if `include_soft_deleted`.
    pub fn snapshot_message(
        &self,
        folder: FolderId,
        message: MessageId,
        include_soft_deleted: bool,
    ) -> Result<Arc<Message>, Error> {
        let state = self.lock();
        let folder = state.folder(folder)?;
        let snapshot = if include_soft_deleted {
            folder.messages.get(&message).ok_or(Error::NotFound)?
        } else {
            folder.live_message(message)?
        };
        Ok(Arc::clone(snapshot))
    }

    /// Merge a handle's overlay into committed state.
    ///
    /// Returns the id of the message and its new committed snapshot.
    pub fn commit(
        &self,
        request: CommitRequest<'_>,
    ) -> Result<(MessageId, Arc<Message>), Error> {
        let mut state = self.lock();
        let rights = state.folder(request.folder)?.rights_of(request.user);

        let (id, mut message) = match request.message {
            None => {
                if !rights.can_create() {
                    return Err(Error::AccessDenied);
                }

                let mut message = request.base.clone();
                message.apply(request.overlay, &self.config, true)?;
                (None, message)
            },

            Some(id) => {
                let current =
                    state.folder(request.folder)?.live_message(id)?;
                if !rights.can_edit(request.user, current.creator()) {
                    return Err(Error::AccessDenied);
                }

                if ConflictDetection::Strict == self.config.conflict_detection
                    && !request.force
                    && current.version() != request.base.version()
                {
                    return Err(Error::ObjectModified);
                }

                let mut message = Message::clone(current);
                message.apply(request.overlay, &self.config, false)?;
                (Some(id), message)
            },
        };

        // Nothing below may fail after identifiers have been consumed
        let id = match id {
            Some(id) => id,
            None => {
                let id = MessageId(state.next_message);
                state.next_message =
                    state.next_message.checked_add(1).ok_or(Error::StoreFull)?;
                id
            },
        };
        let change_key = state.allocate_change_key()?;

        message.finish_commit(change_key, Utc::now(), request.user);
        let message = Arc::new(message);
        state
            .folder_mut(request.folder)?
            .messages
            .insert(id, Arc::clone(&message));
        Ok((id, message))
    }

    /// Mutate the live committed state of a message outside of any
    /// transaction.
    ///
    /// The message keeps its change key, modification time and version.
    /// `f` is given the folder rights of `user`; nothing is changed if it
    /// fails.
    pub fn update_live<R>(
        &self,
        folder: FolderId,
        message: MessageId,
        user: &str,
        f: impl FnOnce(&mut Message, FolderRights) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut state = self.lock();
        let folder = state.folder_mut(folder)?;
        let rights = folder.rights_of(user);
        let slot = folder
            .messages
            .get_mut(&message)
            .filter(|m| !m.is_soft_deleted())
            .ok_or(Error::NotFound)?;

        let mut updated = Message::clone(slot);
        let ret = f(&mut updated, rights)?;
        *slot = Arc::new(updated);
        Ok(ret)
    }

    /// Mark a message soft-deleted.
    ///
    /// If the message was never read and its sender asked for a non-read
    /// notification, one is queued.
    pub fn soft_delete_message(
        &self,
        folder_id: FolderId,
        message: MessageId,
        user: &str,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let folder = state.folder_mut(folder_id)?;
        let rights = folder.rights_of(user);
        let slot = folder
            .messages
            .get_mut(&message)
            .filter(|m| !m.is_soft_deleted())
            .ok_or(Error::NotFound)?;

        let may_delete = rights.intersects(
            FolderRights::DELETE_ANY | FolderRights::FOLDER_OWNER,
        ) || (rights.contains(FolderRights::DELETE_OWNED)
            && user == slot.creator());
        if !may_delete {
            return Err(Error::AccessDenied);
        }

        let entry = Arc::make_mut(slot);
        entry.set_soft_deleted(true);
        let flags = entry.flags();
        let receipt = if flags.contains(MessageFlags::NOTIFY_UNREAD)
            && !flags.contains(MessageFlags::READ)
        {
            entry.set_flags(flags - MessageFlags::NOTIFY_UNREAD);
            Some(Receipt {
                kind: ReceiptKind::NonRead,
                folder: folder_id,
                message,
                address: receipt_address(entry),
                user: user.to_owned(),
                at: Utc::now(),
            })
        } else {
            None
        };

        state.receipts.extend(receipt);
        Ok(())
    }

    /// Issue a change key for a message saved outside of any folder.
    pub fn allocate_change_key(&self) -> Result<Vec<u8>, Error> {
        self.lock().allocate_change_key()
    }

    pub fn queue_receipt(&self, receipt: Receipt) {
        self.lock().receipts.push(receipt);
    }

    /// Remove and return every queued receipt.
    pub fn take_receipts(&self) -> Vec<Receipt> {
        std::mem::replace(&mut self.lock().receipts, Vec::new())
    }

    pub fn pending_receipts(&self) -> usize {
        self.lock().receipts.len()
    }
}

impl StoreState {
    fn folder(&self, id: FolderId) -> Result<&Folder, Error> {
        self.folders.get(&id).ok_or(Error::NotFound)
    }

    fn folder_mut(&mut self, id: FolderId) -> Result<&mut Folder, Error> {
        self.folders.get_mut(&id).ok_or(Error::NotFound)
    }

    /// Allocate the next change number and return it as an XID.
    fn allocate_change_key(&mut self) -> Result<Vec<u8>, Error> {
        let cn = self.next_change;
        if cn > MAX_CHANGE_NUMBER {
            return Err(Error::StoreFull);
        }
        self.next_change += 1;

        let mut xid = Vec::with_capacity(22);
        xid.extend_from_slice(&self.replica);
        xid.write_u48::<BigEndian>(cn)?;
        Ok(xid)
    }
}

/// The address a receipt for `message` should be sent to.
pub fn receipt_address(message: &Message) -> Option<String> {
    message
        .property(tags::READ_RECEIPT_EMAIL_ADDRESS)
        .or_else(|| message.property(tags::SENDER_EMAIL_ADDRESS))
        .and_then(PropValue::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::support::system_config::ReadOnlyPropertyPolicy;

    fn setup(config: EngineConfig) -> (MessageStore, FolderId) {
        let store = MessageStore::new(config);
        let folder =
            store.create_folder("Inbox", FolderRights::owner()).unwrap();
        (store, folder)
    }

    fn subject_overlay(subject: &str) -> TransactionOverlay {
        let mut overlay = TransactionOverlay::new();
        overlay.set_property(
            tags::SUBJECT,
            PropValue::Unicode(subject.to_owned()),
        );
        overlay
    }

    fn create(store: &MessageStore, folder: FolderId) -> Arc<Message> {
        let draft = Message::new_draft(
            "alice",
            false,
            store.config(),
            Utc::now(),
            vec![],
        );
        let (_, message) = store
            .commit(CommitRequest {
                folder,
                message: None,
                base: &draft,
                overlay: &subject_overlay("hello"),
                user: "alice",
                force: false,
            })
            .unwrap();
        message
    }

    #[test]
    fn commit_allocates_ids_and_change_keys() {
        let (store, folder) = setup(EngineConfig::default());
        let first = create(&store, folder);
        let second = create(&store, folder);

        let summary = store.folder_summary(folder).unwrap();
        assert_eq!(
            vec![MessageId(1), MessageId(2)],
            summary.iter().map(|s| s.id).collect::<Vec<_>>()
        );
        assert_eq!(Some("hello"), summary[0].subject.as_deref());

        let ck1 = first.change_key().unwrap();
        let ck2 = second.change_key().unwrap();
        assert_eq!(22, ck1.len());
        assert_eq!(ck1[..16], ck2[..16]);
        assert_eq!(&[0u8, 0, 0, 0, 0, 1][..], &ck1[16..]);
        assert_eq!(&[0u8, 0, 0, 0, 0, 2][..], &ck2[16..]);
    }

    fn update<'a>(
        folder: FolderId,
        base: &'a Message,
        overlay: &'a TransactionOverlay,
        force: bool,
    ) -> CommitRequest<'a> {
        CommitRequest {
            folder,
            message: Some(MessageId(1)),
            base,
            overlay,
            user: "alice",
            force,
        }
    }

    #[test]
    fn strict_conflict_detection() {
        let (store, folder) = setup(EngineConfig::default());
        let base = create(&store, folder);

        store
            .commit(update(folder, &base, &subject_overlay("a"), false))
            .unwrap();
        assert_matches!(
            Err(Error::ObjectModified),
            store.commit(update(folder, &base, &subject_overlay("b"), false))
        );
        let (_, forced) = store
            .commit(update(folder, &base, &subject_overlay("c"), true))
            .unwrap();
        assert_eq!(
            Some(&PropValue::Unicode("c".to_owned())),
            forced.property(tags::SUBJECT)
        );
        assert_eq!(3, forced.version());
    }

    #[test]
    fn lenient_conflict_detection_merges_per_key() {
        let (store, folder) = setup(EngineConfig {
            conflict_detection: ConflictDetection::Lenient,
            ..EngineConfig::default()
        });
        let base = create(&store, folder);

        let mut importance = TransactionOverlay::new();
        importance.set_property(tags::IMPORTANCE, PropValue::Integer32(2));
        for overlay in &[subject_overlay("a"), importance] {
            store.commit(update(folder, &base, overlay, false)).unwrap();
        }

        let current =
            store.snapshot_message(folder, MessageId(1), false).unwrap();
        assert_eq!(
            Some(&PropValue::Unicode("a".to_owned())),
            current.property(tags::SUBJECT)
        );
        assert_eq!(
            Some(&PropValue::Integer32(2)),
            current.property(tags::IMPORTANCE)
        );
    }

    #[test]
    fn rejected_commit_changes_nothing() {
        let (store, folder) = setup(EngineConfig {
            read_only_properties: ReadOnlyPropertyPolicy::Reject,
            ..EngineConfig::default()
        });
        let base = create(&store, folder);

        let mut overlay = subject_overlay("changed");
        overlay.set_property(tags::HAS_ATTACHMENTS, PropValue::Boolean(true));
        assert_matches!(
            Err(Error::ReadOnlyProperty),
            store.commit(update(folder, &base, &overlay, false))
        );

        let current =
            store.snapshot_message(folder, MessageId(1), false).unwrap();
        assert!(Arc::ptr_eq(&base, &current));
    }

    #[test]
    fn commit_rechecks_rights() {
        let (store, folder) = setup(EngineConfig::default());
        let base = create(&store, folder);
        store
            .set_rights(folder, "bob", FolderRights::EDIT_OWNED)
            .unwrap();

        assert_matches!(
            Err(Error::AccessDenied),
            store.commit(CommitRequest {
                folder,
                message: Some(MessageId(1)),
                base: &base,
                overlay: &subject_overlay("x"),
                user: "bob",
                force: false,
            })
        );
        assert_matches!(
            Err(Error::AccessDenied),
            store.commit(CommitRequest {
                folder,
                message: None,
                base: &base,
                overlay: &subject_overlay("x"),
                user: "bob",
                force: false,
            })
        );
    }

    #[test]
    fn live_updates_keep_change_key() {
        let (store, folder) = setup(EngineConfig::default());
        let base = create(&store, folder);

        let previous = store
            .update_live(folder, MessageId(1), "alice", |m, _| {
                let old = m.status();
                m.set_status(old.apply(0x1000, 0x3000));
                Ok(old)
            })
            .unwrap();
        assert_eq!(MessageStatus(0), previous);

        let current =
            store.snapshot_message(folder, MessageId(1), false).unwrap();
        assert_eq!(MessageStatus(0x1000), current.status());
        assert_eq!(base.change_key(), current.change_key());
        assert_eq!(base.last_modified(), current.last_modified());
        assert_eq!(base.version(), current.version());
        // The old snapshot is unaffected
        assert_eq!(MessageStatus(0), base.status());

        assert_matches!(
            Err(Error::NotFound),
            store.update_live(folder, MessageId(99), "alice", |_, _| Ok(()))
        );
    }

    #[test]
    fn soft_delete_hides_and_queues_non_read() {
        let (store, folder) = setup(EngineConfig::default());
        create(&store, folder);
        store
            .update_live(folder, MessageId(1), "alice", |m, _| {
                m.set_flags(MessageFlags::NOTIFY_UNREAD);
                Ok(())
            })
            .unwrap();

        store
            .soft_delete_message(folder, MessageId(1), "alice")
            .unwrap();
        assert_matches!(
            Err(Error::NotFound),
            store.snapshot_message(folder, MessageId(1), false)
        );
        assert!(store
            .snapshot_message(folder, MessageId(1), true)
            .unwrap()
            .is_soft_deleted());

        let receipts = store.take_receipts();
        assert_eq!(1, receipts.len());
        assert_eq!(ReceiptKind::NonRead, receipts[0].kind);
        assert_eq!(0, store.pending_receipts());
    }

    #[test]
    fn unknown_folder() {
        let store = MessageStore::new(EngineConfig::default());
        assert_matches!(
            Err(Error::NotFound),
            store.folder_rights(FolderId(7), "alice")
        );
        assert_matches!(
            Err(Error::NotFound),
            store.snapshot_message(FolderId(7), MessageId(1), true)
        );
    }
}
