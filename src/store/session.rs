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

//! Per-logon state: the handle table and the capabilities the client
//! negotiated.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use super::message::{Attachment, Message};
use super::message_store::MessageStore;
use super::model::*;
use super::overlay::{TransactionOverlay, View};
use crate::support::{error::Error, log_prefix::LogPrefix};

/// The handle every session starts with, referring to its Logon object.
pub const LOGON_HANDLE: HandleId = HandleId(0);

/// What the client established about itself at logon.
#[derive(Clone, Debug)]
pub struct LogonContext {
    pub user: String,
    /// Whether this is a public-folder logon rather than a private mailbox.
    pub public_folders: bool,
    /// Whether the client can receive progress reports for long-running
    /// operations.
    pub support_progress: bool,
}

/// A Message object as held by one handle.
#[derive(Debug)]
pub(super) struct MessageObject {
    pub(super) folder: FolderId,
    /// `None` until the first successful save.
    pub(super) message: Option<MessageId>,
    /// The committed snapshot the overlay applies to.
    ///
    /// This only changes on save or reload, which is what keeps other
    /// handles' commits invisible to this one.
    pub(super) base: Arc<Message>,
    pub(super) overlay: TransactionOverlay,
    pub(super) access: Access,
    /// False for `BestAccess` handles granted read/write access without
    /// holding write permission.
    pub(super) can_commit: bool,
    /// For an embedded message, the attachment handle it was opened from.
    /// Saving it stores into that attachment instead of the folder.
    pub(super) embedded_in: Option<HandleId>,
}

impl MessageObject {
    pub(super) fn view(&self) -> View<'_> {
        self.overlay.view(&self.base)
    }

    pub(super) fn require_writable(&self) -> Result<(), Error> {
        if Access::ReadWrite == self.access {
            Ok(())
        } else {
            Err(Error::AccessDenied)
        }
    }
}

/// An Attachment object as held by one handle.
#[derive(Debug)]
pub(super) struct AttachmentObject {
    /// The message handle the attachment was opened or created through.
    pub(super) parent: HandleId,
    pub(super) id: AttachmentId,
    pub(super) base: Attachment,
    /// Only property deltas are used.
    pub(super) overlay: TransactionOverlay,
    /// The embedded message as last saved through this handle.
    pub(super) embedded: Option<Arc<Message>>,
    pub(super) access: Access,
}

impl AttachmentObject {
    pub(super) fn property(&self, tag: PropTag) -> Option<&PropValue> {
        match self.overlay.property_delta(tag) {
            Some(delta) => delta,
            None => self.base.property(tag),
        }
    }

    pub(super) fn require_writable(&self) -> Result<(), Error> {
        if Access::ReadWrite == self.access {
            Ok(())
        } else {
            Err(Error::AccessDenied)
        }
    }
}

#[derive(Debug)]
pub(super) enum ServerObject {
    Logon,
    Folder(FolderId),
    Message(MessageObject),
    Attachment(AttachmentObject),
}

impl ServerObject {
    /// The transaction that property writes through this object go to.
    pub(super) fn writable_overlay(
        &mut self,
    ) -> Result<&mut TransactionOverlay, Error> {
        match *self {
            ServerObject::Message(ref mut m) => {
                m.require_writable()?;
                Ok(&mut m.overlay)
            },
            ServerObject::Attachment(ref mut a) => {
                a.require_writable()?;
                Ok(&mut a.overlay)
            },
            _ => Err(Error::NullObject),
        }
    }
}

/// One client logon against a `MessageStore`.
///
/// Each operation takes an input handle, as the corresponding ROP does, and
/// fails with `NullObject` if it denotes the wrong kind of object. The
/// operations themselves are spread across the sibling modules.
pub struct Session {
    pub(super) log_prefix: LogPrefix,
    pub(super) store: Arc<MessageStore>,
    pub(super) logon: LogonContext,
    handles: BTreeMap<HandleId, ServerObject>,
    next_handle: u32,
}

impl Session {
    pub fn new(store: Arc<MessageStore>, logon: LogonContext) -> Self {
        let log_prefix = LogPrefix::new("mapi".to_owned());
        log_prefix.set_user(logon.user.clone());
        log_prefix.set_public_folders(logon.public_folders);
        info!("{} Logged on", log_prefix);

        let mut handles = BTreeMap::new();
        handles.insert(LOGON_HANDLE, ServerObject::Logon);

        Session {
            log_prefix,
            store,
            logon,
            handles,
            next_handle: LOGON_HANDLE.0 + 1,
        }
    }

    pub fn logon(&self) -> &LogonContext {
        &self.logon
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// The number of live handles, including the logon.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Open a folder from the logon or from another folder.
    pub fn open_folder(
        &mut self,
        input: HandleId,
        folder: FolderId,
    ) -> Result<HandleId, Error> {
        match self.handles.get(&input) {
            Some(&ServerObject::Logon) | Some(&ServerObject::Folder(..)) => (),
            _ => return Err(Error::NullObject),
        }

        let rights = self.store.folder_rights(folder, &self.logon.user)?;
        if !rights.intersects(
            FolderRights::FOLDER_VISIBLE
                | FolderRights::READ_ANY
                | FolderRights::FOLDER_OWNER,
        ) {
            return Err(Error::AccessDenied);
        }

        self.insert(ServerObject::Folder(folder))
    }

    /// Discard the object behind `handle`, including any pending changes.
    ///
    /// Releasing an unknown or already-released handle does nothing. The
    /// logon lives as long as the session and is never released.
    pub fn release(&mut self, handle: HandleId) {
        if LOGON_HANDLE == handle {
            return;
        }

        let pending = match self.handles.remove(&handle) {
            Some(ServerObject::Message(message)) => !message.overlay.is_empty(),
            Some(ServerObject::Attachment(attachment)) => {
                !attachment.overlay.is_empty()
            },
            _ => false,
        };
        if pending {
            debug!(
                "{} Discarding unsaved changes on {:?}",
                self.log_prefix, handle
            );
        }
    }

    pub(super) fn insert(
        &mut self,
        object: ServerObject,
    ) -> Result<HandleId, Error> {
        let handle = HandleId(self.next_handle);
        self.next_handle =
            self.next_handle.checked_add(1).ok_or(Error::StoreFull)?;
        self.handles.insert(handle, object);
        Ok(handle)
    }

    /// Resolve a handle that must denote a folder.
    pub(super) fn folder(&self, handle: HandleId) -> Result<FolderId, Error> {
        match self.handles.get(&handle) {
            Some(&ServerObject::Folder(id)) => Ok(id),
            _ => Err(Error::NullObject),
        }
    }

    /// Resolve the container for opening or creating a message.
    ///
    /// The logon is accepted as well as a folder handle; either way the
    /// folder named by the request is used.
    pub(super) fn require_container(
        &self,
        handle: HandleId,
    ) -> Result<(), Error> {
        match self.handles.get(&handle) {
            Some(&ServerObject::Logon) | Some(&ServerObject::Folder(..)) => {
                Ok(())
            },
            _ => Err(Error::NullObject),
        }
    }

    pub(super) fn object(
        &self,
        handle: HandleId,
    ) -> Result<&ServerObject, Error> {
        self.handles.get(&handle).ok_or(Error::NullObject)
    }

    pub(super) fn object_mut(
        &mut self,
        handle: HandleId,
    ) -> Result<&mut ServerObject, Error> {
        self.handles.get_mut(&handle).ok_or(Error::NullObject)
    }

    pub(super) fn attachment(
        &self,
        handle: HandleId,
    ) -> Result<&AttachmentObject, Error> {
        match self.handles.get(&handle) {
            Some(&ServerObject::Attachment(ref a)) => Ok(a),
            _ => Err(Error::NullObject),
        }
    }

    pub(super) fn attachment_mut(
        &mut self,
        handle: HandleId,
    ) -> Result<&mut AttachmentObject, Error> {
        match self.handles.get_mut(&handle) {
            Some(&mut ServerObject::Attachment(ref mut a)) => Ok(a),
            _ => Err(Error::NullObject),
        }
    }

    pub(super) fn message(
        &self,
        handle: HandleId,
    ) -> Result<&MessageObject, Error> {
        match self.handles.get(&handle) {
            Some(&ServerObject::Message(ref m)) => Ok(m),
            _ => Err(Error::NullObject),
        }
    }

    pub(super) fn message_mut(
        &mut self,
        handle: HandleId,
    ) -> Result<&mut MessageObject, Error> {
        match self.handles.get_mut(&handle) {
            Some(&mut ServerObject::Message(ref mut m)) => Ok(m),
            _ => Err(Error::NullObject),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let open_messages = self
            .handles
            .values()
            .filter(|h| matches!(**h, ServerObject::Message(..)))
            .count();
        info!(
            "{} Logged off, releasing {} message handle(s)",
            self.log_prefix, open_messages
        );
    }
}
