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

//! Opening, creating, saving and reloading Message objects.

use std::sync::Arc;

use chrono::prelude::*;
use log::{debug, info, warn};

use super::message::{HeaderInfo, Message};
use super::message_store::CommitRequest;
use super::model::*;
use super::session::{MessageObject, ServerObject, Session};
use crate::support::{error::Error, system_config::BestAccessPolicy};

impl Session {
    /// `RopOpenMessage`: open an existing message.
    ///
    /// `input` must be the logon or a folder handle. Every call produces a
    /// new handle with its own, empty, transaction.
    pub fn open_message(
        &mut self,
        input: HandleId,
        folder: FolderId,
        message: MessageId,
        open_mode: u8,
    ) -> Result<(HandleId, HeaderInfo), Error> {
        self.require_container(input)?;
        let mode = OpenMode::from_raw(open_mode);

        let rights = self.store.folder_rights(folder, &self.logon.user)?;
        let base = self.store.snapshot_message(
            folder,
            message,
            mode.open_soft_deleted,
        )?;
        if !rights.can_read() {
            return Err(Error::AccessDenied);
        }

        let can_write = !base.is_soft_deleted()
            && rights.can_edit(&self.logon.user, base.creator());
        let (access, can_commit) = match mode.access {
            RequestedAccess::ReadOnly => (Access::ReadOnly, false),
            RequestedAccess::ReadWrite if can_write => {
                (Access::ReadWrite, true)
            },
            RequestedAccess::ReadWrite => return Err(Error::AccessDenied),
            RequestedAccess::BestAccess if can_write => {
                (Access::ReadWrite, true)
            },
            RequestedAccess::BestAccess => {
                match self.store.config().best_access {
                    BestAccessPolicy::ReadOnly => (Access::ReadOnly, false),
                    BestAccessPolicy::ReadWrite => (Access::ReadWrite, false),
                }
            },
        };

        let object = MessageObject {
            folder,
            message: Some(message),
            base,
            overlay: Default::default(),
            access,
            can_commit,
            embedded_in: None,
        };
        let header = HeaderInfo::from_view(
            object.view(),
            self.store.config().response_buffer_size,
        );
        let handle = self.insert(ServerObject::Message(object))?;

        debug!(
            "{} Opened {:?}/{:?} as {:?} ({:?})",
            self.log_prefix, folder, message, handle, access
        );
        Ok((handle, header))
    }

    /// `RopCreateMessage`: start a new message in `folder`.
    ///
    /// Nothing is committed until the handle is saved.
    pub fn create_message(
        &mut self,
        input: HandleId,
        folder: FolderId,
        associated: bool,
    ) -> Result<HandleId, Error> {
        self.require_container(input)?;
        let rights = self.store.folder_rights(folder, &self.logon.user)?;
        if !rights.can_create() {
            return Err(Error::AccessDenied);
        }

        let draft = Message::new_draft(
            &self.logon.user,
            associated,
            self.store.config(),
            Utc::now(),
            rand::random::<[u8; 16]>().to_vec(),
        );
        let handle = self.insert(ServerObject::Message(MessageObject {
            folder,
            message: None,
            base: Arc::new(draft),
            overlay: Default::default(),
            access: Access::ReadWrite,
            can_commit: true,
            embedded_in: None,
        }))?;

        debug!(
            "{} Created new message in {:?} as {:?}",
            self.log_prefix, folder, handle
        );
        Ok(handle)
    }

    /// `RopSaveChangesMessage`: commit the handle's pending changes.
    ///
    /// On success the handle stays open on the new committed state with an
    /// empty transaction, and the id of the message is returned. An embedded
    /// message is stored into its attachment handle instead.
    pub fn save_changes(
        &mut self,
        handle: HandleId,
        save_flags: u8,
    ) -> Result<MessageId, Error> {
        let store = Arc::clone(&self.store);
        let log_prefix = self.log_prefix.clone();
        let user = self.logon.user.clone();

        let object = self.message_mut(handle)?;
        let save_flags = SaveFlags::from_raw(save_flags)?;
        object.require_writable()?;
        if !object.can_commit {
            return Err(Error::AccessDenied);
        }
        if let Some(attachment) = object.embedded_in {
            return self.save_embedded_message(handle, attachment, save_flags);
        }

        let result = store.commit(CommitRequest {
            folder: object.folder,
            message: object.message,
            base: &object.base,
            overlay: &object.overlay,
            user: &user,
            force: save_flags.contains(SaveFlags::FORCE_SAVE),
        });
        let (id, committed) = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("{} Save of {:?} failed: {}", log_prefix, handle, e);
                return Err(e);
            },
        };

        object.message = Some(id);
        object.base = committed;
        object.overlay.clear();
        object.access = save_flags.access_after_save();

        info!(
            "{} Saved {:?}/{:?} (version {})",
            log_prefix,
            object.folder,
            id,
            object.base.version()
        );
        Ok(id)
    }

    /// `RopReloadCachedInformation`: rebase the handle onto the latest
    /// committed state and describe what it now sees.
    ///
    /// Pending changes are kept and still shadow the new base.
    pub fn reload_cached_information(
        &mut self,
        handle: HandleId,
    ) -> Result<HeaderInfo, Error> {
        let store = Arc::clone(&self.store);
        let object = self.message_mut(handle)?;

        if let Some(id) = object.message {
            object.base = store.snapshot_message(
                object.folder,
                id,
                object.base.is_soft_deleted(),
            )?;
        }

        Ok(HeaderInfo::from_view(
            object.view(),
            store.config().response_buffer_size,
        ))
    }
}
