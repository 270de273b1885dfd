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

//! The Message object engine.
//!
//! `MessageStore` holds committed state shared by every session. A `Session`
//! is one logon with its own handle table; its operations, one per ROP, are
//! implemented across several submodules but are best thought of as a single
//! unit.

pub mod attachments;
pub mod message;
pub mod message_store;
pub mod model;
pub mod overlay;
mod persist;
pub mod properties;
pub mod recipients;
pub mod session;
pub mod status;
mod transaction;

pub use self::message_store::MessageStore;
pub use self::session::{LogonContext, Session, LOGON_HANDLE};

#[cfg(test)]
mod test_prelude {
    pub(super) use std::sync::Arc;

    pub(super) use super::message_store::MessageStore;
    pub(super) use super::model::*;
    pub(super) use super::recipients::RecipientUpdate;
    pub(super) use super::session::{LogonContext, Session, LOGON_HANDLE};
    pub(super) use crate::support::error::Error;
    use crate::support::system_config::EngineConfig;

    pub(super) struct Setup {
        pub store: Arc<MessageStore>,
        pub inbox: FolderId,
    }

    /// Create a store with one folder, owned by "alice". Anyone else may
    /// read it.
    pub(super) fn set_up() -> Setup {
        set_up_with(EngineConfig::default())
    }

    pub(super) fn set_up_with(config: EngineConfig) -> Setup {
        crate::init_test_log();

        let store = Arc::new(MessageStore::new(config));
        let inbox = store
            .create_folder("Inbox", FolderRights::reviewer())
            .unwrap();
        store
            .set_rights(inbox, "alice", FolderRights::owner())
            .unwrap();
        Setup { store, inbox }
    }

    pub(super) fn unicode(s: &str) -> PropValue {
        PropValue::Unicode(s.to_owned())
    }

    impl Setup {
        pub fn session(&self, user: &str) -> Session {
            self.session_with(user, false, false)
        }

        pub fn session_with(
            &self,
            user: &str,
            public_folders: bool,
            support_progress: bool,
        ) -> Session {
            Session::new(
                Arc::clone(&self.store),
                LogonContext {
                    user: user.to_owned(),
                    public_folders,
                    support_progress,
                },
            )
        }

        /// Create and save a message in the inbox with the given subject and
        /// primary recipients, the latter numbered from 1.
        pub fn create_message(
            &self,
            user: &str,
            subject: &str,
            recipients: &[&str],
        ) -> MessageId {
            let mut session = self.session(user);
            let handle = session
                .create_message(LOGON_HANDLE, self.inbox, false)
                .unwrap();
            session
                .set_properties(handle, vec![(tags::SUBJECT, unicode(subject))])
                .unwrap();
            session
                .modify_recipients(
                    handle,
                    &[tags::DISPLAY_NAME],
                    recipients
                        .iter()
                        .enumerate()
                        .map(|(ix, name)| RecipientUpdate {
                            row_id: RowId(ix as u32 + 1),
                            row: Some((
                                RecipientType::Primary,
                                vec![unicode(name)],
                            )),
                        })
                        .collect(),
                )
                .unwrap();
            session.save_changes(handle, 0x01).unwrap()
        }
    }
}
