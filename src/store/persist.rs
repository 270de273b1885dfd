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

//! Snapshots of committed state.
//!
//! A snapshot is the CBOR encoding of the whole store. It is written to a
//! temporary file in the destination directory and then renamed over the
//! old snapshot, so readers only ever see a complete file.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::message_store::{MessageStore, StoreState};
use crate::support::error::Error;
use crate::support::system_config::EngineConfig;

/// The on-disk envelope. The version allows the format to evolve.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    state: StoreState,
}

const SNAPSHOT_VERSION: u32 = 1;

impl MessageStore {
    /// Atomically write the committed state of this store to `path`.
    ///
    /// Open handles are unaffected; their pending changes are not part of
    /// committed state.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), Error> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            state: self.lock().clone(),
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmpfile = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmpfile.as_file_mut());
            serde_cbor::to_writer(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        tmpfile.as_file().sync_all()?;
        tmpfile.persist(path)?;

        info!(
            "Wrote snapshot of {} folder(s) to {}",
            snapshot.state.folders.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a store previously written with `write_snapshot()`.
    pub fn read_snapshot(
        path: &Path,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        let reader = BufReader::new(fs::File::open(path)?);
        let snapshot: Snapshot = serde_cbor::from_reader(reader)?;
        if SNAPSHOT_VERSION != snapshot.version {
            return Err(Error::InvalidParameter);
        }

        Ok(MessageStore::from_state(config, snapshot.state))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::store::message::Message;
    use crate::store::message_store::CommitRequest;
    use crate::store::model::*;
    use crate::store::overlay::TransactionOverlay;

    #[test]
    fn snapshot_preserves_committed_state() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("store.cbor");

        let store = MessageStore::new(EngineConfig::default());
        let folder =
            store.create_folder("Inbox", FolderRights::owner()).unwrap();
        store
            .set_rights(folder, "bob", FolderRights::reviewer())
            .unwrap();

        let draft = Message::new_draft(
            "alice",
            false,
            store.config(),
            Utc::now(),
            vec![0xAB; 16],
        );
        let mut overlay = TransactionOverlay::new();
        overlay.set_property(tags::SUBJECT, PropValue::Unicode("hi".into()));
        overlay.set_property(
            PropTag::new(0x8001, 0x0102),
            PropValue::Binary(vec![1, 2, 3]),
        );
        let (id, committed) = store
            .commit(CommitRequest {
                folder,
                message: None,
                base: &draft,
                overlay: &overlay,
                user: "alice",
                force: false,
            })
            .unwrap();

        store.write_snapshot(&path).unwrap();
        let reloaded =
            MessageStore::read_snapshot(&path, EngineConfig::default())
                .unwrap();

        assert_eq!(store.folders(), reloaded.folders());
        assert_eq!(
            FolderRights::reviewer(),
            reloaded.folder_rights(folder, "bob").unwrap()
        );
        let message = reloaded.snapshot_message(folder, id, false).unwrap();
        assert!(!Arc::ptr_eq(&committed, &message));
        assert_eq!(
            committed.properties().collect::<Vec<_>>(),
            message.properties().collect::<Vec<_>>()
        );
        assert_eq!(committed.flags(), message.flags());
        assert_eq!(committed.version(), message.version());

        // Identifiers continue where the old store left off
        let (next, saved) = reloaded
            .commit(CommitRequest {
                folder,
                message: None,
                base: &draft,
                overlay: &overlay,
                user: "alice",
                force: false,
            })
            .unwrap();
        assert!(next > id);
        assert_eq!(
            committed.change_key().unwrap()[..16],
            saved.change_key().unwrap()[..16]
        );
    }

    #[test]
    fn missing_snapshot() {
        let root = TempDir::new().unwrap();
        assert_matches!(
            Err(Error::Io(..)),
            MessageStore::read_snapshot(
                &root.path().join("nx"),
                EngineConfig::default()
            )
        );
    }
}
