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

//! Offline administration of store snapshots.

use std::io;
use std::path::PathBuf;

use log::info;

use super::main::{CommonOptions, InitSubcommand, InspectSubcommand};
use crate::store::model::FolderRights;
use crate::store::MessageStore;
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

fn snapshot_path(config: &SystemConfig, common: &CommonOptions) -> PathBuf {
    match common
        .snapshot
        .clone()
        .or_else(|| config.storage.snapshot.clone())
    {
        Some(path) => path,
        None => die!(
            EX_USAGE,
            "No snapshot given and none configured; use --snapshot=FILE"
        ),
    }
}

pub(super) fn init(config: SystemConfig, cmd: InitSubcommand) {
    let path = snapshot_path(&config, &cmd.common);
    if path.exists() && !cmd.force {
        die!(
            EX_CANTCREAT,
            "'{}' already exists; use --force to replace it",
            path.display()
        );
    }

    let store = MessageStore::new(config.engine);
    for name in &cmd.folders {
        let result = store
            .create_folder(name, FolderRights::reviewer())
            .and_then(|folder| match cmd.owner {
                Some(ref owner) => {
                    store.set_rights(folder, owner, FolderRights::owner())
                },
                None => Ok(()),
            });
        if let Err(e) = result {
            die!(EX_SOFTWARE, "Unable to create folder '{}': {}", name, e);
        }
        info!("Created folder '{}'", name);
    }

    if let Err(e) = store.write_snapshot(&path) {
        die!(EX_CANTCREAT, "Unable to write '{}': {}", path.display(), e);
    }
}

pub(super) fn inspect(config: SystemConfig, cmd: InspectSubcommand) {
    let path = snapshot_path(&config, &cmd.common);
    let store = match MessageStore::read_snapshot(&path, config.engine) {
        Ok(store) => store,
        Err(Error::Io(ref e)) if io::ErrorKind::NotFound == e.kind() => {
            die!(EX_NOINPUT, "'{}' does not exist", path.display())
        },
        Err(e) => {
            die!(EX_DATAERR, "Unable to read '{}': {}", path.display(), e)
        },
    };

    for (folder, name) in store.folders() {
        let messages = match store.folder_summary(folder) {
            Ok(messages) => messages,
            Err(e) => die!(EX_SOFTWARE, "Unable to list '{}': {}", name, e),
        };

        println!("{} {}", folder.0, name);
        for message in messages {
            if message.soft_deleted && !cmd.soft_deleted {
                continue;
            }

            println!(
                "  {:>8} flags={:04x} status={:04x} recipients={}{} {}",
                message.id.0,
                message.flags.bits(),
                message.status.0,
                message.recipients,
                if message.soft_deleted { " deleted" } else { "" },
                message.subject.as_deref().unwrap_or("(no subject)"),
            );
        }
    }

    let receipts = store.pending_receipts();
    if receipts > 0 {
        println!("{} receipt(s) pending delivery", receipts);
    }
}
