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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Mapistore.
///
/// This is stored in a file named `mapistore.toml`, typically under
/// `/etc/mapistore` or `/usr/local/etc/mapistore`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Behavioural options of the Message object engine.
    ///
    /// Several of these select between behaviours that differ across server
    /// generations and are all observable by clients.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Where committed state is kept between runs.
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How `BestAccess` opens resolve when the user lacks write permission.
    pub best_access: BestAccessPolicy,

    /// Whether a non-forced save fails when another handle committed to the
    /// same message after this handle's snapshot was taken.
    pub conflict_detection: ConflictDetection,

    /// What happens when pending changes touch a property the client may
    /// not modify (e.g. `PidTagHasAttachments` or the `mfRead` bit after
    /// the first save).
    pub read_only_properties: ReadOnlyPropertyPolicy,

    /// If true, `mfEverRead` is set whenever `mfRead` is set.
    pub set_ever_read: bool,

    /// The number of bytes available for recipient rows in a response.
    ///
    /// Open, reload and `ReadRecipients` return as many rows as fit.
    pub response_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            best_access: BestAccessPolicy::default(),
            conflict_detection: ConflictDetection::default(),
            read_only_properties: ReadOnlyPropertyPolicy::default(),
            set_ever_read: true,
            response_buffer_size: 0x8000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BestAccessPolicy {
    /// Fall back to a read-only handle.
    ReadOnly,
    /// Grant a read/write handle; the eventual save is refused.
    ReadWrite,
}

impl Default for BestAccessPolicy {
    fn default() -> Self {
        BestAccessPolicy::ReadOnly
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictDetection {
    /// Report `ObjectModified` on conflicting non-forced saves.
    Strict,
    /// Always accept the save; the last writer wins.
    Lenient,
}

impl Default for ConflictDetection {
    fn default() -> Self {
        ConflictDetection::Strict
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadOnlyPropertyPolicy {
    /// Fail the save with a general failure.
    Reject,
    /// Drop the offending change and commit the rest.
    Ignore,
}

impl Default for ReadOnlyPropertyPolicy {
    fn default() -> Self {
        ReadOnlyPropertyPolicy::Reject
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The snapshot file holding committed state.
    ///
    /// If unset, the store lives only in memory.
    pub snapshot: Option<PathBuf>,
}
