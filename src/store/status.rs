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

//! Message status and read flags.
//!
//! These change the committed message directly, bypassing transactions. They
//! never touch the change key, the modification time or the commit version,
//! so they cannot make a concurrent save fail.

use std::sync::Arc;
use std::time::Duration;

use chrono::prelude::*;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, info};

use super::message_store::{
    receipt_address, MessageStore, Receipt, ReceiptKind,
};
use super::model::*;
use super::session::Session;
use crate::support::error::Error;
use crate::support::threading;

/// The result of applying read flags to one message's `PidTagMessageFlags`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadFlagsOutcome {
    pub flags: MessageFlags,
    /// Whether a read receipt is owed to the sender.
    pub send_receipt: bool,
}

/// Apply `read_flags` to `flags`.
pub fn apply_read_flags(
    flags: MessageFlags,
    read_flags: ReadFlags,
    set_ever_read: bool,
) -> ReadFlagsOutcome {
    let clear_notify =
        ReadFlags::CLEAR_NOTIFY_READ | ReadFlags::CLEAR_NOTIFY_UNREAD;
    let mut flags = flags;
    let mut send_receipt = false;

    if read_flags.contains(ReadFlags::CLEAR_READ_FLAG) {
        flags.remove(MessageFlags::READ);
    } else if read_flags.contains(ReadFlags::GENERATE_RECEIPT_ONLY) {
        if flags.contains(MessageFlags::NOTIFY_READ) {
            send_receipt = true;
            flags.remove(MessageFlags::NOTIFY_READ);
        }
    } else if read_flags.is_empty() || !(read_flags - clear_notify).is_empty()
    {
        flags.insert(MessageFlags::READ);
        if set_ever_read {
            flags.insert(MessageFlags::EVER_READ);
        }

        if flags.contains(MessageFlags::NOTIFY_READ) {
            send_receipt =
                !read_flags.contains(ReadFlags::SUPPRESS_RECEIPT);
            flags.remove(MessageFlags::NOTIFY_READ);
        }
    }

    if read_flags.contains(ReadFlags::CLEAR_NOTIFY_READ) {
        flags.remove(MessageFlags::NOTIFY_READ);
    }
    if read_flags.contains(ReadFlags::CLEAR_NOTIFY_UNREAD) {
        flags.remove(MessageFlags::NOTIFY_UNREAD);
    }

    ReadFlagsOutcome {
        flags,
        send_receipt,
    }
}

/// The response to `RopSetReadFlags`.
#[derive(Debug)]
pub enum SetReadFlagsResult {
    /// Every message has been processed.
    Complete { partial_completion: bool },
    /// Processing continues in the background.
    InProgress(ReadFlagsProgress),
}

/// Tracks a `RopSetReadFlags` batch running in the background.
#[derive(Debug)]
pub struct ReadFlagsProgress {
    total: usize,
    completed: usize,
    partial_completion: bool,
    results: Receiver<bool>,
}

impl ReadFlagsProgress {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }

    /// Collect whatever results are available without blocking.
    pub fn poll(&mut self) {
        loop {
            match self.results.try_recv() {
                Ok(success) => self.record(success),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finish_early();
                    break;
                },
            }
        }
    }

    /// Block until the batch finishes or `timeout` passes.
    ///
    /// Returns the partial-completion indicator if the batch finished.
    pub fn wait(&mut self, timeout: Duration) -> Option<bool> {
        while !self.is_done() {
            match self.results.recv_timeout(timeout) {
                Ok(success) => self.record(success),
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => self.finish_early(),
            }
        }

        Some(self.partial_completion)
    }

    fn record(&mut self, success: bool) {
        self.completed += 1;
        self.partial_completion |= !success;
    }

    /// The worker went away without reporting everything.
    fn finish_early(&mut self) {
        if !self.is_done() {
            self.completed = self.total;
            self.partial_completion = true;
        }
    }
}

impl Session {
    /// `RopSetMessageStatus`: change the status bits selected by `mask`.
    ///
    /// Returns the status before the change.
    pub fn set_message_status(
        &self,
        folder_handle: HandleId,
        message: MessageId,
        status: u32,
        mask: u32,
    ) -> Result<MessageStatus, Error> {
        let folder = self.folder(folder_handle)?;
        let previous = self.store.update_live(
            folder,
            message,
            &self.logon.user,
            |m, rights| {
                if !rights.can_read() {
                    return Err(Error::AccessDenied);
                }

                let previous = m.status();
                m.set_status(previous.apply(status, mask));
                Ok(previous)
            },
        )?;

        debug!(
            "{} Status of {:?}: {:?} -> {:?} (mask 0x{:08X})",
            self.log_prefix,
            message,
            previous,
            previous.apply(status, mask),
            mask
        );
        Ok(previous)
    }

    /// `RopGetMessageStatus`.
    pub fn get_message_status(
        &self,
        folder_handle: HandleId,
        message: MessageId,
    ) -> Result<MessageStatus, Error> {
        let folder = self.folder(folder_handle)?;
        if !self
            .store
            .folder_rights(folder, &self.logon.user)?
            .can_read()
        {
            return Err(Error::AccessDenied);
        }

        Ok(self
            .store
            .snapshot_message(folder, message, false)?
            .status())
    }

    /// `RopSetReadFlags`: apply `read_flags` to each message in `messages`.
    ///
    /// Messages that cannot be changed are skipped and reported through the
    /// partial-completion indicator. The batch only runs in the background
    /// if the caller asked for that *and* the client declared at logon that
    /// it can handle progress reports.
    pub fn set_read_flags(
        &self,
        folder_handle: HandleId,
        messages: &[MessageId],
        read_flags: u8,
        want_async: bool,
    ) -> Result<SetReadFlagsResult, Error> {
        let folder = self.folder(folder_handle)?;
        let read_flags = ReadFlags::from_raw(read_flags)?;

        if !(want_async && self.logon.support_progress) {
            let mut partial_completion = false;
            for &message in messages {
                partial_completion |= !set_read_flags_one(
                    &self.store,
                    folder,
                    message,
                    read_flags,
                    &self.logon.user,
                )
                .is_ok();
            }

            info!(
                "{} Set read flags {:?} on {} message(s) in {:?}{}",
                self.log_prefix,
                read_flags,
                messages.len(),
                folder,
                if partial_completion { " (partial)" } else { "" }
            );
            return Ok(SetReadFlagsResult::Complete { partial_completion });
        }

        let (tx, rx) = channel::unbounded();
        let store = Arc::clone(&self.store);
        let user = self.logon.user.clone();
        let log_prefix = self.log_prefix.deep_clone();
        let batch = messages.to_vec();
        threading::run_in_background(move || {
            for message in batch {
                let result = set_read_flags_one(
                    &store, folder, message, read_flags, &user,
                );
                if let Err(ref e) = result {
                    debug!(
                        "{} Read flags on {:?}: {}",
                        log_prefix, message, e
                    );
                }
                // The client may stop listening; the batch still completes
                let _ = tx.send(result.is_ok());
            }
        });

        info!(
            "{} Setting read flags {:?} on {} message(s) in {:?} in the \
             background",
            self.log_prefix,
            read_flags,
            messages.len(),
            folder
        );
        Ok(SetReadFlagsResult::InProgress(ReadFlagsProgress {
            total: messages.len(),
            completed: 0,
            partial_completion: false,
            results: rx,
        }))
    }

    /// `RopSetMessageReadFlag`: apply `read_flags` to the message behind an
    /// open handle.
    ///
    /// On public-folder logons `client_data` must be a 24-byte long-term id
    /// and the result tells whether the read state changed. On private
    /// logons the result is always `false`.
    pub fn set_message_read_flag(
        &mut self,
        handle: HandleId,
        client_data: &[u8],
        read_flags: u8,
    ) -> Result<bool, Error> {
        let (folder, message) = {
            let object = self.message(handle)?;
            (object.folder, object.message)
        };
        let read_flags = ReadFlags::from_raw(read_flags)?;
        if self.logon.public_folders && 24 != client_data.len() {
            return Err(Error::InvalidParameter);
        }

        let set_ever_read = self.store.config().set_ever_read;
        let changed = match message {
            Some(message) => {
                let (before, after) = set_read_flags_one(
                    &self.store,
                    folder,
                    message,
                    read_flags,
                    &self.logon.user,
                )?;
                (before ^ after).contains(MessageFlags::READ)
            },

            // Never saved, so the change goes to the pending base
            None => {
                let object = self.message_mut(handle)?;
                let before = object.base.flags();
                let outcome =
                    apply_read_flags(before, read_flags, set_ever_read);
                Arc::make_mut(&mut object.base).set_flags(outcome.flags);
                (before ^ outcome.flags).contains(MessageFlags::READ)
            },
        };

        Ok(self.logon.public_folders && changed)
    }
}

/// Apply read flags to one committed message, queuing a receipt if one is
/// owed.
///
/// Returns the flags before and after.
fn set_read_flags_one(
    store: &MessageStore,
    folder: FolderId,
    message: MessageId,
    read_flags: ReadFlags,
    user: &str,
) -> Result<(MessageFlags, MessageFlags), Error> {
    let set_ever_read = store.config().set_ever_read;
    let (before, outcome, address) =
        store.update_live(folder, message, user, |m, rights| {
            if !rights.can_read() {
                return Err(Error::AccessDenied);
            }

            let before = m.flags();
            let outcome = apply_read_flags(before, read_flags, set_ever_read);
            m.set_flags(outcome.flags);
            Ok((before, outcome, receipt_address(m)))
        })?;

    if outcome.send_receipt {
        store.queue_receipt(Receipt {
            kind: ReceiptKind::Read,
            folder,
            message,
            address,
            user: user.to_owned(),
            at: Utc::now(),
        });
    }

    Ok((before, outcome.flags))
}
