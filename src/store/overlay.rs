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

//! Per-handle pending changes.
//!
//! Nothing here touches shared state; an overlay only records deltas against
//! whatever snapshot its handle was based on.

use std::collections::BTreeMap;

use super::message::{Attachment, Message};
use super::model::*;
use crate::support::error::Error;

/// The uncommitted changes made through one Message or Attachment handle.
///
/// Entries map to `None` when the handle deleted the property, recipient or
/// attachment.
#[derive(Clone, Debug, Default)]
pub struct TransactionOverlay {
    properties: BTreeMap<PropTag, Option<PropValue>>,
    recipients: BTreeMap<RowId, Option<RecipientRow>>,
    attachments: BTreeMap<AttachmentId, Option<Attachment>>,
    /// Lower bound for the next attachment number. Survives `clear()` since
    /// attachments may be created and not yet saved into the overlay.
    next_attachment: u32,
}

impl TransactionOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
            && self.recipients.is_empty()
            && self.attachments.is_empty()
    }

    pub fn clear(&mut self) {
        self.properties.clear();
        self.recipients.clear();
        self.attachments.clear();
    }

    pub fn set_property(&mut self, tag: PropTag, value: PropValue) {
        self.properties.insert(tag, Some(value));
    }

    pub fn delete_property(&mut self, tag: PropTag) {
        self.properties.insert(tag, None);
    }

    pub fn put_recipient(&mut self, row: RecipientRow) {
        self.recipients.insert(row.row_id, Some(row));
    }

    pub fn delete_recipient(&mut self, row_id: RowId) {
        self.recipients.insert(row_id, None);
    }

    pub fn put_attachment(&mut self, id: AttachmentId, attachment: Attachment) {
        self.attachments.insert(id, Some(attachment));
    }

    pub fn delete_attachment(&mut self, id: AttachmentId) {
        self.attachments.insert(id, None);
    }

    /// Pick a number for a new attachment of `base` that no committed,
    /// pending or previously allocated attachment uses.
    pub fn allocate_attachment(
        &mut self,
        base: &Message,
    ) -> Result<AttachmentId, Error> {
        let after = |id: AttachmentId| id.0.checked_add(1);
        let mut next = self.next_attachment;
        for id in base.attachments().map(|(id, _)| id) {
            next = next.max(after(id).ok_or(Error::StoreFull)?);
        }
        if let Some(&id) = self.attachments.keys().next_back() {
            next = next.max(after(id).ok_or(Error::StoreFull)?);
        }

        self.next_attachment = next.checked_add(1).ok_or(Error::StoreFull)?;
        Ok(AttachmentId(next))
    }

    /// The pending change to `tag`, if any. `Some(None)` means deleted.
    pub fn property_delta(&self, tag: PropTag) -> Option<Option<&PropValue>> {
        self.properties.get(&tag).map(Option::as_ref)
    }

    pub fn properties(
        &self,
    ) -> impl Iterator<Item = (PropTag, Option<&PropValue>)> + '_ {
        self.properties.iter().map(|(&tag, v)| (tag, v.as_ref()))
    }

    pub fn recipients(
        &self,
    ) -> impl Iterator<Item = (RowId, Option<&RecipientRow>)> + '_ {
        self.recipients.iter().map(|(&id, r)| (id, r.as_ref()))
    }

    pub fn attachments(
        &self,
    ) -> impl Iterator<Item = (AttachmentId, Option<&Attachment>)> + '_ {
        self.attachments.iter().map(|(&id, a)| (id, a.as_ref()))
    }

    /// Whether the overlay holds a change (set or delete) for `tag`.
    pub fn touches_property(&self, tag: PropTag) -> bool {
        self.properties.contains_key(&tag)
    }

    /// View `base` through this overlay.
    pub fn view<'a>(&'a self, base: &'a Message) -> View<'a> {
        View {
            base,
            overlay: self,
        }
    }
}

/// A read-only view of a message as seen by one handle: the handle's base
/// snapshot with its overlay on top.
#[derive(Clone, Copy)]
pub struct View<'a> {
    base: &'a Message,
    overlay: &'a TransactionOverlay,
}

impl<'a> View<'a> {
    pub fn base(&self) -> &'a Message {
        self.base
    }

    pub fn property(&self, tag: PropTag) -> Option<&'a PropValue> {
        match self.overlay.property_delta(tag) {
            Some(delta) => delta,
            None => self.base.property(tag),
        }
    }

    /// All stored properties, in tag order.
    pub fn properties(&self) -> BTreeMap<PropTag, &'a PropValue> {
        let mut merged = self
            .base
            .properties()
            .map(|(&tag, value)| (tag, value))
            .collect::<BTreeMap<_, _>>();
        for (&tag, delta) in &self.overlay.properties {
            match *delta {
                Some(ref value) => {
                    merged.insert(tag, value);
                },
                None => {
                    merged.remove(&tag);
                },
            }
        }

        merged
    }

    pub fn has_named_properties(&self) -> bool {
        self.properties().keys().any(|tag| tag.is_named())
    }

    pub fn recipient(&self, row_id: RowId) -> Option<&'a RecipientRow> {
        match self.overlay.recipients.get(&row_id) {
            Some(delta) => delta.as_ref(),
            None => self.base.recipient(row_id),
        }
    }

    /// All visible recipient rows, in ascending `RowId` order.
    pub fn recipients(&self) -> Vec<&'a RecipientRow> {
        let mut merged = self
            .base
            .recipients()
            .map(|row| (row.row_id, row))
            .collect::<BTreeMap<_, _>>();
        for (&row_id, delta) in &self.overlay.recipients {
            match *delta {
                Some(ref row) => {
                    merged.insert(row_id, row);
                },
                None => {
                    merged.remove(&row_id);
                },
            }
        }

        merged.into_iter().map(|(_, row)| row).collect()
    }

    pub fn attachment(&self, id: AttachmentId) -> Option<&'a Attachment> {
        match self.overlay.attachments.get(&id) {
            Some(delta) => delta.as_ref(),
            None => self.base.attachment(id),
        }
    }

    /// All visible attachments, in ascending number order.
    pub fn attachments(&self) -> Vec<(AttachmentId, &'a Attachment)> {
        let mut merged =
            self.base.attachments().collect::<BTreeMap<_, _>>();
        for (&id, delta) in &self.overlay.attachments {
            match *delta {
                Some(ref attachment) => {
                    merged.insert(id, attachment);
                },
                None => {
                    merged.remove(&id);
                },
            }
        }

        merged.into_iter().collect()
    }
}
