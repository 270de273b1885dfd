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

//! The recipient table of an open message.

use std::collections::BTreeSet;

use super::message::fit_rows;
use super::model::*;
use super::session::Session;
use crate::support::error::Error;

/// One row of a `RopModifyRecipients` request.
#[derive(Clone, Debug)]
pub struct RecipientUpdate {
    pub row_id: RowId,
    /// The recipient type and the values for each requested column, or
    /// `None` if the row was sent with a size of zero, which deletes it.
    pub row: Option<(RecipientType, Vec<PropValue>)>,
}

impl RecipientUpdate {
    pub fn delete(row_id: RowId) -> Self {
        RecipientUpdate { row_id, row: None }
    }
}

impl Session {
    /// `RopModifyRecipients`: create, replace or delete recipient rows in
    /// the handle's transaction.
    ///
    /// The whole request is validated before anything changes.
    pub fn modify_recipients(
        &mut self,
        handle: HandleId,
        columns: &[PropTag],
        rows: Vec<RecipientUpdate>,
    ) -> Result<(), Error> {
        let object = self.message_mut(handle)?;
        object.require_writable()?;

        let mut seen = BTreeSet::new();
        for &column in columns {
            if tags::ROW_ID == column
                || column.prop_type().is_none()
                || !seen.insert(column)
            {
                return Err(Error::InvalidParameter);
            }
        }

        for update in &rows {
            if let Some((_, ref values)) = update.row {
                if values.len() != columns.len()
                    || columns
                        .iter()
                        .zip(values)
                        .any(|(c, v)| c.prop_type() != Some(v.prop_type()))
                {
                    return Err(Error::InvalidParameter);
                }
            }
        }

        for update in rows {
            match update.row {
                None => object.overlay.delete_recipient(update.row_id),
                Some((recipient_type, values)) => {
                    object.overlay.put_recipient(RecipientRow {
                        row_id: update.row_id,
                        recipient_type,
                        properties: columns
                            .iter()
                            .copied()
                            .zip(values)
                            .collect(),
                    })
                },
            }
        }

        Ok(())
    }

    /// `RopRemoveAllRecipients`: delete every recipient visible through the
    /// handle.
    pub fn remove_all_recipients(
        &mut self,
        handle: HandleId,
    ) -> Result<(), Error> {
        let object = self.message_mut(handle)?;
        object.require_writable()?;

        let visible = object
            .view()
            .recipients()
            .into_iter()
            .map(|r| r.row_id)
            .collect::<Vec<_>>();
        for row_id in visible {
            object.overlay.delete_recipient(row_id);
        }

        Ok(())
    }

    /// `RopReadRecipients`: return rows in ascending `RowId` order starting
    /// at `start`, as many as fit in a response.
    ///
    /// `RowId::FIRST` starts at the first row whatever its id.
    pub fn read_recipients(
        &self,
        handle: HandleId,
        start: RowId,
    ) -> Result<Vec<RecipientRow>, Error> {
        let object = self.message(handle)?;
        let rows = object.view().recipients();
        if rows.is_empty() {
            return Err(Error::NotFound);
        }

        let skip = if RowId::FIRST == start {
            0
        } else {
            rows.iter()
                .position(|r| start == r.row_id)
                .ok_or(Error::NotFound)?
        };

        Ok(fit_rows(
            rows.into_iter().skip(skip),
            self.store.config().response_buffer_size,
        ))
    }
}
