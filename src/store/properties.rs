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

//! Reading and writing the properties of an open message.

use super::message::split_subject;
use super::model::*;
use super::session::{AttachmentObject, MessageObject, ServerObject, Session};
use crate::support::error::{Error, ErrorCode};

/// A property a `SetProperties` or `DeleteProperties` call could not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyProblem {
    /// The index of the property within the request.
    pub index: usize,
    pub tag: PropTag,
    pub code: ErrorCode,
}

impl Session {
    /// `RopGetPropertiesSpecific` on a message or attachment.
    ///
    /// Each requested tag yields either its value as seen by this handle, or
    /// the error code reported in its place.
    pub fn get_properties(
        &self,
        handle: HandleId,
        requested: &[PropTag],
    ) -> Result<Vec<Result<PropValue, ErrorCode>>, Error> {
        match *self.object(handle)? {
            ServerObject::Message(ref object) => {
                Ok(self.get_message_properties(object, requested))
            },
            ServerObject::Attachment(ref object) => {
                Ok(get_attachment_properties(object, requested))
            },
            _ => Err(Error::NullObject),
        }
    }

    fn get_message_properties(
        &self,
        object: &MessageObject,
        requested: &[PropTag],
    ) -> Vec<Result<PropValue, ErrorCode>> {
        let view = object.view();

        // Status and flags are not transacted, so report their current
        // committed value rather than whatever the handle last saw.
        let live = object.message.and_then(|id| {
            self.store.snapshot_message(object.folder, id, true).ok()
        });
        let live = live.as_ref().unwrap_or(&object.base);

        requested
            .iter()
            .map(|&tag| {
                let value = if tags::MESSAGE_FLAGS == tag {
                    match (object.message, view.property(tag)) {
                        (None, Some(pending)) => Some(pending.clone()),
                        _ => Some(PropValue::Integer32(
                            live.flags().bits() as i32,
                        )),
                    }
                } else if tags::MESSAGE_STATUS == tag {
                    Some(PropValue::Integer32(live.status().0 as i32))
                } else if tags::ACCESS_LEVEL == tag {
                    Some(access_level(object.access))
                } else if tags::HAS_NAMED_PROPERTIES == tag {
                    Some(PropValue::Boolean(view.has_named_properties()))
                } else {
                    lookup(|t| view.property(t).cloned(), tag)
                };

                value.ok_or(ErrorCode::NotFound)
            })
            .collect()
    }

    /// `RopSetProperties`: record new values in the handle's transaction.
    ///
    /// Fails as a whole with `AccessDenied` on a read-only handle; otherwise
    /// returns the properties that could not be set.
    pub fn set_properties(
        &mut self,
        handle: HandleId,
        values: Vec<(PropTag, PropValue)>,
    ) -> Result<Vec<PropertyProblem>, Error> {
        let object = self.object_mut(handle)?;
        let is_message = matches!(*object, ServerObject::Message(..));
        let overlay = object.writable_overlay()?;

        let mut problems = Vec::new();
        for (index, (tag, value)) in values.into_iter().enumerate() {
            let code = if Some(value.prop_type()) != tag.prop_type() {
                Some(ErrorCode::InvalidParameter)
            } else if tags::MESSAGE_STATUS == tag {
                Some(ErrorCode::AccessDenied)
            } else {
                None
            };

            if let Some(code) = code {
                problems.push(PropertyProblem { index, tag, code });
                continue;
            }

            if is_message && tags::SUBJECT.id() == tag.id() {
                if let Some(subject) = value.as_str() {
                    let (prefix, normalized) = split_subject(subject);
                    overlay.set_property(
                        tags::SUBJECT_PREFIX,
                        PropValue::Unicode(prefix.to_owned()),
                    );
                    overlay.set_property(
                        tags::NORMALIZED_SUBJECT,
                        PropValue::Unicode(normalized.to_owned()),
                    );
                }
            }

            // Only one string representation of a property is kept
            if let Some(other) = other_string_type(tag) {
                overlay.delete_property(other);
            }

            overlay.set_property(tag, value);
        }

        Ok(problems)
    }

    /// `RopDeleteProperties`: record deletions in the handle's transaction.
    pub fn delete_properties(
        &mut self,
        handle: HandleId,
        deleted: &[PropTag],
    ) -> Result<Vec<PropertyProblem>, Error> {
        let object = self.object_mut(handle)?;
        let is_message = matches!(*object, ServerObject::Message(..));
        let overlay = object.writable_overlay()?;

        let mut problems = Vec::new();
        for (index, &tag) in deleted.iter().enumerate() {
            if is_message
                && (tags::MESSAGE_FLAGS == tag || tags::MESSAGE_STATUS == tag)
            {
                problems.push(PropertyProblem {
                    index,
                    tag,
                    code: ErrorCode::AccessDenied,
                });
                continue;
            }

            if is_message && tags::SUBJECT.id() == tag.id() {
                overlay.delete_property(tags::SUBJECT_PREFIX);
                overlay.delete_property(tags::NORMALIZED_SUBJECT);
            }
            overlay.delete_property(tag);
            if let Some(other) = other_string_type(tag) {
                overlay.delete_property(other);
            }
        }

        Ok(problems)
    }
}

fn get_attachment_properties(
    object: &AttachmentObject,
    requested: &[PropTag],
) -> Vec<Result<PropValue, ErrorCode>> {
    requested
        .iter()
        .map(|&tag| {
            let value = if tags::ACCESS_LEVEL == tag {
                Some(access_level(object.access))
            } else {
                lookup(|t| object.property(t).cloned(), tag)
            };

            value.ok_or(ErrorCode::NotFound)
        })
        .collect()
}

/// `PidTagAccessLevel`: 1 if the handle may modify the object.
fn access_level(access: Access) -> PropValue {
    PropValue::Integer32(match access {
        Access::ReadOnly => 0,
        Access::ReadWrite => 1,
    })
}

fn other_string_type(tag: PropTag) -> Option<PropTag> {
    match tag.prop_type() {
        Some(PropType::Unicode) => Some(tag.with_type(PropType::String8)),
        Some(PropType::String8) => Some(tag.with_type(PropType::Unicode)),
        _ => None,
    }
}

/// Look `tag` up through `get`, accepting a value stored under the other
/// string type if need be.
fn lookup(
    get: impl Fn(PropTag) -> Option<PropValue>,
    tag: PropTag,
) -> Option<PropValue> {
    get(tag).or_else(|| {
        let other = other_string_type(tag)?;
        get(other)?.coerce_string(tag.prop_type()?)
    })
}
