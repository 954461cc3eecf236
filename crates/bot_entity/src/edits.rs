//! Position-indexed text edits on tag values.
//!
//! `insert_text` / `delete_text` edit the current *effective* value of a tag,
//! write the result to the base tag or to one mask space, and produce an
//! [`EditDescriptor`]: a version marker plus a preserve/insert/delete op
//! sequence. Descriptors are queued for the replicated-document layer, which
//! owns merging with concurrent remote edits.
//!
//! Indices count characters. Negative indices count from the end, and every
//! index is clamped to `[0, len]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::id::BotId;
use crate::store::{BotStore, check_tag_name};
use crate::value::TagValue;

/// One step of an edit, applied left to right over the old text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    /// Keep the next `n` characters.
    Preserve(usize),
    /// Insert text at the cursor.
    Insert(String),
    /// Drop the next `n` characters.
    Delete(usize),
}

/// Identifies the local state an edit was made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditVersion {
    /// The site (runtime instance) that produced the edit.
    pub site: String,
    /// Monotonic per-site edit counter.
    pub counter: u64,
}

/// A CRDT-style edit, opaque to everything but the document layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDescriptor {
    pub version: EditVersion,
    pub ops: Vec<EditOp>,
}

/// An edit addressed to a tag, or to a tag mask when `space` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagEdit {
    pub bot: BotId,
    pub tag: String,
    pub space: Option<String>,
    pub edit: EditDescriptor,
}

/// Resolve a possibly negative index against a length, clamping to `[0, len]`.
#[must_use]
pub fn resolve_index(index: i64, len: usize) -> usize {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { len_i + index } else { index };
    usize::try_from(resolved.clamp(0, len_i)).unwrap_or(len)
}

/// Apply an op sequence to `text`. Ops that run past the end are truncated;
/// characters not covered by the ops are preserved.
#[must_use]
pub fn apply_ops(text: &str, ops: &[EditOp]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for op in ops {
        match op {
            EditOp::Preserve(n) => {
                let end = cursor.saturating_add(*n).min(chars.len());
                out.extend(&chars[cursor..end]);
                cursor = end;
            }
            EditOp::Insert(s) => out.push_str(s),
            EditOp::Delete(n) => cursor = cursor.saturating_add(*n).min(chars.len()),
        }
    }
    out.extend(&chars[cursor..]);
    out
}

impl<L> BotStore<L> {
    /// Insert `text` at `index` into the effective value of `tag`.
    ///
    /// The result is written to the base tag when `space` is `None`, or to
    /// the mask in `space` otherwise.
    pub fn insert_text(
        &mut self,
        id: &BotId,
        tag: &str,
        index: i64,
        text: &str,
        space: Option<&str>,
    ) -> Result<EditDescriptor, StoreError> {
        let current = self.edit_source(id, tag, space)?;
        let at = resolve_index(index, current.chars().count());
        let mut ops = Vec::with_capacity(2);
        if at > 0 {
            ops.push(EditOp::Preserve(at));
        }
        if !text.is_empty() {
            ops.push(EditOp::Insert(text.to_string()));
        }
        self.commit_edit(id, tag, space, &current, ops)
    }

    /// Delete `count` characters starting at `index` from the effective value
    /// of `tag`. The range is clamped to the end of the text.
    pub fn delete_text(
        &mut self,
        id: &BotId,
        tag: &str,
        index: i64,
        count: usize,
        space: Option<&str>,
    ) -> Result<EditDescriptor, StoreError> {
        let current = self.edit_source(id, tag, space)?;
        let len = current.chars().count();
        let at = resolve_index(index, len);
        let count = count.min(len - at);
        let mut ops = Vec::with_capacity(2);
        if at > 0 {
            ops.push(EditOp::Preserve(at));
        }
        if count > 0 {
            ops.push(EditOp::Delete(count));
        }
        self.commit_edit(id, tag, space, &current, ops)
    }

    /// Apply an edit received from elsewhere to the current effective value.
    ///
    /// This does no conflict resolution; the document layer is expected to
    /// have transformed the ops already. The edit is not re-queued.
    pub fn apply_edit(
        &mut self,
        id: &BotId,
        tag: &str,
        edit: &EditDescriptor,
        space: Option<&str>,
    ) -> Result<(), StoreError> {
        let current = self.edit_source(id, tag, space)?;
        let updated = apply_ops(&current, &edit.ops);
        self.write_edited(id, tag, space, updated)
    }

    /// Drain edits produced locally since the last call.
    pub fn take_edits(&mut self) -> Vec<TagEdit> {
        std::mem::take(&mut self.pending_edits)
    }

    fn edit_source(&self, id: &BotId, tag: &str, space: Option<&str>) -> Result<String, StoreError> {
        check_tag_name(tag)?;
        if let Some(space) = space {
            self.spaces.check(space)?;
        }
        self.bot(id)?;
        Ok(self
            .effective_tag(id, tag)
            .map(TagValue::to_text)
            .unwrap_or_default())
    }

    fn commit_edit(
        &mut self,
        id: &BotId,
        tag: &str,
        space: Option<&str>,
        current: &str,
        ops: Vec<EditOp>,
    ) -> Result<EditDescriptor, StoreError> {
        let updated = apply_ops(current, &ops);
        self.write_edited(id, tag, space, updated)?;

        self.edit_counter += 1;
        let edit = EditDescriptor {
            version: EditVersion {
                site: self.site_id.clone(),
                counter: self.edit_counter,
            },
            ops,
        };
        debug!(bot = %id, tag, counter = self.edit_counter, "text edit recorded");
        self.pending_edits.push(TagEdit {
            bot: id.clone(),
            tag: tag.to_string(),
            space: space.map(str::to_string),
            edit: edit.clone(),
        });
        Ok(edit)
    }

    fn write_edited(
        &mut self,
        id: &BotId,
        tag: &str,
        space: Option<&str>,
        text: String,
    ) -> Result<(), StoreError> {
        let value = TagValue::from(Value::String(text));
        match space {
            Some(space) => self.set_tag_mask(id, tag, value, space),
            None => self.set_tag(id, tag, value),
        }
    }
}
