// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transporting a single cursor position across a concurrent operation.

use super::{Component, Operation};

/// Transports the UTF-16 code unit offset `index` across `op`.
///
/// An index strictly after a component's base-range is shifted by the
/// component's effect on length (`+len` for an insert, `-n` for a delete,
/// `0` for a retain). An index that falls inside a deleted range snaps to
/// the start of that range. An insert exactly at `index` does not push the
/// cursor forward: a caret sitting at a position is conceptually "between"
/// characters, and a concurrent insert at that same boundary is not
/// considered to have been typed by this cursor's owner, so the cursor
/// stays put rather than jumping past newly-arrived text.
#[must_use]
pub fn transform_cursor(index: u64, op: &Operation) -> u64 {
    let mut pos = 0u64;
    let mut result = index;
    for component in op.components() {
        if pos >= index {
            break;
        }
        match component {
            Component::Retain(n) => {
                pos += n;
            }
            Component::Insert(s) => {
                result += Component::utf16_len(s);
            }
            Component::Delete(n) => {
                if pos + n > index {
                    result = result.saturating_sub(index - pos);
                } else {
                    result = result.saturating_sub(*n);
                }
                pos += n;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::Operation;

    #[test]
    fn insert_before_cursor_shifts_it_right() {
        let op = Operation::builder().insert("!!").retain(11).build();
        assert_eq!(transform_cursor(5, &op), 7);
    }

    #[test]
    fn insert_at_cursor_does_not_shift_it() {
        let op = Operation::builder().retain(5).insert("x").retain(6).build();
        assert_eq!(transform_cursor(5, &op), 5);
    }

    #[test]
    fn delete_before_cursor_shifts_it_left() {
        let op = Operation::builder().delete(3).retain(8).build();
        assert_eq!(transform_cursor(5, &op), 2);
    }

    #[test]
    fn delete_spanning_cursor_snaps_to_start() {
        let op = Operation::builder().retain(2).delete(5).retain(4).build();
        assert_eq!(transform_cursor(4, &op), 2);
    }
}
