// SPDX-License-Identifier: AGPL-3.0-or-later

//! The operation algebra that underlies collaborative editing.
//!
//! An [`Operation`] is a canonical sequence of [`Component`]s describing a
//! transformation of one string into another. Three pure functions make up
//! the whole contract: [`apply`], [`compose`], and [`transform`]. All
//! lengths here are counted in UTF-16 code units, because that is how the
//! browser-side editor measures positions; this module never touches
//! grapheme clusters or byte offsets directly.

use std::fmt;

mod cursor;
mod wire;

pub use cursor::transform_cursor;

/// One piece of an [`Operation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Component {
    /// Move the cursor forward `n` UTF-16 code units without changing them.
    Retain(u64),
    /// Insert this text at the cursor.
    Insert(String),
    /// Remove `n` UTF-16 code units starting at the cursor.
    Delete(u64),
}

impl Component {
    fn utf16_len(s: &str) -> u64 {
        s.encode_utf16().count() as u64
    }
}

/// A canonical sequence of [`Component`]s.
///
/// Canonical means: no two adjacent components share a kind, and there are
/// no zero-length `Retain`/`Delete` components anywhere (not even a
/// trailing one). [`Operation::builder`] enforces this at construction
/// time rather than requiring a later normalization pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Operation {
    components: Vec<Component>,
    base_len: u64,
    target_len: u64,
}

/// Errors produced while building or applying an [`Operation`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OtError {
    #[error("operation expects a base string of length {expected}, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("cannot compose operations: left target length {left} != right base length {right}")]
    ComposeMismatch { left: u64, right: u64 },
    #[error("cannot transform operations with different base lengths: {a} != {b}")]
    TransformMismatch { a: u64, b: u64 },
}

impl Operation {
    /// Start building an operation from scratch.
    #[must_use]
    pub fn builder() -> OperationBuilder {
        OperationBuilder::default()
    }

    /// Length (UTF-16 code units) of the string this operation expects as input.
    #[must_use]
    pub const fn base_len(&self) -> u64 {
        self.base_len
    }

    /// Length (UTF-16 code units) of the string this operation produces.
    #[must_use]
    pub const fn target_len(&self) -> u64 {
        self.target_len
    }

    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Retain(_)))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match component {
                Component::Retain(n) => write!(f, "retain {n}")?,
                Component::Insert(s) => write!(f, "insert {s:?}")?,
                Component::Delete(n) => write!(f, "delete {n}")?,
            }
        }
        Ok(())
    }
}

/// Builds a canonical [`Operation`] by coalescing adjacent same-kind
/// components as they're pushed, mirroring the `TextDelta`/`TextOp`
/// builders the rest of this codebase's OT layer historically used.
#[derive(Default)]
pub struct OperationBuilder {
    components: Vec<Component>,
    base_len: u64,
    target_len: u64,
}

impl OperationBuilder {
    #[must_use]
    pub fn retain(mut self, n: u64) -> Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;
        self.target_len += n;
        if let Some(Component::Retain(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Retain(n));
        }
        self
    }

    #[must_use]
    pub fn insert(mut self, s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() {
            return self;
        }
        self.target_len += Component::utf16_len(&s);
        // Inserts are kept ahead of a trailing delete at the same position,
        // matching the convention used throughout this OT layer: when a
        // delete and an insert land at the same cursor position, insert
        // commutes forward.
        let insert_before_delete = matches!(self.components.last(), Some(Component::Delete(_)));
        if insert_before_delete {
            let delete = self.components.pop();
            match self.components.last_mut() {
                Some(Component::Insert(last)) => last.push_str(&s),
                _ => self.components.push(Component::Insert(s)),
            }
            if let Some(delete) = delete {
                self.components.push(delete);
            }
        } else if let Some(Component::Insert(last)) = self.components.last_mut() {
            last.push_str(&s);
        } else {
            self.components.push(Component::Insert(s));
        }
        self
    }

    #[must_use]
    pub fn delete(mut self, n: u64) -> Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;
        if let Some(Component::Delete(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Delete(n));
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Operation {
        Operation {
            components: self.components,
            base_len: self.base_len,
            target_len: self.target_len,
        }
    }
}

/// Applies `op` to `s`, producing the transformed string.
///
/// # Errors
///
/// Returns [`OtError::LengthMismatch`] if `s`'s UTF-16 length doesn't equal
/// `op.base_len()`.
pub fn apply(op: &Operation, s: &str) -> Result<String, OtError> {
    let units: Vec<u16> = s.encode_utf16().collect();
    if units.len() as u64 != op.base_len {
        return Err(OtError::LengthMismatch {
            expected: op.base_len,
            actual: units.len() as u64,
        });
    }
    let mut out: Vec<u16> = Vec::with_capacity(op.target_len as usize);
    let mut pos = 0usize;
    for component in &op.components {
        match component {
            Component::Retain(n) => {
                let n = *n as usize;
                out.extend_from_slice(&units[pos..pos + n]);
                pos += n;
            }
            Component::Insert(text) => {
                out.extend(text.encode_utf16());
            }
            Component::Delete(n) => {
                pos += *n as usize;
            }
        }
    }
    String::from_utf16(&out).map_err(|_| OtError::LengthMismatch {
        expected: op.base_len,
        actual: units.len() as u64,
    })
}

/// Composes `a` then `b` into a single equivalent operation.
///
/// # Errors
///
/// Returns [`OtError::ComposeMismatch`] if `a.target_len() != b.base_len()`.
pub fn compose(a: &Operation, b: &Operation) -> Result<Operation, OtError> {
    if a.target_len != b.base_len {
        return Err(OtError::ComposeMismatch {
            left: a.target_len,
            right: b.base_len,
        });
    }
    let mut builder = Operation::builder();
    let mut ai = a.components.iter().peekable();
    let mut bi = b.components.iter().peekable();
    let mut a_cur = ai.next().cloned();
    let mut b_cur = bi.next().cloned();

    while a_cur.is_some() || b_cur.is_some() {
        match (&a_cur, &b_cur) {
            (Some(Component::Delete(n)), _) => {
                builder = builder.delete(*n);
                a_cur = ai.next().cloned();
            }
            (_, Some(Component::Insert(s))) => {
                builder = builder.insert(s.clone());
                b_cur = bi.next().cloned();
            }
            (Some(Component::Retain(na)), Some(Component::Retain(nb))) => {
                let n = (*na).min(*nb);
                builder = builder.retain(n);
                a_cur = advance_u64(*na, n, Component::Retain, &mut ai);
                b_cur = advance_u64(*nb, n, Component::Retain, &mut bi);
            }
            (Some(Component::Insert(s)), Some(Component::Retain(nb))) => {
                let len = Component::utf16_len(s);
                let n = len.min(*nb);
                let (taken, rest) = split_utf16(s, n);
                builder = builder.insert(taken);
                a_cur = if rest.is_empty() {
                    ai.next().cloned()
                } else {
                    Some(Component::Insert(rest))
                };
                b_cur = advance_u64(*nb, n, Component::Retain, &mut bi);
            }
            (Some(Component::Insert(s)), Some(Component::Delete(nb))) => {
                let len = Component::utf16_len(s);
                let n = len.min(*nb);
                let (_, rest) = split_utf16(s, n);
                a_cur = if rest.is_empty() {
                    ai.next().cloned()
                } else {
                    Some(Component::Insert(rest))
                };
                b_cur = advance_u64(*nb, n, Component::Delete, &mut bi);
            }
            (Some(Component::Retain(na)), Some(Component::Delete(nb))) => {
                let n = (*na).min(*nb);
                builder = builder.delete(n);
                a_cur = advance_u64(*na, n, Component::Retain, &mut ai);
                b_cur = advance_u64(*nb, n, Component::Delete, &mut bi);
            }
            (None, Some(Component::Retain(_) | Component::Delete(_))) => {
                unreachable!("compose: base/target lengths were checked equal above")
            }
            (Some(_), None) => {
                unreachable!("compose: base/target lengths were checked equal above")
            }
            (None, None) => break,
        }
    }
    Ok(builder.build())
}

/// Splits the first `n` UTF-16 code units off `s`, returning `(head, tail)`.
fn split_utf16(s: &str, n: u64) -> (String, String) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let n = n as usize;
    let head = String::from_utf16(&units[..n]).expect("valid utf-16 slice");
    let tail = String::from_utf16(&units[n..]).expect("valid utf-16 slice");
    (head, tail)
}

fn advance_u64<'a, I: Iterator<Item = &'a Component>>(
    total: u64,
    consumed: u64,
    ctor: impl Fn(u64) -> Component,
    iter: &mut std::iter::Peekable<I>,
) -> Option<Component> {
    if consumed < total {
        Some(ctor(total - consumed))
    } else {
        iter.next().cloned()
    }
}

/// Transforms two concurrent operations `a` and `b`, both applicable to the
/// same base string, into `(a', b')` such that
/// `compose(a, b') == compose(b, a')` (the TP1 convergence property).
///
/// Concurrent inserts at the same offset are resolved by a deterministic
/// tie-break: `a`'s insertion is placed before `b`'s in the reconciled
/// stream. Callers that need a particular side to win an insert race
/// (e.g. "operations already committed to the log win") must put that
/// operation first.
///
/// # Errors
///
/// Returns [`OtError::TransformMismatch`] if `a.base_len() != b.base_len()`.
pub fn transform(a: &Operation, b: &Operation) -> Result<(Operation, Operation), OtError> {
    if a.base_len != b.base_len {
        return Err(OtError::TransformMismatch {
            a: a.base_len,
            b: b.base_len,
        });
    }
    let mut a_prime = Operation::builder();
    let mut b_prime = Operation::builder();
    let mut ai = a.components.iter().peekable();
    let mut bi = b.components.iter().peekable();
    let mut a_cur = ai.next().cloned();
    let mut b_cur = bi.next().cloned();

    while a_cur.is_some() || b_cur.is_some() {
        match (&a_cur, &b_cur) {
            (Some(Component::Insert(s)), _) => {
                let len = Component::utf16_len(s);
                a_prime = a_prime.insert(s.clone());
                b_prime = b_prime.retain(len);
                a_cur = ai.next().cloned();
            }
            (_, Some(Component::Insert(s))) => {
                let len = Component::utf16_len(s);
                b_prime = b_prime.insert(s.clone());
                a_prime = a_prime.retain(len);
                b_cur = bi.next().cloned();
            }
            (Some(Component::Retain(na)), Some(Component::Retain(nb))) => {
                let n = (*na).min(*nb);
                a_prime = a_prime.retain(n);
                b_prime = b_prime.retain(n);
                a_cur = advance_u64(*na, n, Component::Retain, &mut ai);
                b_cur = advance_u64(*nb, n, Component::Retain, &mut bi);
            }
            (Some(Component::Delete(na)), Some(Component::Delete(nb))) => {
                let n = (*na).min(*nb);
                a_cur = advance_u64(*na, n, Component::Delete, &mut ai);
                b_cur = advance_u64(*nb, n, Component::Delete, &mut bi);
            }
            (Some(Component::Delete(na)), Some(Component::Retain(nb))) => {
                let n = (*na).min(*nb);
                a_prime = a_prime.delete(n);
                a_cur = advance_u64(*na, n, Component::Delete, &mut ai);
                b_cur = advance_u64(*nb, n, Component::Retain, &mut bi);
            }
            (Some(Component::Retain(na)), Some(Component::Delete(nb))) => {
                let n = (*na).min(*nb);
                b_prime = b_prime.delete(n);
                a_cur = advance_u64(*na, n, Component::Retain, &mut ai);
                b_cur = advance_u64(*nb, n, Component::Delete, &mut bi);
            }
            (None, None) => break,
            (None, Some(_)) | (Some(_), None) => {
                unreachable!("transform: base lengths were checked equal above")
            }
        }
    }
    Ok((a_prime.build(), b_prime.build()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn apply_rejects_wrong_base_length() {
        let op = Operation::builder().retain(5).build();
        assert!(matches!(
            apply(&op, "hi"),
            Err(OtError::LengthMismatch { expected: 5, actual: 2 })
        ));
    }

    #[test]
    fn apply_inserts_and_retains() {
        let op = Operation::builder().retain(5).insert(" world").build();
        assert_eq!(apply(&op, "hello").unwrap(), "hello world");
    }

    #[test]
    fn apply_deletes() {
        let op = Operation::builder().retain(3).delete(3).build();
        assert_eq!(apply(&op, "abcdef").unwrap(), "abc");
    }

    #[test]
    fn builder_merges_adjacent_components() {
        let op = Operation::builder()
            .retain(2)
            .retain(3)
            .insert("a")
            .insert("b")
            .delete(1)
            .delete(1)
            .build();
        assert_eq!(
            op.components(),
            &[
                Component::Retain(5),
                Component::Insert("ab".into()),
                Component::Delete(2)
            ]
        );
    }

    #[test]
    fn compose_matches_sequential_apply() {
        let a = Operation::builder().retain(5).insert(" world").build();
        let b = Operation::builder().insert(">> ").retain(11).build();
        let composed = compose(&a, &b).unwrap();
        let start = "hello";
        let via_compose = apply(&composed, start).unwrap();
        let via_sequence = apply(&b, &apply(&a, start).unwrap()).unwrap();
        assert_eq!(via_compose, via_sequence);
        assert_eq!(via_compose, ">> hello world");
    }

    #[test]
    fn transform_converges_concurrent_inserts_at_same_offset() {
        let start = "hello";
        let a = Operation::builder().insert("X").retain(5).build();
        let b = Operation::builder().insert("Y").retain(5).build();
        let (a_prime, b_prime) = transform(&a, &b).unwrap();
        let via_a_then_bprime = apply(&b_prime, &apply(&a, start).unwrap()).unwrap();
        let via_b_then_aprime = apply(&a_prime, &apply(&b, start).unwrap()).unwrap();
        assert_eq!(via_a_then_bprime, via_b_then_aprime);
        assert_eq!(via_a_then_bprime, "XYhello");
    }

    #[test]
    fn transform_converges_insert_vs_delete() {
        let start = "abcdef";
        let delete_def = Operation::builder().retain(3).delete(3).build();
        let insert_x_at_3 = Operation::builder()
            .retain(3)
            .insert("X")
            .retain(3)
            .build();
        let (a_prime, b_prime) = transform(&delete_def, &insert_x_at_3).unwrap();
        let via_delete_then_insert =
            apply(&b_prime, &apply(&delete_def, start).unwrap()).unwrap();
        let via_insert_then_delete =
            apply(&a_prime, &apply(&insert_x_at_3, start).unwrap()).unwrap();
        assert_eq!(via_delete_then_insert, via_insert_then_delete);
        assert_eq!(via_delete_then_insert, "abcX");
    }

    #[test]
    fn transform_converges_concurrent_deletes_of_same_region() {
        let start = "abcdef";
        let a = Operation::builder().retain(1).delete(3).retain(2).build();
        let b = Operation::builder().retain(1).delete(3).retain(2).build();
        let (a_prime, b_prime) = transform(&a, &b).unwrap();
        let via_a_then_bprime = apply(&b_prime, &apply(&a, start).unwrap()).unwrap();
        let via_b_then_aprime = apply(&a_prime, &apply(&b, start).unwrap()).unwrap();
        assert_eq!(via_a_then_bprime, via_b_then_aprime);
        assert_eq!(via_a_then_bprime, "af");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let op = Operation::builder().retain(2).insert("x").build();
        let reparsed: Operation =
            serde_json::from_str(&serde_json::to_string(&op).unwrap()).unwrap();
        assert_eq!(op, reparsed);
    }
}
