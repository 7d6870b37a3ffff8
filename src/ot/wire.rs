// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire encoding for [`Operation`]: a JSON array of retains, inserts, and
//! deletes, matching the convention used across the collaborative-editing
//! ecosystem: a positive integer is a retain, a negative integer is a
//! delete, and a string is an insert. Deserializing always produces a
//! canonical operation, since the builder coalesces as components are
//! pushed.

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::{Component, Operation};

impl Serialize for Operation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.components.len()))?;
        for component in &self.components {
            match component {
                Component::Retain(n) => seq.serialize_element(&(*n as i64))?,
                Component::Delete(n) => seq.serialize_element(&(-(*n as i64)))?,
                Component::Insert(s) => seq.serialize_element(s)?,
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(OperationVisitor)
    }
}

struct OperationVisitor;

impl<'de> Visitor<'de> for OperationVisitor {
    type Value = Operation;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence of integers (retain/delete) and strings (insert)")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut builder = Operation::builder();
        while let Some(component) = seq.next_element::<WireComponent>()? {
            builder = match component {
                WireComponent::Amount(n) if n >= 0 => builder.retain(n as u64),
                WireComponent::Amount(n) => builder.delete((-n) as u64),
                WireComponent::Text(s) => builder.insert(s),
            };
        }
        Ok(builder.build())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireComponent {
    Amount(i64),
    Text(String),
}
