// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Declarations of relationships between record types.

use crate::model::Model;

/// How the owner of a relation refers to the related records.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RelationKind {
    /// The related records hold the owner's id in `key`.  Expands into a list.
    HasMany,

    /// The owner holds the related record's id in `key`.  Expands into a single object.
    BelongsTo,
}

/// A relationship that can be eagerly loaded.
#[derive(Clone, Debug)]
pub struct Relation {
    /// Name of the field that receives the expanded records.
    pub name: &'static str,

    /// Kind of the relationship.
    pub kind: RelationKind,

    /// Table holding the related records.
    pub table: &'static str,

    /// Field that links both sides: in the related records for `HasMany` and in the owner for
    /// `BelongsTo`.
    pub key: &'static str,

    /// Relations of the related type, used to resolve nested expansions.
    pub relations: fn() -> Vec<Relation>,
}

impl Relation {
    /// Declares that the owner has many records of type `C` whose `foreign_key` holds the
    /// owner's id.
    pub fn has_many<C: Model>(name: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::HasMany,
            table: C::table_name(),
            key: foreign_key,
            relations: C::relations,
        }
    }

    /// Declares that the owner refers to one record of type `C` through its `local_key`.
    pub fn belongs_to<C: Model>(name: &'static str, local_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::BelongsTo,
            table: C::table_name(),
            key: local_key,
            relations: C::relations,
        }
    }

    /// Returns true if expanding this relation yields a list of records.
    pub fn is_many(&self) -> bool {
        self.kind == RelationKind::HasMany
    }
}

/// Finds the relation called `name` in `relations`.
pub(crate) fn find<'a>(relations: &'a [Relation], name: &str) -> Option<&'a Relation> {
    relations.iter().find(|r| r.name == name)
}
