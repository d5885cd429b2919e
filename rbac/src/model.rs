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

//! Data types for access control rules.

use async_trait::async_trait;
use restforge_core::model::{Base, Model};
use serde::{Deserialize, Serialize};

/// Policy type of rules that grant an action on an object.
pub const PTYPE_POLICY: &str = "p";

/// Policy type of rules that group a user into a role.
pub const PTYPE_GROUPING: &str = "g";

/// A persisted access control rule, stored in the `rbac_policies` table.
///
/// Policies carry `(subject, object, action)` in `v0`, `v1` and `v2`.  Groupings carry
/// `(user, role)` in `v0` and `v1`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Policy {
    /// Common fields.
    #[serde(flatten)]
    pub base: Base,

    /// Either `p` or `g`.
    pub ptype: String,

    /// Subject of a policy or user of a grouping.
    pub v0: String,

    /// Object of a policy or role of a grouping.
    pub v1: String,

    /// Action of a policy.
    pub v2: String,
}

impl Policy {
    /// Creates a rule that lets `subject` perform `action` on `object`.
    pub fn policy(subject: &str, object: &str, action: &str) -> Self {
        Self {
            ptype: PTYPE_POLICY.to_owned(),
            v0: subject.to_owned(),
            v1: object.to_owned(),
            v2: action.to_owned(),
            ..Default::default()
        }
    }

    /// Creates a rule that groups `user` into `role`.
    pub fn grouping(user: &str, role: &str) -> Self {
        Self {
            ptype: PTYPE_GROUPING.to_owned(),
            v0: user.to_owned(),
            v1: role.to_owned(),
            ..Default::default()
        }
    }

    /// Returns true if both rules express the same tuple, regardless of their storage metadata.
    pub fn same_rule(&self, other: &Policy) -> bool {
        self.ptype == other.ptype
            && self.v0 == other.v0
            && self.v1 == other.v1
            && self.v2 == other.v2
    }
}

#[async_trait]
impl Model for Policy {
    fn table_name() -> &'static str {
        "rbac_policies"
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}
