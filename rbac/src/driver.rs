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

//! Policy enforcement.

use crate::model::{PTYPE_GROUPING, PTYPE_POLICY, Policy};
use futures::lock::Mutex;
use log::{debug, info};
use restforge_core::config::Section;
use restforge_core::database::Database;
use restforge_core::driver::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};

/// Subjects that are allowed to do anything.
const SUPERUSERS: &[&str] = &["root", "admin"];

/// Configuration for the `rbac` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RbacOptions {
    /// Whether requests are subject to authorization.
    pub enable: bool,

    /// Roles that exist from the start.  `root` is made a member of all of them.
    pub roles: Vec<String>,
}

impl Default for RbacOptions {
    fn default() -> Self {
        Self { enable: true, roles: vec!["admin".to_owned()] }
    }
}

impl Section for RbacOptions {
    const NAME: &'static str = "rbac";
}

/// Returns true if `path` matches the object `pattern`.
///
/// Patterns match literally except for `:name` segments, which match any one non-empty segment,
/// and a trailing `*`, which matches any suffix.
pub fn key_match(path: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix) || path == prefix.trim_end_matches('/');
    }
    if !pattern.contains(':') {
        return path == pattern;
    }

    let mut path_segments = path.split('/');
    let mut pattern_segments = pattern.split('/');
    loop {
        match (path_segments.next(), pattern_segments.next()) {
            (None, None) => return true,
            (Some(segment), Some(expected)) if expected.starts_with(':') => {
                if segment.is_empty() {
                    return false;
                }
            }
            (Some(segment), Some(expected)) if segment == expected => (),
            _ => return false,
        }
    }
}

/// Returns true if `action` matches the policy action `pattern`.
fn action_match(action: &str, pattern: &str) -> bool {
    pattern == "*" || action.eq_ignore_ascii_case(pattern)
}

/// In-memory view of all rules with persistence of every mutation.
///
/// Reads are served from memory.  Mutations are serialized and only become visible once they
/// have been persisted.
#[derive(Clone)]
pub struct Enforcer {
    /// Storage for rules.
    db: Database<Policy>,

    /// Current rules.
    rules: Arc<RwLock<Vec<Policy>>>,

    /// Serializes mutations.
    writer: Arc<Mutex<()>>,
}

impl Enforcer {
    /// Creates an empty enforcer backed by `db`.
    pub fn new(db: Database<Policy>) -> Self {
        Self { db, rules: Arc::default(), writer: Arc::default() }
    }

    /// Creates the rules table, loads all persisted rules and makes `root` a member of every
    /// role in `roles`.
    pub async fn init(&self, roles: &[String]) -> DriverResult<()> {
        self.db.migrate().await?;
        self.load().await?;
        for role in roles {
            self.add_grouping("root", role).await?;
        }
        info!("Loaded {} access control rules", self.snapshot().len());
        Ok(())
    }

    /// Replaces the in-memory rules with the persisted ones.
    pub async fn load(&self) -> DriverResult<()> {
        let _writer = self.writer.lock().await;
        let mut rules = vec![];
        self.db.with_order("created_at ASC").list(&mut rules, &mut vec![]).await?;
        *self.write_rules()? = rules;
        Ok(())
    }

    /// Gets a write view over the rules.
    fn write_rules(&self) -> DriverResult<std::sync::RwLockWriteGuard<'_, Vec<Policy>>> {
        self.rules.write().map_err(|e| DriverError::BackendError(format!("Poisoned rules: {}", e)))
    }

    /// Returns a copy of all rules.
    pub fn snapshot(&self) -> Vec<Policy> {
        match self.rules.read() {
            Ok(rules) => rules.clone(),
            Err(_) => vec![],
        }
    }

    /// Persists `rule` unless it already exists.  Returns whether the rule was added.
    async fn add(&self, rule: Policy) -> DriverResult<bool> {
        let _writer = self.writer.lock().await;
        if self.snapshot().iter().any(|r| r.same_rule(&rule)) {
            return Ok(false);
        }

        let mut rules = [rule];
        self.db.create(&mut rules).await?;
        let [rule] = rules;
        debug!("Added rule {} {} {} {}", rule.ptype, rule.v0, rule.v1, rule.v2);
        self.write_rules()?.push(rule);
        Ok(true)
    }

    /// Purges all copies of `rule`.  Returns whether the rule existed.
    async fn remove(&self, rule: Policy) -> DriverResult<bool> {
        let _writer = self.writer.lock().await;
        let matching =
            self.snapshot().into_iter().filter(|r| r.same_rule(&rule)).collect::<Vec<_>>();
        if matching.is_empty() {
            return Ok(false);
        }

        self.db.with_purge(true).delete(&matching).await?;
        debug!("Removed rule {} {} {} {}", rule.ptype, rule.v0, rule.v1, rule.v2);
        self.write_rules()?.retain(|r| !r.same_rule(&rule));
        Ok(true)
    }

    /// Lets `subject` perform `action` on `object`.
    pub async fn add_policy(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> DriverResult<bool> {
        self.add(Policy::policy(subject, object, action)).await
    }

    /// Revokes the permission of `subject` to perform `action` on `object`.
    pub async fn remove_policy(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> DriverResult<bool> {
        self.remove(Policy::policy(subject, object, action)).await
    }

    /// Makes `user` a member of `role`.
    pub async fn add_grouping(&self, user: &str, role: &str) -> DriverResult<bool> {
        self.add(Policy::grouping(user, role)).await
    }

    /// Removes `user` from `role`.
    pub async fn remove_grouping(&self, user: &str, role: &str) -> DriverResult<bool> {
        self.remove(Policy::grouping(user, role)).await
    }

    /// Returns `subject` and all roles it transitively belongs to.
    pub fn roles_for(&self, subject: &str) -> HashSet<String> {
        let rules = self.snapshot();
        let mut seen = HashSet::from([subject.to_owned()]);
        let mut pending = VecDeque::from([subject.to_owned()]);
        while let Some(current) = pending.pop_front() {
            for rule in rules.iter().filter(|r| r.ptype == PTYPE_GROUPING && r.v0 == current) {
                if seen.insert(rule.v1.clone()) {
                    pending.push_back(rule.v1.clone());
                }
            }
        }
        seen
    }

    /// Decides whether `subject` may perform `action` on `object`.
    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        if SUPERUSERS.contains(&subject) {
            return true;
        }
        let subjects = self.roles_for(subject);
        self.snapshot().iter().filter(|r| r.ptype == PTYPE_POLICY).any(|r| {
            subjects.contains(&r.v0) && key_match(object, &r.v1) && action_match(action, &r.v2)
        })
    }

    /// Decides whether the user identified by `user_id`/`username` may perform `action` on
    /// `object`.  Superusers are identified by name and everybody else by identifier.
    pub fn enforce_user(&self, user_id: &str, username: &str, object: &str, action: &str) -> bool {
        let subject = if SUPERUSERS.contains(&username) { username } else { user_id };
        self.enforce(subject, object, action)
    }
}
