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

//! End-to-end tests of the sample service.

use crate::model::Group;
use crate::testutils::*;
use bytes::Bytes;
use http::{Method, StatusCode, header};
use restforge_authn::driver::testutils::UA_FIREFOX;
use restforge_authn::model::{Tokens, User};
use restforge_authn::rest::RefreshRequest;
use restforge_core::rest::Code;
use restforge_core::rest::envelope::ListData;
use restforge_core::rest::testutils::OneShotBuilder;
use restforge_resource::model::{BatchResponse, DeleteResponse};
use serde_json::{Value, json};
use std::time::Duration;

#[tokio::test]
async fn test_create_round_trip() {
    let context = TestContext::setup().await;

    let data = context
        .root(Method::POST, "/api/users")
        .send_json(json!({"username": "alice", "password": "x"}))
        .await
        .expect_status(StatusCode::CREATED)
        .expect_data::<Value>()
        .await;
    assert_eq!("alice", data["username"]);
    assert_eq!("root", data["created_by"]);
    assert!(!data["id"].as_str().unwrap().is_empty());
    assert!(data.get("password").is_none());

    context.login("alice", "x").await;
}

#[tokio::test]
async fn test_create_requires_password() {
    let context = TestContext::setup().await;

    context
        .root(Method::POST, "/api/users")
        .send_json(json!({"username": "alice"}))
        .await
        .expect_status(StatusCode::BAD_REQUEST)
        .expect_error(Code::FAILURE, "alice needs a password")
        .await;
}

#[tokio::test]
async fn test_update_preserves_creation_fields() {
    let context = TestContext::setup().await;
    let before = context.create_user("alice", "x").await;

    context.advance_secs(5);
    let after = context
        .root(Method::PUT, format!("/api/users/{}", before.base.id))
        .send_json(json!({"username": "alice2"}))
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<User>()
        .await;

    assert_eq!(before.base.id, after.base.id);
    assert_eq!(before.base.created_at, after.base.created_at);
    assert_eq!("root", after.base.created_by);
    assert_eq!("root", after.base.updated_by);
    assert!(after.base.updated_at > before.base.updated_at);
    assert_eq!("alice2", after.username);

    // The credentials follow the rename and keep the old password.
    context.login("alice2", "x").await;
}

#[tokio::test]
async fn test_update_partial_merges() {
    let context = TestContext::setup().await;
    let user = context.create_user("alice", "x").await;

    let data = context
        .root(Method::PATCH, format!("/api/users/{}", user.base.id))
        .send_json(json!({"remark": "hi"}))
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<Value>()
        .await;
    assert_eq!("alice", data["username"]);
    assert_eq!("hi", data["remark"]);
}

#[tokio::test]
async fn test_update_partial_changes_password() {
    let context = TestContext::setup().await;
    let user = context.create_user("alice", "old").await;

    context
        .root(Method::PATCH, format!("/api/users/{}", user.base.id))
        .send_json(json!({"password": "new"}))
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<Value>()
        .await;

    OneShotBuilder::new(context.router(), (Method::POST, "/api/login"))
        .send_json(json!({"username": "alice", "password": "old"}))
        .await
        .expect_status(StatusCode::UNAUTHORIZED)
        .expect_code(Code::INVALID_LOGIN)
        .await;
    context.login("alice", "new").await;
}

#[tokio::test]
async fn test_list_pagination() {
    let context = TestContext::setup().await;
    let users = (0..25)
        .map(|i| User { username: format!("user{:02}", i), ..Default::default() })
        .collect::<Vec<User>>();
    context.insert_users(users).await;

    let page = context
        .root(Method::GET, "/api/users")
        .with_query([("page", "2"), ("size", "10")])
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<ListData<User>>()
        .await;
    assert_eq!(10, page.items.len());
    assert_eq!(Some(25), page.total);
}

#[tokio::test]
async fn test_cache_hit_header() {
    let context = TestContext::setup().await;
    context.create_user("alice", "x").await;

    let first = context
        .root(Method::GET, "/api/users")
        .with_query([("_nocache", "false")])
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_no_header("x-cached")
        .expect_data::<ListData<User>>()
        .await;

    let second = context
        .root(Method::GET, "/api/users")
        .with_query([("_nocache", "false")])
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_header("x-cached", "true")
        .expect_data::<ListData<User>>()
        .await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_token_rotation() {
    let context = TestContext::setup().await;
    context.create_user("alice", "x").await;
    let tokens1 = context.login("alice", "x").await;

    let tokens2 = OneShotBuilder::new(context.router(), (Method::POST, "/api/refresh"))
        .with_header(header::USER_AGENT, restforge_authn::driver::testutils::UA_CHROME)
        .send_json(RefreshRequest {
            access_token: tokens1.access_token.clone(),
            refresh_token: tokens1.refresh_token.clone(),
        })
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<Tokens>()
        .await;
    assert_ne!(tokens1, tokens2);

    context
        .as_user(&tokens1, Method::GET, "/api/me")
        .send_empty()
        .await
        .expect_status(StatusCode::UNAUTHORIZED)
        .expect_code(Code::INVALID_TOKEN)
        .await;

    let me = context
        .as_user(&tokens2, Method::GET, "/api/me")
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<User>()
        .await;
    assert_eq!("alice", me.username);
}

#[tokio::test]
async fn test_user_agent_mismatch() {
    let context = TestContext::setup().await;
    context.create_user("alice", "x").await;
    let tokens = context.login("alice", "x").await;

    OneShotBuilder::new(context.router(), (Method::GET, "/api/me"))
        .with_bearer_auth(&tokens.access_token)
        .with_header(header::USER_AGENT, UA_FIREFOX)
        .send_empty()
        .await
        .expect_status(StatusCode::UNAUTHORIZED)
        .expect_code(Code::INVALID_TOKEN)
        .await;
}

#[tokio::test]
async fn test_rbac_deny_then_allow() {
    let context = TestContext::setup().await;
    let bob = context.create_user("bob", "x").await;
    let tokens = context.login("bob", "x").await;

    context
        .as_user(&tokens, Method::GET, "/api/users")
        .send_empty()
        .await
        .expect_status(StatusCode::FORBIDDEN)
        .expect_code(Code::FORBIDDEN)
        .await;

    assert!(context.app().enforcer().add_policy(&bob.base.id, "/users", "GET").await.unwrap());

    context
        .as_user(&tokens, Method::GET, "/api/users")
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<ListData<User>>()
        .await;

    // The rule covers the collection only.
    context
        .as_user(&tokens, Method::GET, format!("/api/users/{}", bob.base.id))
        .send_empty()
        .await
        .expect_status(StatusCode::FORBIDDEN)
        .expect_code(Code::FORBIDDEN)
        .await;
}

#[tokio::test]
async fn test_rbac_roles() {
    let context = TestContext::setup().await;
    let bob = context.create_user("bob", "x").await;
    let tokens = context.login("bob", "x").await;

    let enforcer = context.app().enforcer();
    assert!(enforcer.add_policy("readers", "/users/:id", "get").await.unwrap());
    assert!(enforcer.add_grouping(&bob.base.id, "readers").await.unwrap());

    let me = context
        .as_user(&tokens, Method::GET, format!("/api/users/{}", bob.base.id))
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<User>()
        .await;
    assert_eq!("bob", me.username);
}

#[tokio::test]
async fn test_audit_async() {
    let context = TestContext::setup_with(json!({
        "audit": {
            "async_write": true,
            "batch_size": 2,
            "flush_interval": "10s",
            "tables": ["users"],
            "exclude_fields": ["passwords"],
        },
    }))
    .await;

    context.create_user("alice", "x").await;
    context.create_user("bob", "y").await;

    let mut logs = vec![];
    for _ in 0..100 {
        logs = context.audit_logs().await;
        if logs.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(2, logs.len());

    context.create_user("carol", "z").await;
    context
        .root(Method::POST, "/api/groups")
        .send_json(json!({"name": "not audited"}))
        .await
        .expect_status(StatusCode::CREATED)
        .expect_data::<Group>()
        .await;
    context.app().audit().flush().await;

    let logs = context.audit_logs().await;
    assert_eq!(3, logs.len());
    for log in logs {
        assert_eq!("create", log.op);
        assert_eq!("users", log.table);
        assert!(!log.record.contains("password"), "Password leaked: {}", log.record);
        assert!(!log.request.contains("password"), "Password leaked: {}", log.request);
    }
}

#[tokio::test]
async fn test_import_overwrites_existing() {
    let context = TestContext::setup().await;
    let mut ids = vec![];
    for name in ["first", "second"] {
        let group = context
            .root(Method::POST, "/api/groups")
            .send_json(json!({"name": name}))
            .await
            .expect_status(StatusCode::CREATED)
            .expect_data::<Group>()
            .await;
        ids.push(group.base.id);
    }

    let file = json!([
        {"id": ids[0], "name": "first renamed", "owner_id": "root"},
        {"id": ids[1], "name": "second renamed", "owner_id": "root"},
        {"name": "third", "owner_id": "root"},
    ]);
    let response = context
        .root(Method::POST, "/api/groups/import")
        .send_file("file", "groups.json", Bytes::from(file.to_string()))
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<BatchResponse>()
        .await;
    assert_eq!(3, response.summary.total);
    assert_eq!(3, response.summary.succeeded);
    assert_eq!(0, response.summary.failed);

    let list = context
        .root(Method::GET, "/api/groups")
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<ListData<Group>>()
        .await;
    let mut names = list.items.into_iter().map(|g| g.name).collect::<Vec<String>>();
    names.sort();
    assert_eq!(vec!["first renamed", "second renamed", "third"], names);
    assert_eq!(Some(3), list.total);
}

#[tokio::test]
async fn test_delete_user_revokes_login() {
    let context = TestContext::setup().await;
    let carol = context.create_user("carol", "x").await;
    let tokens = context.login("carol", "x").await;

    let response = context
        .root(Method::DELETE, format!("/api/users/{}", carol.base.id))
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<DeleteResponse>()
        .await;
    assert_eq!(DeleteResponse { deleted: 1 }, response);

    OneShotBuilder::new(context.router(), (Method::POST, "/api/login"))
        .send_json(json!({"username": "carol", "password": "x"}))
        .await
        .expect_status(StatusCode::UNAUTHORIZED)
        .expect_code(Code::INVALID_LOGIN)
        .await;

    context
        .as_user(&tokens, Method::GET, "/api/me")
        .send_empty()
        .await
        .expect_status(StatusCode::UNAUTHORIZED)
        .expect_code(Code::INVALID_TOKEN)
        .await;
}

#[tokio::test]
async fn test_group_owner_expands() {
    let context = TestContext::setup().await;
    let dave = context.create_user("dave", "x").await;

    let owned = context
        .root(Method::POST, "/api/groups")
        .send_json(json!({"name": "ops", "owner_id": dave.base.id, "members": [dave.base.id]}))
        .await
        .expect_status(StatusCode::CREATED)
        .expect_data::<Group>()
        .await;
    let defaulted = context
        .root(Method::POST, "/api/groups")
        .send_json(json!({"name": "dev"}))
        .await
        .expect_status(StatusCode::CREATED)
        .expect_data::<Group>()
        .await;
    assert_eq!("root", defaulted.owner_id);

    let group = context
        .root(Method::GET, format!("/api/groups/{}", owned.base.id))
        .with_query([("_expand", "owner")])
        .send_empty()
        .await
        .expect_status(StatusCode::OK)
        .expect_data::<Group>()
        .await;
    assert_eq!("dave", group.owner.unwrap().username);
    assert_eq!(vec![dave.base.id], group.members);
}

#[tokio::test]
async fn test_group_update_needs_owner() {
    let context = TestContext::setup().await;
    let group = context
        .root(Method::POST, "/api/groups")
        .send_json(json!({"name": "ops"}))
        .await
        .expect_status(StatusCode::CREATED)
        .expect_data::<Group>()
        .await;

    context
        .root(Method::PUT, format!("/api/groups/{}", group.base.id))
        .send_json(json!({"name": "ops", "owner_id": ""}))
        .await
        .expect_status(StatusCode::UNPROCESSABLE_ENTITY)
        .expect_error(Code::FAILURE, "ops needs an owner")
        .await;
}
