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

//! Uploads of records from files.

use crate::driver::{Resource, encode_all, to_json};
use crate::model::BatchResponse;
use crate::service::ServiceContext;
use mime::Mime;
use restforge_audit::model::AuditParams;
use restforge_core::driver::{DriverError, DriverResult};
use restforge_core::model::Model;

/// Maximum size of an uploaded file.
pub const MAX_IMPORT_SIZE: usize = 5 * 1024 * 1024;

/// Guesses the content type of `data` from its first bytes.
pub fn sniff(data: &[u8]) -> Mime {
    let data = data.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(data);
    match data.iter().copied().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') | Some(b'{') => mime::APPLICATION_JSON,
        _ if data.starts_with(b"PK\x03\x04") => {
            "application/zip".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
        }
        _ if std::str::from_utf8(data).is_ok() => mime::TEXT_PLAIN,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

impl<M: Model> Resource<M> {
    /// Parses the uploaded `data` with the service and stores the resulting records, replacing
    /// any existing records with the same identifiers.
    pub async fn import(self, ctx: &ServiceContext, data: &[u8]) -> DriverResult<BatchResponse> {
        if data.len() > MAX_IMPORT_SIZE {
            return Err(DriverError::InvalidInput(format!(
                "Import files cannot exceed {} bytes",
                MAX_IMPORT_SIZE
            )));
        }
        let content_type = sniff(data);
        let mut records = self.service.import(ctx, &content_type, data).await?;
        for record in records.iter_mut() {
            record.set_created_by(ctx.username());
            record.set_updated_by(ctx.username());
        }

        let dbctx = ctx.database_context();
        self.db.with_context(&dbctx).update(&mut records).await?;
        ctx.logger().info(format_args!("Imported {} records from {}", records.len(), content_type));

        let response = BatchResponse::new(encode_all(&records)?, 0);
        let params = AuditParams {
            record_id: records.iter().map(|r| r.id()).collect::<Vec<&str>>().join(","),
            response: to_json(&response.summary),
            ..Default::default()
        };
        self.audit(ctx, params).await?;
        Ok(response)
    }
}
