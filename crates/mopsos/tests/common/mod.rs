// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for mopsos E2E tests.
//!
//! Provides TestContext for starting a runtime on a free port with a real store
//! and talking to it over HTTP.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mopsos::IngestRuntime;
use mopsos::auth::IdentityStore;
use mopsos::persistence::{PostgresStore, RecordStore, SqliteStore};
use mopsos::record::{IdentityKey, StoredRecord};

/// Username and secret every test context accepts.
pub const USER: &str = "acme";
pub const SECRET: &str = "s3cret";

/// Test context that manages the runtime, its store and an HTTP client.
pub struct TestContext {
    pub runtime: IngestRuntime,
    pub store: Arc<dyn RecordStore>,
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestContext {
    /// Runtime over a fresh in-memory SQLite store.
    pub async fn sqlite(queue_capacity: usize) -> Self {
        let store = SqliteStore::in_memory()
            .await
            .expect("Failed to open in-memory SQLite store");
        Self::start(Arc::new(store), queue_capacity).await
    }

    /// Runtime over the database in TEST_DATABASE_URL, or `None` when unset.
    pub async fn postgres(queue_capacity: usize) -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let store = PostgresStore::connect(&database_url).await.ok()?;
        store.migrate().await.ok()?;
        Some(Self::start(Arc::new(store), queue_capacity).await)
    }

    async fn start(store: Arc<dyn RecordStore>, queue_capacity: usize) -> Self {
        let identities = IdentityStore::new(HashMap::from([
            (USER.to_string(), SECRET.to_string()),
            ("globex".to_string(), "hunter2".to_string()),
        ]));

        let runtime = IngestRuntime::builder()
            .store(store.clone())
            .identities(identities)
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .queue_capacity(queue_capacity)
            .drain_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");

        let base_url = format!("http://{}", runtime.local_addr());

        Self {
            runtime,
            store,
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// POST a structured-mode event to `/webhook`.
    pub async fn post_event(
        &self,
        credentials: Option<(&str, &str)>,
        body: impl Into<String>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}/webhook", self.base_url))
            .header("content-type", "application/cloudevents+json")
            .body(body.into());
        if let Some((user, secret)) = credentials {
            request = request.basic_auth(user, Some(secret));
        }
        request.send().await.expect("Failed to send webhook request")
    }

    /// GET a path on the service.
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Failed to send GET request")
    }

    /// Poll the store until the identity carries `version`.
    pub async fn wait_for_version(&self, identity: &IdentityKey, version: &str) -> StoredRecord {
        for _ in 0..100 {
            if let Some(row) = self.store.get_record(identity).await.unwrap() {
                if row.application_version == version {
                    return row;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("record {identity:?} never reached version {version}");
    }
}

/// A structured-mode CloudEvent carrying a record.
pub fn record_event(
    id: &str,
    cluster_name: &str,
    application_name: &str,
    application_instance: &str,
    version: &str,
) -> String {
    serde_json::json!({
        "specversion": "1.0",
        "id": id,
        "source": format!("/clusters/{cluster_name}"),
        "type": "application.deployed",
        "datacontenttype": "application/json",
        "data": {
            "cluster_name": cluster_name,
            "instance_id": "node-1",
            "application_name": application_name,
            "application_instance": application_instance,
            "application_version": version,
        }
    })
    .to_string()
}

/// Identity matching [`record_event`].
pub fn identity(
    cluster_name: &str,
    application_name: &str,
    application_instance: &str,
) -> IdentityKey {
    IdentityKey {
        cluster_name: cluster_name.to_string(),
        instance_id: "node-1".to_string(),
        application_name: application_name.to_string(),
        application_instance: application_instance.to_string(),
    }
}

/// A name unique to this test run, so tests can share a database.
pub fn unique(prefix: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}-{nanos}")
}

/// Skip a test when TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
