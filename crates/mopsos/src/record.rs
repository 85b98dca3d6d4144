// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inventory record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Application state reported by a cluster, as carried in event data.
///
/// Missing and `null` JSON fields decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    /// Reporting cluster; must match the authenticated username.
    #[serde(deserialize_with = "null_as_empty")]
    pub cluster_name: String,
    /// Instance of the cluster (e.g. a node or a namespace).
    #[serde(deserialize_with = "null_as_empty")]
    pub instance_id: String,
    /// Application name.
    #[serde(deserialize_with = "null_as_empty")]
    pub application_name: String,
    /// Instance of the application within the cluster.
    #[serde(deserialize_with = "null_as_empty")]
    pub application_instance: String,
    /// Currently deployed version. Not part of the identity.
    #[serde(deserialize_with = "null_as_empty")]
    pub application_version: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Record {
    /// The tuple that identifies this record in storage.
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            cluster_name: self.cluster_name.clone(),
            instance_id: self.instance_id.clone(),
            application_name: self.application_name.clone(),
            application_instance: self.application_instance.clone(),
        }
    }
}

/// Unique key of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    /// Reporting cluster.
    pub cluster_name: String,
    /// Instance of the cluster.
    pub instance_id: String,
    /// Application name.
    pub application_name: String,
    /// Instance of the application.
    pub application_instance: String,
}

/// A row of the `records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredRecord {
    /// Surrogate primary key.
    pub id: i64,
    /// When the identity was first seen.
    pub created_at: DateTime<Utc>,
    /// When the row was last upserted.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker, cleared by every upsert.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Reporting cluster.
    pub cluster_name: String,
    /// Instance of the cluster.
    pub instance_id: String,
    /// Application name.
    pub application_name: String,
    /// Instance of the application.
    pub application_instance: String,
    /// Last reported version.
    pub application_version: String,
}

impl StoredRecord {
    /// The payload columns as a [`Record`].
    pub fn record(&self) -> Record {
        Record {
            cluster_name: self.cluster_name.clone(),
            instance_id: self.instance_id.clone(),
            application_name: self.application_name.clone(),
            application_instance: self.application_instance.clone(),
            application_version: self.application_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_missing_fields_default_to_empty() {
        let record: Record = serde_json::from_str(r#"{"cluster_name":"username"}"#).unwrap();

        assert_eq!(record.cluster_name, "username");
        assert_eq!(record.instance_id, "");
        assert_eq!(record.application_version, "");
    }

    #[test]
    fn test_record_null_fields_decode_as_empty() {
        let record: Record = serde_json::from_str(
            r#"{"cluster_name":"username","instance_id":null,"application_version":null}"#,
        )
        .unwrap();

        assert_eq!(record.cluster_name, "username");
        assert_eq!(record.instance_id, "");
        assert_eq!(record.application_version, "");
    }

    #[test]
    fn test_record_rejects_non_string_fields() {
        let result = serde_json::from_str::<Record>(r#"{"cluster_name":42}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let record = Record {
            cluster_name: "acme".to_string(),
            instance_id: "prod".to_string(),
            application_name: "nginx".to_string(),
            application_instance: "web".to_string(),
            application_version: "1.25".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "cluster_name": "acme",
                "instance_id": "prod",
                "application_name": "nginx",
                "application_instance": "web",
                "application_version": "1.25",
            })
        );
    }

    #[test]
    fn test_identity_ignores_version() {
        let a = Record {
            cluster_name: "acme".to_string(),
            application_name: "nginx".to_string(),
            application_version: "1.0".to_string(),
            ..Default::default()
        };
        let b = Record {
            application_version: "1.1".to_string(),
            ..a.clone()
        };

        assert_ne!(a, b);
        assert_eq!(a.identity(), b.identity());
    }
}
