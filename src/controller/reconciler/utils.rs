//! # Utilities
//!
//! Helpers shared by both reconcilers: finalizer lists, bookkeeping
//! timestamps, map comparison and Secret writes.

use chrono::{DateTime, NaiveDateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::debug;

use crate::constants::TIME_LAYOUT;
use crate::controller::store::{ObjectStore, StoreError};

/// Backoff and metrics key of an object
#[must_use]
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|item| item == finalizer))
}

/// Current finalizers plus `finalizer`
#[must_use]
pub fn with_finalizer(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    finalizers
}

/// Current finalizers minus `finalizer`
#[must_use]
pub fn without_finalizer(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    meta.finalizers
        .iter()
        .flatten()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect()
}

/// Format a bookkeeping timestamp (`%Y-%m-%dT%H.%M.%SZ`)
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIME_LAYOUT).to_string()
}

#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIME_LAYOUT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whether two string maps hold the same entries, ignoring `ignore_keys`
///
/// Missing and empty maps are equivalent.
#[must_use]
pub fn string_maps_match(
    left: Option<&BTreeMap<String, String>>,
    right: Option<&BTreeMap<String, String>>,
    ignore_keys: &[&str],
) -> bool {
    let relevant = |map: Option<&BTreeMap<String, String>>| -> BTreeMap<String, String> {
        map.into_iter()
            .flatten()
            .filter(|(k, _)| !ignore_keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    relevant(left) == relevant(right)
}

/// Whether the stored Secret data equals `desired` byte for byte
#[must_use]
pub fn byte_maps_match(
    current: Option<&BTreeMap<String, ByteString>>,
    desired: &BTreeMap<String, Vec<u8>>,
) -> bool {
    let empty = BTreeMap::new();
    let current = current.unwrap_or(&empty);
    current.len() == desired.len()
        && current
            .iter()
            .all(|(k, v)| desired.get(k).is_some_and(|d| *d == v.0))
}

/// Wrap raw values for a Secret's `data` field
#[must_use]
pub fn to_secret_data(data: BTreeMap<String, Vec<u8>>) -> BTreeMap<String, ByteString> {
    data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()
}

/// Value of `key` in a Secret, from `data` or `stringData`
#[must_use]
pub fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| v.as_bytes().to_vec())
        })
}

/// Create the Secret, replacing it when the name is already taken
pub async fn upsert_secret(store: &dyn ObjectStore, secret: &Secret) -> Result<Secret, StoreError> {
    match store.create_secret(secret).await {
        Err(e) if e.is_already_exists() => {
            debug!(secret = ?secret.metadata.name, "Secret exists, replacing");
            store.replace_secret(secret).await
        }
        other => other,
    }
}

/// Delete a Secret, treating an already missing one as deleted
pub async fn delete_secret_if_present(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<(), StoreError> {
    match store.delete_secret(namespace, name).await {
        Err(e) if e.is_not_found() => {
            debug!(namespace, name, "Secret already gone");
            Ok(())
        }
        other => other,
    }
}
