//! # ManagedStaticSecret Reconciliation
//!
//! Resolves every `data` reference, renders templates and writes the
//! destination Secret.
//!
//! ## Reconciliation Flow
//!
//! 1. Skip excluded namespaces
//! 2. Add the finalizer, or clean up and release it on deletion
//! 3. Requeue while the destination Secret is younger than its TTL
//! 4. Resolve references (`ref+k8s://` from the cluster, everything else from the resolver)
//! 5. Render templates against the resolved values
//! 6. Write the Secret unless it already matches
//! 7. Rotate database passwords after a write

use base64::Engine as _;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::constants::{
    LAST_APPLIED_ANNOTATION, LAST_UPDATED_ANNOTATION, MANAGED_BY, MANAGED_BY_LABEL,
    STATIC_SECRET_FINALIZER,
};
use crate::controller::events::reasons;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::utils::{
    byte_maps_match, delete_secret_if_present, format_timestamp, has_finalizer, object_key,
    parse_timestamp, secret_value, string_maps_match, to_secret_data, upsert_secret,
    with_finalizer, without_finalizer,
};
use crate::controller::resolver::{is_k8s_ref, K8sSecretRef};
use crate::controller::store::ManagedKind;
use crate::controller::template::{self, TemplateData};
use crate::crd::{Database, ManagedStaticSecret};
use crate::database::PasswordChange;
use crate::observability::metrics;

const KIND: ManagedKind = ManagedKind::StaticSecret;

/// Annotations that never make a Secret out of date
const IGNORED_ANNOTATIONS: &[&str] = &[LAST_APPLIED_ANNOTATION, LAST_UPDATED_ANNOTATION];
/// Labels that never make a Secret out of date
const IGNORED_LABELS: &[&str] = &[MANAGED_BY_LABEL];

/// Reconcile a ManagedStaticSecret
///
/// Errors are handed to the error policy, which requeues with the per-object backoff.
pub async fn reconcile(
    obj: Arc<ManagedStaticSecret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let span = info_span!(
        "reconcile",
        resource.kind = KIND.as_str(),
        resource.name = %obj.name_any(),
        resource.namespace = %obj.namespace().unwrap_or_default(),
    );
    reconcile_internal(obj, ctx).instrument(span).await
}

async fn reconcile_internal(
    obj: Arc<ManagedStaticSecret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    metrics::increment_reconciliations(KIND.as_str());
    let name = obj.name_any();
    let namespace = obj
        .namespace()
        .ok_or_else(|| ReconcilerError::Configuration(format!("{KIND} {name} has no namespace")))?;

    if ctx.config.is_excluded(&namespace) {
        debug!("Namespace {} is excluded, skipping", namespace);
        return Ok(Action::await_change());
    }

    let key = object_key(&namespace, &name);
    let secret_name = obj.secret_name();

    if obj.meta().deletion_timestamp.is_some() {
        return finalize(&obj, &ctx, &namespace, &name, &secret_name).await;
    }

    if !has_finalizer(obj.meta(), STATIC_SECRET_FINALIZER) {
        debug!("Adding finalizer to {}", key);
        ctx.store
            .set_finalizers(
                KIND,
                &namespace,
                &name,
                with_finalizer(obj.meta(), STATIC_SECRET_FINALIZER),
            )
            .await?;
    }

    let current = ctx.store.get_secret(&namespace, &secret_name).await?;
    let ttl = effective_ttl(obj.spec.ttl, ctx.config.default_ttl_secs);
    if let Some(current) = &current {
        if !has_secret_expired(current, ttl, ctx.now()) {
            debug!("Secret {} is still fresh (ttl {}s)", secret_name, ttl);
            return Ok(Action::requeue(ctx.config.reconcile_period()));
        }
    }

    info!("🔄 Reconciling {}: {}", KIND, key);
    let object_ref = obj.object_ref(&());

    let started = Instant::now();
    let data = match resolve_data(&obj, &ctx).await {
        Ok(data) => data,
        Err(failure) => {
            error!("Failed to resolve secret {}: {}", key, failure.error);
            ctx.record(
                obj.meta().annotations.as_ref(),
                &object_ref,
                EventType::Warning,
                reasons::FAILED,
                failure.note,
            )
            .await;
            record_failure(&name, &namespace, ctx.now());
            return Err(failure.error);
        }
    };
    metrics::set_secret_retrieve_time(&name, &namespace, elapsed_ms(started));

    let data = render_templates(&obj.spec.template, data);

    let needs_update = current
        .as_ref()
        .map_or(true, |current| secret_needs_update(current, obj.meta(), &data));

    if needs_update {
        let started = Instant::now();
        let desired = build_secret(&obj, &namespace, &secret_name, data.clone(), ctx.now())?;
        if let Err(e) = upsert_secret(ctx.store.as_ref(), &desired).await {
            error!("Failed to create secret {}: {}", secret_name, e);
            ctx.record(
                obj.meta().annotations.as_ref(),
                &object_ref,
                EventType::Warning,
                reasons::FAILED,
                format!("Secret {secret_name} not saved {e}"),
            )
            .await;
            record_failure(&name, &namespace, ctx.now());
            return Err(e.into());
        }
        metrics::set_secret_creation_time(&name, &namespace, elapsed_ms(started));
        ctx.record(
            obj.meta().annotations.as_ref(),
            &object_ref,
            EventType::Normal,
            reasons::UPDATED,
            "Secret created or updated",
        )
        .await;
        info!("✅ Updated secret {}/{}", namespace, secret_name);

        rotate_databases(&obj, &ctx, &object_ref, &namespace, &data).await;
    } else {
        debug!("Secret {} already up to date", secret_name);
    }

    metrics::set_secret_info(&name, &namespace, ctx.now().timestamp());
    metrics::set_secret_error(&name, &namespace, 0);
    ctx.backoff.clear(&key);
    Ok(Action::requeue(ctx.config.reconcile_period()))
}

/// Delete the destination Secret and release the finalizer
async fn finalize(
    obj: &ManagedStaticSecret,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    secret_name: &str,
) -> Result<Action, ReconcilerError> {
    if has_finalizer(obj.meta(), STATIC_SECRET_FINALIZER) {
        info!("🗑️  Deleting secret {}/{}", namespace, secret_name);
        delete_secret_if_present(ctx.store.as_ref(), namespace, secret_name)
            .await
            .inspect_err(|e| error!("Error deleting secret {}: {}", secret_name, e))?;

        ctx.store
            .set_finalizers(
                KIND,
                namespace,
                name,
                without_finalizer(obj.meta(), STATIC_SECRET_FINALIZER),
            )
            .await?;
    }

    ctx.backoff.clear(&object_key(namespace, name));
    metrics::forget_object(name, namespace);
    Ok(Action::await_change())
}

/// A resolution failure and the event note describing it
struct ResolveFailure {
    error: ReconcilerError,
    note: String,
}

/// Resolve every `data` entry to its raw bytes
async fn resolve_data(
    obj: &ManagedStaticSecret,
    ctx: &Reconciler,
) -> Result<BTreeMap<String, Vec<u8>>, ResolveFailure> {
    let mut data = BTreeMap::new();

    for (output_key, source) in &obj.spec.data {
        if is_k8s_ref(&source.reference) {
            let value = read_k8s_ref(ctx, &source.reference).await.map_err(|error| {
                ResolveFailure {
                    note: format!("Failed to get key from existing k8s secret {error}"),
                    error,
                }
            })?;
            data.insert(output_key.clone(), value);
            continue;
        }

        let value = ctx
            .resolver
            .resolve(&source.reference)
            .await
            .map_err(|e| ResolveFailure {
                note: format!("Failed to get secrets from secrets store {e}"),
                error: e.into(),
            })?;

        let value = if source.is_base64() {
            base64::engine::general_purpose::STANDARD
                .decode(value.as_bytes())
                .map_err(|e| {
                    warn!(
                        "Cannot b64 decode {}. Please check encoding configuration",
                        output_key
                    );
                    ResolveFailure {
                        note: "Base64 decoding failed".to_string(),
                        error: ReconcilerError::Resolution(format!(
                            "{output_key}: base64 decoding failed: {e}"
                        )),
                    }
                })?
        } else {
            value.into_bytes()
        };
        data.insert(output_key.clone(), value);
    }

    Ok(data)
}

/// Read `ref+k8s://namespace/secret#key` from the cluster
async fn read_k8s_ref(ctx: &Reconciler, reference: &str) -> Result<Vec<u8>, ReconcilerError> {
    let pointer = K8sSecretRef::parse(reference).ok_or_else(|| {
        ReconcilerError::Resolution(format!("malformed k8s secret reference {reference:?}"))
    })?;

    let secret = ctx
        .store
        .get_secret(&pointer.namespace, &pointer.secret_name)
        .await?
        .ok_or_else(|| {
            ReconcilerError::Resolution(format!(
                "secret {}/{} not found",
                pointer.namespace, pointer.secret_name
            ))
        })?;

    secret_value(&secret, &pointer.key).ok_or_else(|| {
        ReconcilerError::Resolution(format!(
            "key {} not found in secret {}/{}",
            pointer.key, pointer.namespace, pointer.secret_name
        ))
    })
}

/// Render every template against the string form of the resolved values
///
/// A template that fails is logged and left out.
fn render_templates(
    templates: &BTreeMap<String, String>,
    mut data: BTreeMap<String, Vec<u8>>,
) -> BTreeMap<String, Vec<u8>> {
    if templates.is_empty() {
        return data;
    }

    let values: TemplateData = data
        .iter()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
        .collect();

    for (output_key, body) in templates {
        match template::render(body, &values) {
            Ok(rendered) => {
                data.insert(output_key.clone(), rendered.into_bytes());
            }
            Err(e) => warn!("Template {} could not be rendered: {}", output_key, e),
        }
    }
    data
}

/// TTL in seconds; non-positive values fall back to the controller default
#[must_use]
pub fn effective_ttl(spec_ttl: i64, default_ttl: i64) -> i64 {
    if spec_ttl > 0 {
        spec_ttl
    } else {
        default_ttl
    }
}

/// Whether the Secret is due for another resolution
///
/// A missing or unparsable `last-updated` stamp counts as expired.
#[must_use]
pub fn has_secret_expired(secret: &Secret, ttl_secs: i64, now: DateTime<Utc>) -> bool {
    let Some(last_updated) = secret
        .annotations()
        .get(LAST_UPDATED_ANNOTATION)
        .and_then(|v| parse_timestamp(v))
    else {
        return true;
    };
    (now - last_updated).num_seconds() > ttl_secs
}

/// Whether the stored Secret differs from what the object would write
#[must_use]
pub fn secret_needs_update(
    current: &Secret,
    owner: &ObjectMeta,
    data: &BTreeMap<String, Vec<u8>>,
) -> bool {
    !byte_maps_match(current.data.as_ref(), data)
        || !string_maps_match(
            current.metadata.annotations.as_ref(),
            owner.annotations.as_ref(),
            IGNORED_ANNOTATIONS,
        )
        || !string_maps_match(
            current.metadata.labels.as_ref(),
            owner.labels.as_ref(),
            IGNORED_LABELS,
        )
}

/// The destination Secret as this object would write it
fn build_secret(
    obj: &ManagedStaticSecret,
    namespace: &str,
    secret_name: &str,
    data: BTreeMap<String, Vec<u8>>,
    now: DateTime<Utc>,
) -> Result<Secret, ReconcilerError> {
    let owner = obj.controller_owner_ref(&()).ok_or_else(|| {
        ReconcilerError::Configuration(format!("{KIND} {} has no uid yet", obj.name_any()))
    })?;

    let mut labels = obj.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    let mut annotations = obj.annotations().clone();
    annotations.remove(LAST_APPLIED_ANNOTATION);
    annotations.insert(LAST_UPDATED_ANNOTATION.to_string(), format_timestamp(now));

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some(obj.secret_type()),
        data: Some(to_secret_data(data)),
        ..Default::default()
    })
}

/// Push freshly written passwords to every configured database
///
/// Failures are logged and recorded as events; they never fail the pass.
async fn rotate_databases(
    obj: &ManagedStaticSecret,
    ctx: &Reconciler,
    object_ref: &ObjectReference,
    namespace: &str,
    data: &BTreeMap<String, Vec<u8>>,
) {
    for database in &obj.spec.databases {
        let change = match password_change(ctx, database, namespace, data).await {
            Ok(change) => change,
            Err(e) => {
                error!("Cannot prepare {} password update: {}", database.driver, e);
                continue;
            }
        };

        match ctx.databases.rotate(&database.driver, change).await {
            Ok(()) => {
                ctx.record(
                    obj.meta().annotations.as_ref(),
                    object_ref,
                    EventType::Normal,
                    reasons::DATABASE,
                    format!("{} password updated", database.driver),
                )
                .await;
            }
            Err(e) => {
                error!("Failed to update {} password: {}", database.driver, e);
                ctx.record(
                    obj.meta().annotations.as_ref(),
                    object_ref,
                    EventType::Warning,
                    reasons::DATABASE,
                    format!("{} password not updated {e}", database.driver),
                )
                .await;
            }
        }
    }
}

/// Assemble the password change for one database entry
async fn password_change(
    ctx: &Reconciler,
    database: &Database,
    namespace: &str,
    data: &BTreeMap<String, Vec<u8>>,
) -> Result<PasswordChange, ReconcilerError> {
    let login = &database.login_credentials;
    let login_namespace = login
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(namespace);

    let login_secret = ctx
        .store
        .get_secret(login_namespace, &login.secret_name)
        .await?
        .ok_or_else(|| {
            ReconcilerError::Configuration(format!(
                "login secret {login_namespace}/{} not found",
                login.secret_name
            ))
        })?;

    let login_password = secret_value(&login_secret, &login.password_key)
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .ok_or_else(|| {
            ReconcilerError::Configuration(format!(
                "key {} not found in login secret {}",
                login.password_key, login.secret_name
            ))
        })?;
    let login_username = login
        .username_key
        .as_deref()
        .and_then(|k| secret_value(&login_secret, k))
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .unwrap_or_default();

    let lookup = |key: &str| {
        data.get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .ok_or_else(|| ReconcilerError::Configuration(format!("key {key} not found in secret data")))
    };
    let username = lookup(database.username_key.as_deref().unwrap_or("username"))?;
    let password = lookup(&database.password_key)?;

    Ok(PasswordChange {
        username,
        password,
        user_host: database.user_host.clone().unwrap_or_default(),
        login_username,
        login_password,
        hosts: database.hosts.clone(),
        port: database.port.unwrap_or(0),
    })
}

fn record_failure(name: &str, namespace: &str, now: DateTime<Utc>) {
    metrics::increment_secret_failures();
    metrics::set_secret_error(name, namespace, now.timestamp());
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
