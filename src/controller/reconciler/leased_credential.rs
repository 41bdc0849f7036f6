//! # ManagedLeasedCredential Reconciliation
//!
//! Keeps a destination Secret filled with a live database credential leased
//! from the secrets backend.
//!
//! ## Reconciliation Flow
//!
//! 1. Skip excluded namespaces
//! 2. On deletion revoke the lease, delete the Secret and release the finalizer
//! 3. Compare the destination Secret with the object and decide:
//!    - **NoOp**: lease still fresh and templates unchanged
//!    - **Update**: templates changed, rewrite the Secret from the current credential
//!    - **Renew**: lease about to expire and renewal requested
//!    - **Reissue**: everything else; the old lease is revoked before a new one is read
//! 4. Restart rollout targets after the credential or its rendering changed

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backend::{DatabaseCredentials, LeaseOperations};
use crate::constants::{
    BASE_CREDENTIAL_KEY_PREFIX, EXPIRES_ON_ANNOTATION, FORCE_ANNOTATION, HASH_ANNOTATION, LAST_APPLIED_ANNOTATION,
    LAST_UPDATED_ANNOTATION, LEASED_CREDENTIAL_FINALIZER, LEASE_DURATION_ANNOTATION,
    LEASE_EXPIRY_GRACE_SECS, LEASE_ID_ANNOTATION, MANAGED_BY, MANAGED_BY_LABEL,
    RESTARTED_AT_ANNOTATION,
};
use crate::controller::events::reasons;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::utils::{
    delete_secret_if_present, format_timestamp, has_finalizer, object_key, secret_value,
    to_secret_data, upsert_secret, with_finalizer, without_finalizer,
};
use crate::controller::store::{ManagedKind, WorkloadKind};
use crate::controller::template::{self, TemplateData};
use crate::crd::ManagedLeasedCredential;
use crate::observability::metrics;

const KIND: ManagedKind = ManagedKind::LeasedCredential;

/// Base credential fields, in output order
const CREDENTIAL_FIELDS: [&str; 4] = ["username", "password", "connection_url", "hosts"];

/// What a pass does with the destination Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoOp,
    /// Rewrite the Secret from the credential it already holds
    Update,
    Renew,
    Reissue(ReissueReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReissueReason {
    /// No destination Secret yet
    Missing,
    /// The stored lease is unknown to the backend
    InvalidLease,
    /// A previous renewal failed
    Forced,
    /// The lease is expiring and cannot or should not be renewed
    Expired,
}

/// Facts about the destination Secret that drive the [`Decision`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseFacts {
    /// Trailing lease id segment from the Secret
    pub lease_id: Option<String>,
    pub forced: bool,
    pub expired: bool,
    pub hash_changed: bool,
    pub renew: bool,
}

impl LeaseFacts {
    /// Gather facts from the stored Secret
    #[must_use]
    pub fn gather(obj: &ManagedLeasedCredential, current: &Secret, now: DateTime<Utc>) -> Self {
        let annotations = current.annotations();
        let stored_hash = annotations.get(HASH_ANNOTATION).map_or("", String::as_str);
        let new_hash = template::fake_hash(&obj.spec.template);

        Self {
            lease_id: annotations
                .get(LEASE_ID_ANNOTATION)
                .filter(|id| !id.is_empty())
                .cloned(),
            forced: annotations.get(FORCE_ANNOTATION).is_some_and(|f| f == "true"),
            expired: lease_expired(current, now),
            // the fake hash only approximates a template change
            hash_changed: !new_hash.is_empty() && !stored_hash.is_empty() && new_hash != stored_hash,
            renew: obj.spec.renew,
        }
    }

    /// Decide without asking the backend
    ///
    /// `None` means the lease has to be looked up first, see [`LeaseFacts::decide_with_lookup`].
    #[must_use]
    pub fn decide(&self) -> Option<Decision> {
        if self.lease_id.is_none() {
            return Some(Decision::Reissue(ReissueReason::InvalidLease));
        }
        if self.forced {
            return Some(Decision::Reissue(ReissueReason::Forced));
        }
        if !self.expired {
            return Some(if self.hash_changed {
                Decision::Update
            } else {
                Decision::NoOp
            });
        }
        None
    }

    /// Decision for an expiring lease once its validity is known
    #[must_use]
    pub fn decide_with_lookup(&self, lease_valid: bool) -> Decision {
        if !lease_valid {
            Decision::Reissue(ReissueReason::InvalidLease)
        } else if self.renew {
            Decision::Renew
        } else {
            Decision::Reissue(ReissueReason::Expired)
        }
    }
}

/// Whether the lease expires within the grace period
///
/// A missing or unparsable `expires-on` counts as expired.
#[must_use]
pub fn lease_expired(current: &Secret, now: DateTime<Utc>) -> bool {
    match expires_on(current) {
        Some(expiry) => now.timestamp() + LEASE_EXPIRY_GRACE_SECS >= expiry,
        None => true,
    }
}

fn expires_on(secret: &Secret) -> Option<i64> {
    secret
        .annotations()
        .get(EXPIRES_ON_ANNOTATION)
        .and_then(|v| v.parse::<i64>().ok())
}

/// Reconcile a ManagedLeasedCredential
///
/// Errors are handed to the error policy, which requeues with the per-object backoff.
pub async fn reconcile(
    obj: Arc<ManagedLeasedCredential>,
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

#[allow(clippy::too_many_lines, reason = "The decision dispatch reads best in one place")]
async fn reconcile_internal(
    obj: Arc<ManagedLeasedCredential>,
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
    let current = ctx.store.get_secret(&namespace, &secret_name).await?;

    if obj.meta().deletion_timestamp.is_some() {
        return finalize(&obj, &ctx, &namespace, &name, &secret_name, current.as_ref()).await;
    }

    if !has_finalizer(obj.meta(), LEASED_CREDENTIAL_FINALIZER) {
        debug!("Adding finalizer to {}", key);
        ctx.store
            .set_finalizers(
                KIND,
                &namespace,
                &name,
                with_finalizer(obj.meta(), LEASED_CREDENTIAL_FINALIZER),
            )
            .await?;
    }

    let leases = Arc::clone(ctx.leases()?);
    let now = ctx.now();

    let decision = match &current {
        None => Decision::Reissue(ReissueReason::Missing),
        Some(current) => {
            let facts = LeaseFacts::gather(&obj, current, now);
            match facts.decide() {
                Some(decision) => decision,
                None => {
                    let lease_id = facts.lease_id.as_deref().unwrap_or_default();
                    let valid = leases
                        .is_lease_valid(&obj.spec.vault.lease_path(lease_id))
                        .await;
                    facts.decide_with_lookup(valid)
                }
            }
        }
    };
    debug!("Decision for {}: {:?}", key, decision);

    let object_ref = obj.object_ref(&());
    let outcome = match (decision, current) {
        (Decision::NoOp, _) => Ok(()),
        (Decision::Update, Some(current)) => {
            update_content(&obj, &ctx, leases.as_ref(), &object_ref, &current, now).await
        }
        (Decision::Renew, Some(current)) => {
            renew(&obj, &ctx, leases.as_ref(), &object_ref, current, now).await
        }
        (Decision::Reissue(reason), current) => {
            reissue(&obj, &ctx, leases.as_ref(), &object_ref, current.as_ref(), reason, now).await
        }
        (decision, None) => Err(ReconcilerError::Configuration(format!(
            "{decision:?} needs an existing secret"
        ))),
    };
    outcome?;

    ctx.backoff.clear(&key);
    Ok(Action::requeue(ctx.config.reconcile_period()))
}

/// Revoke the lease, delete the destination Secret and release the finalizer
async fn finalize(
    obj: &ManagedLeasedCredential,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    secret_name: &str,
    current: Option<&Secret>,
) -> Result<Action, ReconcilerError> {
    if has_finalizer(obj.meta(), LEASED_CREDENTIAL_FINALIZER) {
        if let Some(lease_id) = current.and_then(stored_lease_id) {
            revoke_stored_lease(obj, ctx, namespace, name, &lease_id).await;
        }

        info!("🗑️  Deleting secret {}/{}", namespace, secret_name);
        if let Err(e) = delete_secret_if_present(ctx.store.as_ref(), namespace, secret_name).await {
            error!("Error deleting secret {}: {}", secret_name, e);
            metrics::set_dbsecret_deletion_error(name, namespace, ctx.now().timestamp());
            return Err(e.into());
        }

        ctx.store
            .set_finalizers(
                KIND,
                namespace,
                name,
                without_finalizer(obj.meta(), LEASED_CREDENTIAL_FINALIZER),
            )
            .await?;
        info!("Secret deleted {}/{}", namespace, secret_name);
    }

    ctx.backoff.clear(&object_key(namespace, name));
    metrics::forget_object(name, namespace);
    Ok(Action::await_change())
}

fn stored_lease_id(secret: &Secret) -> Option<String> {
    secret
        .annotations()
        .get(LEASE_ID_ANNOTATION)
        .filter(|id| !id.is_empty())
        .cloned()
}

/// Best-effort revocation of the lease recorded on the Secret
async fn revoke_stored_lease(
    obj: &ManagedLeasedCredential,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    lease_id: &str,
) {
    let Some(leases) = ctx.leases.as_ref() else {
        warn!("No secrets backend configured, lease {} not revoked", lease_id);
        return;
    };
    let lease_path = obj.spec.vault.lease_path(lease_id);
    match leases.revoke_lease(&lease_path).await {
        Ok(()) => debug!("Revoked lease {}", lease_path),
        Err(e) => {
            error!("Old lease could not be revoked {}: {}", lease_path, e);
            metrics::set_dbsecret_revokation_error(name, namespace, ctx.now().timestamp());
        }
    }
}

/// Revoke the old lease, issue a new credential and write it
async fn reissue(
    obj: &ManagedLeasedCredential,
    ctx: &Reconciler,
    leases: &dyn LeaseOperations,
    object_ref: &ObjectReference,
    current: Option<&Secret>,
    reason: ReissueReason,
    now: DateTime<Utc>,
) -> Result<(), ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let annotations = obj.meta().annotations.as_ref();

    match (reason, current.is_some()) {
        (ReissueReason::InvalidLease, true) => {
            info!("Invalid lease for {}/{}", namespace, name);
            ctx.record(
                annotations,
                object_ref,
                EventType::Normal,
                reasons::INVALID_LEASE,
                "Invalid lease found",
            )
            .await;
        }
        (ReissueReason::Forced, _) => {
            ctx.record(
                annotations,
                object_ref,
                EventType::Normal,
                reasons::FORCED,
                "Lease could not be renewed. New credentials will be issued",
            )
            .await;
        }
        _ => {}
    }

    if let Some(lease_id) = current.and_then(stored_lease_id) {
        revoke_stored_lease(obj, ctx, &namespace, &name, &lease_id).await;
    }

    let creds = match leases.issue_credentials(&obj.spec.vault).await {
        Ok(creds) => creds,
        Err(e) => {
            error!("Failed to obtain credentials for {}/{}: {}", namespace, name, e);
            metrics::increment_dbsecret_failures();
            metrics::set_dbsecret_error(&name, &namespace, now.timestamp());
            ctx.record(
                annotations,
                object_ref,
                EventType::Warning,
                reasons::FAILED,
                format!("Failed to obtain credentials {e}"),
            )
            .await;
            return Err(e.into());
        }
    };
    info!("🔑 Issued new credentials for {}/{}", namespace, name);

    let expires_on = now.timestamp() + creds.lease_duration;
    write_credential(obj, ctx, object_ref, &creds, expires_on, now).await?;
    rollout(obj, ctx, object_ref, now).await;
    Ok(())
}

/// Rewrite the Secret from the credential it already holds
///
/// Falls back to a reissue when the stored credential cannot be read back.
async fn update_content(
    obj: &ManagedLeasedCredential,
    ctx: &Reconciler,
    leases: &dyn LeaseOperations,
    object_ref: &ObjectReference,
    current: &Secret,
    now: DateTime<Utc>,
) -> Result<(), ReconcilerError> {
    let (Some(creds), Some(expiry)) = (stored_credentials(obj, current), expires_on(current)) else {
        info!("Stored credential unreadable, issuing a new one for {}", obj.name_any());
        return reissue(
            obj,
            ctx,
            leases,
            object_ref,
            Some(current),
            ReissueReason::Expired,
            now,
        )
        .await;
    };

    info!("Template changed, updating secret {}", current.name_any());
    write_credential(obj, ctx, object_ref, &creds, expiry, now).await?;
    rollout(obj, ctx, object_ref, now).await;
    Ok(())
}

fn base_credential_key(field: &str) -> String {
    format!("{BASE_CREDENTIAL_KEY_PREFIX}{field}")
}

fn stored_lease_duration(secret: &Secret) -> Option<i64> {
    secret
        .annotations()
        .get(LEASE_DURATION_ANNOTATION)
        .and_then(|d| d.parse().ok())
}

/// Credential currently held by the Secret
///
/// The hidden base keys win; Secrets written without them are read through
/// the output key renames.
fn stored_credentials(obj: &ManagedLeasedCredential, current: &Secret) -> Option<DatabaseCredentials> {
    let read = |field: &str| {
        secret_value(current, &base_credential_key(field))
            .or_else(|| secret_value(current, obj.output_key(field)))
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .filter(|v| !v.is_empty())
    };
    let lease_id = stored_lease_id(current)?;
    let lease_duration = stored_lease_duration(current)?;

    Some(DatabaseCredentials {
        username: read("username")?,
        password: read("password")?,
        lease_id: obj.spec.vault.lease_path(&lease_id),
        lease_duration,
        connection_url: read("connection_url"),
        hosts: read("hosts"),
    })
}

/// Extend the current lease by its recorded duration
///
/// A failed renewal or an unreadable duration marks the Secret so the next
/// pass reissues.
async fn renew(
    obj: &ManagedLeasedCredential,
    ctx: &Reconciler,
    leases: &dyn LeaseOperations,
    object_ref: &ObjectReference,
    mut current: Secret,
    now: DateTime<Utc>,
) -> Result<(), ReconcilerError> {
    let annotations = obj.meta().annotations.as_ref();
    let lease_id = stored_lease_id(&current).unwrap_or_default();
    let lease_path = obj.spec.vault.lease_path(&lease_id);
    let Some(increment) = stored_lease_duration(&current) else {
        let message = format!(
            "secret {} has no readable {LEASE_DURATION_ANNOTATION}",
            current.name_any()
        );
        error!("Lease {} cannot be renewed: {}", lease_path, message);
        force_reissue(ctx, &mut current).await;
        return Err(ReconcilerError::Resolution(message));
    };

    let renewal = match leases.renew_lease(&lease_path, increment).await {
        Ok(renewal) => renewal,
        Err(e) => {
            error!("Lease could not be extended {}: {}", lease_path, e);
            ctx.record(
                annotations,
                object_ref,
                EventType::Warning,
                reasons::FAILED,
                format!("Lease could not be renewed {e}"),
            )
            .await;
            force_reissue(ctx, &mut current).await;
            return Err(e.into());
        }
    };

    let duration = if renewal.lease_duration > 0 {
        renewal.lease_duration
    } else {
        increment
    };
    let expiry = now.timestamp() + duration;
    current
        .annotations_mut()
        .insert(EXPIRES_ON_ANNOTATION.to_string(), expiry.to_string());
    current
        .annotations_mut()
        .insert(LAST_UPDATED_ANNOTATION.to_string(), format_timestamp(now));

    if let Err(e) = ctx.store.replace_secret(&current).await {
        error!("Renewed lease could not be recorded on {}: {}", current.name_any(), e);
        ctx.record(
            annotations,
            object_ref,
            EventType::Warning,
            reasons::FAILED,
            format!("Secret {} not saved {e}", current.name_any()),
        )
        .await;
        return Err(e.into());
    }

    info!("♻️  Renewed lease {} for {}s", lease_path, duration);
    metrics::set_dbsecret_expire_time(&obj.name_any(), &current.namespace().unwrap_or_default(), expiry);
    ctx.record(
        annotations,
        object_ref,
        EventType::Normal,
        reasons::RENEWED,
        "Database lease renewed",
    )
    .await;
    Ok(())
}

/// Mark the Secret so the next pass issues a new lease
async fn force_reissue(ctx: &Reconciler, current: &mut Secret) {
    current
        .annotations_mut()
        .insert(FORCE_ANNOTATION.to_string(), "true".to_string());
    if let Err(e) = ctx.store.replace_secret(current).await {
        error!("Could not mark secret for reissue: {}", e);
    }
}

/// Output data for a credential
///
/// Templates replace the default output and the base fields are kept under
/// hidden keys for later rewrites. When no template renders, the renamed
/// base fields are written instead.
#[must_use]
pub fn credential_data(
    obj: &ManagedLeasedCredential,
    creds: &DatabaseCredentials,
) -> BTreeMap<String, Vec<u8>> {
    let mut values = TemplateData::new();
    values.insert("username".to_string(), creds.username.clone());
    values.insert("password".to_string(), creds.password.clone());
    if let Some(url) = creds.connection_url.as_ref().filter(|u| !u.is_empty()) {
        values.insert("connection_url".to_string(), url.clone());
    }
    if let Some(hosts) = creds.hosts.as_ref().filter(|h| !h.is_empty()) {
        values.insert("hosts".to_string(), hosts.clone());
    }

    let mut rendered = BTreeMap::new();
    for (output_key, body) in &obj.spec.template {
        match template::render(body, &values) {
            Ok(out) => {
                rendered.insert(output_key.clone(), out.into_bytes());
            }
            Err(e) => warn!("Template {} could not be rendered: {}", output_key, e),
        }
    }
    if !rendered.is_empty() {
        for field in CREDENTIAL_FIELDS {
            if let Some(value) = values.get(field) {
                rendered.insert(base_credential_key(field), value.clone().into_bytes());
            }
        }
        return rendered;
    }

    CREDENTIAL_FIELDS
        .iter()
        .filter_map(|field| {
            values
                .get(*field)
                .map(|v| (obj.output_key(field).to_string(), v.clone().into_bytes()))
        })
        .collect()
}

/// Trailing lease id segment stored on the Secret
///
/// `database/creds/role/abc` is stored as `abc`.
#[must_use]
pub fn lease_id_suffix(lease_id: &str) -> &str {
    lease_id
        .split('/')
        .nth(3)
        .or_else(|| lease_id.rsplit('/').next())
        .unwrap_or(lease_id)
}

/// The destination Secret for a credential
fn credential_secret(
    obj: &ManagedLeasedCredential,
    creds: &DatabaseCredentials,
    expires_on: i64,
    now: DateTime<Utc>,
) -> Result<Secret, ReconcilerError> {
    let owner = obj.controller_owner_ref(&()).ok_or_else(|| {
        ReconcilerError::Configuration(format!("{KIND} {} has no uid yet", obj.name_any()))
    })?;

    let mut labels = obj.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    let mut annotations = obj.annotations().clone();
    annotations.remove(LAST_APPLIED_ANNOTATION);
    annotations.remove(FORCE_ANNOTATION);
    annotations.extend([
        (
            LEASE_ID_ANNOTATION.to_string(),
            lease_id_suffix(&creds.lease_id).to_string(),
        ),
        (
            LEASE_DURATION_ANNOTATION.to_string(),
            creds.lease_duration.to_string(),
        ),
        (LAST_UPDATED_ANNOTATION.to_string(), format_timestamp(now)),
        (EXPIRES_ON_ANNOTATION.to_string(), expires_on.to_string()),
        (
            HASH_ANNOTATION.to_string(),
            template::fake_hash(&obj.spec.template),
        ),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(obj.secret_name()),
            namespace: obj.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(to_secret_data(credential_data(obj, creds))),
        ..Default::default()
    })
}

async fn write_credential(
    obj: &ManagedLeasedCredential,
    ctx: &Reconciler,
    object_ref: &ObjectReference,
    creds: &DatabaseCredentials,
    expires_on: i64,
    now: DateTime<Utc>,
) -> Result<(), ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let annotations = obj.meta().annotations.as_ref();
    let secret = credential_secret(obj, creds, expires_on, now)?;

    if let Err(e) = upsert_secret(ctx.store.as_ref(), &secret).await {
        error!("Failed to create secret {}: {}", obj.secret_name(), e);
        metrics::increment_dbsecret_failures();
        metrics::set_dbsecret_error(&name, &namespace, now.timestamp());
        ctx.record(
            annotations,
            object_ref,
            EventType::Warning,
            reasons::FAILED,
            format!("Secret {} not saved {e}", obj.secret_name()),
        )
        .await;
        return Err(e.into());
    }

    metrics::set_dbsecret_expire_time(&name, &namespace, expires_on);
    metrics::set_dbsecret_info(&name, &namespace, now.timestamp());
    metrics::set_dbsecret_error(&name, &namespace, 0);
    ctx.record(
        annotations,
        object_ref,
        EventType::Normal,
        reasons::UPDATED,
        "Secret created or updated",
    )
    .await;
    info!("✅ Updated secret {}/{}", namespace, obj.secret_name());
    Ok(())
}

/// Restart every rollout target that has ready replicas
///
/// Problems with one target are logged and never affect the others.
async fn rollout(
    obj: &ManagedLeasedCredential,
    ctx: &Reconciler,
    object_ref: &ObjectReference,
    now: DateTime<Utc>,
) {
    let namespace = obj.namespace().unwrap_or_default();
    let restarted_at = format_timestamp(now);

    for target in &obj.spec.rollout {
        if target.name.is_empty() || target.kind.is_empty() {
            continue;
        }
        let Some(kind) = WorkloadKind::parse(&target.kind) else {
            error!("{} kind is not supported", target.kind);
            continue;
        };

        match ctx.store.ready_replicas(kind, &namespace, &target.name).await {
            Ok(None) => info!("{} {}/{} not found, skipping rollout", kind, namespace, target.name),
            Ok(Some(ready)) if ready > 0 => {
                match ctx
                    .store
                    .annotate_pod_template(
                        kind,
                        &namespace,
                        &target.name,
                        RESTARTED_AT_ANNOTATION,
                        &restarted_at,
                    )
                    .await
                {
                    Ok(()) => {
                        info!("🚀 Rollout restart of {} {}/{}", kind, namespace, target.name);
                        ctx.record(
                            obj.meta().annotations.as_ref(),
                            object_ref,
                            EventType::Normal,
                            reasons::ROLLOUT,
                            format!("Rollout restart of {kind} {}", target.name),
                        )
                        .await;
                    }
                    Err(e) => error!("Rollout of {} {} failed: {}", kind, target.name, e),
                }
            }
            Ok(Some(_)) => debug!("{} {} has no ready replicas, skipping rollout", kind, target.name),
            Err(e) => error!("Could not read {} {}: {}", kind, target.name, e),
        }
    }
}
