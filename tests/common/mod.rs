//! Common test utilities for the integration tests
//!
//! In-memory fakes for every seam the reconcilers and the backend session
//! talk through, plus fixtures for the two managed kinds.

#![allow(dead_code, reason = "Each test binary uses a different subset of the helpers")]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::ByteString;
use kube::runtime::events::EventType;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::{mpsc, oneshot};

use vals_secret_controller::backend::{
    AuthInfo, BackendError, BackendType, ClientFactory, DatabaseCredentials, LeaseOperations,
    LeaseWatcher, RenewalOutput, SecretResponse, SecretsClient,
};
use vals_secret_controller::config::ControllerConfig;
use vals_secret_controller::controller::events::EventSink;
use vals_secret_controller::controller::reconciler::{Clock, Reconciler};
use vals_secret_controller::controller::resolver::{ResolveError, ValueResolver};
use vals_secret_controller::controller::store::{
    ManagedKind, ObjectStore, StoreError, WorkloadKind,
};
use vals_secret_controller::crd::{
    ManagedLeasedCredential, ManagedLeasedCredentialSpec, ManagedStaticSecret,
    ManagedStaticSecretSpec, VaultRole,
};
use vals_secret_controller::database::{DatabaseError, DatabaseRotator, PasswordChange};

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` to ensure it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // another test binary helper may already have installed it
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Clock the tests move forward by hand
#[derive(Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(at)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn clock(&self) -> Clock {
        let now = Arc::clone(&self.now);
        Arc::new(move || *now.lock().unwrap())
    }
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory [`ObjectStore`]
#[derive(Default)]
pub struct InMemoryStore {
    secrets: Mutex<BTreeMap<Key, Secret>>,
    /// `create ns/name`, `replace ns/name`, `delete ns/name`
    secret_writes: Mutex<Vec<String>>,
    finalizers: Mutex<HashMap<(ManagedKind, String, String), Vec<String>>>,
    workloads: Mutex<HashMap<(WorkloadKind, String, String), i32>>,
    restarts: Mutex<Vec<(WorkloadKind, String, String, String)>>,
    pub fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn insert_secret(&self, secret: Secret) {
        let ns = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets.lock().unwrap().insert((ns, name), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn secret_writes(&self) -> Vec<String> {
        self.secret_writes.lock().unwrap().clone()
    }

    pub fn finalizers(&self, kind: ManagedKind, namespace: &str, name: &str) -> Option<Vec<String>> {
        self.finalizers
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn add_workload(&self, kind: WorkloadKind, namespace: &str, name: &str, ready: i32) {
        self.workloads
            .lock()
            .unwrap()
            .insert((kind, namespace.to_string(), name.to_string()), ready);
    }

    /// `(kind, name, annotation key, value)` of every pod template annotation
    pub fn restarts(&self) -> Vec<(WorkloadKind, String, String, String)> {
        self.restarts.lock().unwrap().clone()
    }

    fn record_write(&self, op: &str, namespace: &str, name: &str) {
        self.secret_writes
            .lock()
            .unwrap()
            .push(format!("{op} {namespace}/{name}"));
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Invalid("writes disabled".to_string()));
        }
        Ok(())
    }
}

fn secret_key(secret: &Secret) -> Result<Key, StoreError> {
    match (&secret.metadata.namespace, &secret.metadata.name) {
        (Some(ns), Some(name)) => Ok((ns.clone(), name.clone())),
        _ => Err(StoreError::Invalid("secret without namespace or name".to_string())),
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.check_writable()?;
        let (ns, name) = secret_key(secret)?;
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&(ns.clone(), name.clone())) {
            return Err(StoreError::AlreadyExists {
                kind: "Secret".to_string(),
                namespace: ns,
                name,
            });
        }
        secrets.insert((ns.clone(), name.clone()), secret.clone());
        drop(secrets);
        self.record_write("create", &ns, &name);
        Ok(secret.clone())
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.check_writable()?;
        let (ns, name) = secret_key(secret)?;
        let mut secrets = self.secrets.lock().unwrap();
        if !secrets.contains_key(&(ns.clone(), name.clone())) {
            return Err(StoreError::NotFound {
                kind: "Secret".to_string(),
                namespace: ns,
                name,
            });
        }
        secrets.insert((ns.clone(), name.clone()), secret.clone());
        drop(secrets);
        self.record_write("replace", &ns, &name);
        Ok(secret.clone())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let removed = self.secrets.lock().unwrap().remove(&key(namespace, name));
        if removed.is_none() {
            return Err(StoreError::NotFound {
                kind: "Secret".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        self.record_write("delete", namespace, name);
        Ok(())
    }

    async fn set_finalizers(
        &self,
        kind: ManagedKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        self.finalizers
            .lock()
            .unwrap()
            .insert((kind, namespace.to_string(), name.to_string()), finalizers);
        Ok(())
    }

    async fn ready_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>, StoreError> {
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .copied())
    }

    async fn annotate_pod_template(
        &self,
        kind: WorkloadKind,
        _namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.restarts.lock().unwrap().push((
            kind,
            name.to_string(),
            key.to_string(),
            value.to_string(),
        ));
        Ok(())
    }
}

/// A published event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// [`EventSink`] that keeps every event
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(
        &self,
        _object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// [`ValueResolver`] over a fixed map of references
#[derive(Default)]
pub struct StaticResolver {
    values: Mutex<HashMap<String, String>>,
    calls: AtomicU32,
}

impl StaticResolver {
    pub fn with(values: &[(&str, &str)]) -> Self {
        let resolver = Self::default();
        for (reference, value) in values {
            resolver.set(reference, value);
        }
        resolver
    }

    pub fn set(&self, reference: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(reference.to_string(), value.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValueResolver for StaticResolver {
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.values
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(reference.to_string()))
    }
}

/// Scripted [`LeaseOperations`] recording every call in order
pub struct FakeLeases {
    calls: Mutex<Vec<String>>,
    serial: AtomicU32,
    pub lease_duration: i64,
    pub lease_valid: AtomicBool,
    pub renew_fails: AtomicBool,
    pub issue_fails: AtomicBool,
}

impl FakeLeases {
    pub fn new(lease_duration: i64) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            serial: AtomicU32::new(0),
            lease_duration,
            lease_valid: AtomicBool::new(true),
            renew_fails: AtomicBool::new(false),
            issue_fails: AtomicBool::new(false),
        }
    }

    /// `issue`, `renew <lease>`, `revoke <lease>` and `lookup <lease>` in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl LeaseOperations for FakeLeases {
    async fn issue_credentials(&self, role: &VaultRole) -> Result<DatabaseCredentials, BackendError> {
        self.record("issue".to_string());
        if self.issue_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 500,
                message: "database unreachable".to_string(),
            });
        }
        let n = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DatabaseCredentials {
            username: format!("v-{}-{n}", role.role),
            password: format!("pw-{n}"),
            lease_id: format!("{}/creds/{}/lease-{n}", role.mount, role.role),
            lease_duration: self.lease_duration,
            connection_url: Some(format!("postgresql://v-{}-{n}:pw-{n}@db:5432/app", role.role)),
            hosts: None,
        })
    }

    async fn renew_lease(&self, lease_id: &str, increment: i64) -> Result<SecretResponse, BackendError> {
        self.record(format!("renew {lease_id}"));
        if self.renew_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 400,
                message: "lease is not renewable".to_string(),
            });
        }
        Ok(SecretResponse {
            lease_id: lease_id.to_string(),
            lease_duration: increment,
            renewable: true,
            ..Default::default()
        })
    }

    async fn revoke_lease(&self, lease_id: &str) -> Result<(), BackendError> {
        self.record(format!("revoke {lease_id}"));
        Ok(())
    }

    async fn is_lease_valid(&self, lease_id: &str) -> bool {
        self.record(format!("lookup {lease_id}"));
        self.lease_valid.load(Ordering::SeqCst)
    }
}

/// [`DatabaseRotator`] that only records password changes
#[derive(Default)]
pub struct RecordingRotator {
    changes: Mutex<Vec<(String, PasswordChange)>>,
    pub fail: AtomicBool,
}

impl RecordingRotator {
    pub fn changes(&self) -> Vec<(String, PasswordChange)> {
        self.changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseRotator for RecordingRotator {
    async fn rotate(&self, driver: &str, change: PasswordChange) -> Result<(), DatabaseError> {
        self.changes
            .lock()
            .unwrap()
            .push((driver.to_string(), change));
        if self.fail.load(Ordering::SeqCst) {
            return Err(DatabaseError::NoHosts);
        }
        Ok(())
    }
}

/// Everything a reconciler test needs, wired together
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub resolver: Arc<StaticResolver>,
    pub events: Arc<RecordingEvents>,
    pub leases: Arc<FakeLeases>,
    pub rotator: Arc<RecordingRotator>,
    pub clock: TestClock,
    pub ctx: Arc<Reconciler>,
}

impl Harness {
    pub fn new(resolver: StaticResolver) -> Self {
        Self::with_config(resolver, ControllerConfig::default())
    }

    pub fn with_config(resolver: StaticResolver, config: ControllerConfig) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let resolver = Arc::new(resolver);
        let events = Arc::new(RecordingEvents::default());
        let leases = Arc::new(FakeLeases::new(3600));
        let rotator = Arc::new(RecordingRotator::default());
        let clock = TestClock::new(start_time());

        let ctx = Reconciler::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&resolver) as Arc<dyn ValueResolver>,
            Arc::clone(&events) as Arc<dyn EventSink>,
            config,
        )
        .with_leases(Arc::clone(&leases) as Arc<dyn LeaseOperations>)
        .with_databases(Arc::clone(&rotator) as Arc<dyn DatabaseRotator>)
        .with_clock(clock.clock());

        Self {
            store,
            resolver,
            events,
            leases,
            rotator,
            clock,
            ctx: Arc::new(ctx),
        }
    }
}

pub fn static_secret(name: &str, namespace: &str, spec: ManagedStaticSecretSpec) -> ManagedStaticSecret {
    let mut obj = ManagedStaticSecret::new(name, spec);
    obj.metadata.namespace = Some(namespace.to_string());
    obj.metadata.uid = Some(format!("uid-{name}"));
    obj
}

pub fn leased_credential(
    name: &str,
    namespace: &str,
    spec: ManagedLeasedCredentialSpec,
) -> ManagedLeasedCredential {
    let mut obj = ManagedLeasedCredential::new(name, spec);
    obj.metadata.namespace = Some(namespace.to_string());
    obj.metadata.uid = Some(format!("uid-{name}"));
    obj
}

pub fn plain_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Value of `key` in a Secret as a string
pub fn data_str(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

pub fn annotation(secret: &Secret, key: &str) -> Option<String> {
    secret.metadata.annotations.as_ref()?.get(key).cloned()
}

/// Scripted backend behaviour shared by every client a [`ScriptedFactory`] builds
#[derive(Default)]
pub struct BackendScript {
    /// Requests answered with 403 before reads succeed
    pub deny_reads: AtomicU32,
    /// Logins that fail before one succeeds
    pub failing_logins: AtomicU32,
    pub logins: AtomicU32,
    pub reads: AtomicU32,
    /// Token handed out by the next successful login is `tok-{n}`
    pub renewable_logins: AtomicBool,
}

/// [`SecretsClient`] driven by a [`BackendScript`]
#[derive(Debug)]
pub struct ScriptedClient {
    pub generation: u32,
    script: Arc<BackendScriptHandle>,
    token: Mutex<Option<String>>,
}

/// Debug-printable handle on the script
pub struct BackendScriptHandle(pub BackendScript);

impl std::fmt::Debug for BackendScriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackendScript")
    }
}

impl ScriptedClient {
    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

fn not_scripted(op: &str) -> BackendError {
    BackendError::Configuration(format!("{op} is not scripted"))
}

#[async_trait]
impl SecretsClient for ScriptedClient {
    async fn login(&self) -> Result<SecretResponse, BackendError> {
        let script = &self.script.0;
        let n = script.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if script
            .failing_logins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Auth("invalid role or secret id".to_string()));
        }
        let token = format!("tok-{n}");
        *self.token.lock().unwrap() = Some(token.clone());
        Ok(SecretResponse {
            auth: Some(AuthInfo {
                client_token: token,
                lease_duration: 60,
                renewable: script.renewable_logins.load(Ordering::SeqCst),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = Some(token.to_string());
    }

    async fn read(&self, path: &str) -> Result<Option<SecretResponse>, BackendError> {
        let script = &self.script.0;
        script.reads.fetch_add(1, Ordering::SeqCst);
        if script
            .deny_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Api {
                status: 403,
                message: "permission denied".to_string(),
            });
        }
        Ok(Some(SecretResponse {
            data: Some(HashMap::from([(
                "path".to_string(),
                serde_json::Value::String(path.to_string()),
            )])),
            ..Default::default()
        }))
    }

    async fn read_kv2(
        &self,
        _mount: &str,
        _path: &str,
    ) -> Result<Option<HashMap<String, serde_json::Value>>, BackendError> {
        Err(not_scripted("read_kv2"))
    }

    async fn write(
        &self,
        _path: &str,
        _data: HashMap<String, serde_json::Value>,
    ) -> Result<Option<SecretResponse>, BackendError> {
        Err(not_scripted("write"))
    }

    async fn renew(&self, _lease_id: &str, _increment: i64) -> Result<SecretResponse, BackendError> {
        Err(not_scripted("renew"))
    }

    async fn revoke(&self, _lease_id: &str) -> Result<(), BackendError> {
        Err(not_scripted("revoke"))
    }

    async fn lookup(&self, _lease_id: &str) -> Result<SecretResponse, BackendError> {
        Err(not_scripted("lookup"))
    }

    async fn lookup_self(&self) -> Result<SecretResponse, BackendError> {
        Err(not_scripted("lookup_self"))
    }

    /// One renewal handing out `renewed-{generation}`, then done
    fn new_lease_watcher(&self, secret: &SecretResponse) -> Result<LeaseWatcher, BackendError> {
        let (renew_tx, renew_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let mut renewed = secret.clone();
        if let Some(auth) = renewed.auth.as_mut() {
            auth.client_token = format!("renewed-{}", self.generation);
        }
        renew_tx
            .try_send(RenewalOutput {
                renewed_at: Utc::now(),
                secret: renewed,
            })
            .map_err(|_| not_scripted("renewal"))?;
        let _ = done_tx.send(Ok(()));
        Ok(LeaseWatcher::from_channels(renew_rx, done_rx))
    }

    fn backend(&self) -> BackendType {
        BackendType::Vault
    }

    fn address(&self) -> &str {
        "http://scripted:8200"
    }
}

/// [`ClientFactory`] counting how many clients it built
#[derive(Debug)]
pub struct ScriptedFactory {
    pub script: Arc<BackendScriptHandle>,
    pub created: AtomicU32,
}

impl ScriptedFactory {
    pub fn new(script: BackendScript) -> Self {
        Self {
            script: Arc::new(BackendScriptHandle(script)),
            created: AtomicU32::new(0),
        }
    }

    pub fn script(&self) -> &BackendScript {
        &self.script.0
    }
}

impl ClientFactory for ScriptedFactory {
    fn create(&self) -> Result<Arc<dyn SecretsClient>, BackendError> {
        let generation = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(ScriptedClient {
            generation,
            script: Arc::clone(&self.script),
            token: Mutex::new(None),
        }))
    }

    fn address(&self) -> String {
        "http://scripted:8200".to_string()
    }
}
