//! # CRD Validation Tests
//!
//! Sample manifests for both kinds must deserialize into the Rust types, and
//! the generated CRDs must keep their names, scope and printer columns.

use kube::core::CustomResourceExt;
use vals_secret_controller::crd::{ManagedLeasedCredential, ManagedStaticSecret};

#[test]
fn test_static_secret_with_all_fields() {
    let yaml = r#"
apiVersion: secret-management.microscaler.io/v1
kind: ManagedStaticSecret
metadata:
  name: app-credentials
  namespace: default
  annotations:
    secret-management.microscaler.io/record: "false"
spec:
  name: app
  ttl: 3600
  type: kubernetes.io/basic-auth
  data:
    username:
      ref: ref+vault://secret/app#username
    password:
      ref: ref+vault://secret/app#password
    ca.crt:
      ref: ref+k8s://cert-manager/root-ca#ca.crt
    tls.key:
      ref: ref+vault://secret/tls#key
      encoding: base64
  template:
    config.yaml: |
      user: {{ .username }}
  databases:
    - driver: mysql
      loginCredentials:
        secretName: mysql-admin
        namespace: databases
        usernameKey: user
        passwordKey: password
      port: 3307
      usernameKey: username
      passwordKey: password
      userHost: "10.%"
      hosts:
        - mysql-0.mysql
        - mysql-1.mysql
"#;

    let obj: ManagedStaticSecret =
        serde_yaml::from_str(yaml).expect("Should deserialize a full ManagedStaticSecret");

    assert_eq!(obj.secret_name(), "app");
    assert_eq!(obj.secret_type(), "kubernetes.io/basic-auth");
    assert_eq!(obj.spec.ttl, 3600);
    assert_eq!(obj.spec.data.len(), 4);
    assert!(obj.spec.data["tls.key"].is_base64());
    assert!(!obj.spec.data["username"].is_base64());
    assert_eq!(
        obj.spec.data["ca.crt"].reference,
        "ref+k8s://cert-manager/root-ca#ca.crt"
    );
    assert!(obj.spec.template.contains_key("config.yaml"));

    let database = &obj.spec.databases[0];
    assert_eq!(database.driver, "mysql");
    assert_eq!(database.port, Some(3307));
    assert_eq!(database.user_host.as_deref(), Some("10.%"));
    assert_eq!(database.hosts.len(), 2);
    assert_eq!(database.login_credentials.secret_name, "mysql-admin");
    assert_eq!(
        database.login_credentials.namespace.as_deref(),
        Some("databases")
    );
}

#[test]
fn test_static_secret_minimal() {
    let yaml = r#"
apiVersion: secret-management.microscaler.io/v1
kind: ManagedStaticSecret
metadata:
  name: minimal
  namespace: default
spec:
  data:
    token:
      ref: literal-token
"#;

    let obj: ManagedStaticSecret = serde_yaml::from_str(yaml).expect("minimal spec");
    assert_eq!(obj.secret_name(), "minimal");
    assert_eq!(obj.secret_type(), "Opaque");
    assert_eq!(obj.spec.ttl, 0);
    assert!(obj.spec.databases.is_empty());
}

#[test]
fn test_leased_credential_with_all_fields() {
    let yaml = r#"
apiVersion: secret-management.microscaler.io/v1
kind: ManagedLeasedCredential
metadata:
  name: orders-db
  namespace: shop
spec:
  secretName: orders-db-credentials
  vault:
    mount: database
    role: orders
  renew: true
  secret:
    username: DB_USER
    password: DB_PASSWORD
  template:
    DATABASE_URL: postgres://{{ .username }}:{{ .password }}@db/orders
  rollout:
    - kind: Deployment
      name: orders-api
    - kind: StatefulSet
      name: orders-worker
"#;

    let obj: ManagedLeasedCredential =
        serde_yaml::from_str(yaml).expect("Should deserialize a full ManagedLeasedCredential");

    assert_eq!(obj.secret_name(), "orders-db-credentials");
    assert_eq!(obj.spec.vault.creds_path(), "database/creds/orders");
    assert!(obj.spec.renew);
    assert_eq!(obj.output_key("username"), "DB_USER");
    assert_eq!(obj.output_key("connection_url"), "connection_url");
    assert_eq!(obj.spec.rollout.len(), 2);
    assert_eq!(obj.spec.rollout[1].kind, "StatefulSet");
}

#[test]
fn test_leased_credential_defaults() {
    let yaml = r#"
apiVersion: secret-management.microscaler.io/v1
kind: ManagedLeasedCredential
metadata:
  name: orders-db
  namespace: shop
spec:
  vault:
    mount: database
    role: orders
"#;

    let obj: ManagedLeasedCredential = serde_yaml::from_str(yaml).expect("minimal spec");
    assert_eq!(obj.secret_name(), "orders-db");
    assert!(!obj.spec.renew);
    assert!(obj.spec.secret.is_empty());
    assert!(obj.spec.rollout.is_empty());
}

#[test]
fn test_leased_credential_requires_vault_role() {
    let yaml = r#"
apiVersion: secret-management.microscaler.io/v1
kind: ManagedLeasedCredential
metadata:
  name: orders-db
  namespace: shop
spec:
  renew: true
"#;

    let result: Result<ManagedLeasedCredential, _> = serde_yaml::from_str(yaml);
    assert!(result.is_err(), "vault role and mount are required");
}

#[test]
fn test_generated_crds() {
    let static_crd = ManagedStaticSecret::crd();
    assert_eq!(
        static_crd.metadata.name.as_deref(),
        Some("managedstaticsecrets.secret-management.microscaler.io")
    );
    assert_eq!(static_crd.spec.scope, "Namespaced");
    assert_eq!(
        static_crd.spec.names.short_names,
        Some(vec!["mss".to_string()])
    );

    let leased_crd = ManagedLeasedCredential::crd();
    assert_eq!(
        leased_crd.metadata.name.as_deref(),
        Some("managedleasedcredentials.secret-management.microscaler.io")
    );
    let version = &leased_crd.spec.versions[0];
    assert_eq!(version.name, "v1");
    let columns: Vec<&str> = version
        .additional_printer_columns
        .as_ref()
        .expect("printer columns")
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(columns, vec!["Secret", "Role", "Renew"]);

    // the generated manifest must render as YAML for the crdgen binary
    let yaml = serde_yaml::to_string(&leased_crd).expect("CRD renders as YAML");
    assert!(yaml.contains("kind: CustomResourceDefinition"));
}
