//! Issuance, renewal and binding against an in-memory CA

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certwarden::acme::{
    AcmeClient, AcmeError, AcmeOrder, AcmeProvider, AcmeSession, Authorization, CertificatePaths,
    CertificateStorage, Challenge, DnsChallengeRecord, RenewalObserver, RenewalOutcome,
};
use certwarden::server::{
    bind_with_client, AdapterRegistry, ConnectionHandler, ManagedServer, ServerAdapter,
    ServerError,
};
use certwarden::load_bundle;
use certwarden_config::{AcmeChallengeType, AcmeConfig, ListenerConfig, ServerConfig, TlsFiles};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

// ============================================================================
// Mock CA
// ============================================================================

struct MockCa {
    storage: CertificateStorage,
    offered: Vec<AcmeChallengeType>,
    already_valid: bool,
    fail_validation: AtomicBool,
    with_root: AtomicBool,
    validity_days: AtomicI64,
    sessions: AtomicUsize,
    orders: AtomicUsize,
    tokens_by_url: Mutex<HashMap<String, String>>,
    ready: Mutex<Vec<String>>,
    artifacts_at_ready: Mutex<Vec<bool>>,
    csrs: Mutex<Vec<Vec<u8>>>,
}

impl MockCa {
    fn new(cert_dir: &Path, offered: Vec<AcmeChallengeType>) -> Arc<Self> {
        Arc::new(Self {
            storage: CertificateStorage::new(cert_dir),
            offered,
            already_valid: false,
            fail_validation: AtomicBool::new(false),
            with_root: AtomicBool::new(true),
            validity_days: AtomicI64::new(90),
            sessions: AtomicUsize::new(0),
            orders: AtomicUsize::new(0),
            tokens_by_url: Mutex::new(HashMap::new()),
            ready: Mutex::new(Vec::new()),
            artifacts_at_ready: Mutex::new(Vec::new()),
            csrs: Mutex::new(Vec::new()),
        })
    }

    fn already_valid(cert_dir: &Path) -> Arc<Self> {
        let mut ca = Self::new(cert_dir, vec![AcmeChallengeType::Http01]);
        Arc::get_mut(&mut ca).unwrap().already_valid = true;
        ca
    }

    fn chain(&self, domains: &[String]) -> String {
        let days = self.validity_days.load(Ordering::SeqCst);
        let now = time::OffsetDateTime::now_utc();

        let mut leaf = rcgen::CertificateParams::new(domains.to_vec()).unwrap();
        leaf.distinguished_name
            .push(rcgen::DnType::CommonName, domains[0].as_str());
        leaf.not_before = now - time::Duration::days(1);
        leaf.not_after = now + time::Duration::days(days) + time::Duration::hours(1);
        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let leaf_pem = leaf.self_signed(&leaf_key).unwrap().pem();

        if !self.with_root.load(Ordering::SeqCst) {
            return leaf_pem;
        }

        let mut root = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        root.distinguished_name
            .push(rcgen::DnType::CommonName, "Mock Root CA");
        let root_key = rcgen::KeyPair::generate().unwrap();

        format!("{}\n{}", leaf_pem, root.self_signed(&root_key).unwrap().pem())
    }
}

struct MockProvider(Arc<MockCa>);

#[async_trait]
impl AcmeProvider for MockProvider {
    async fn open_session(
        &self,
        directory_url: &str,
        email: &str,
    ) -> Result<Arc<dyn AcmeSession>, AcmeError> {
        assert!(directory_url.contains("staging"));
        assert_eq!(email, "ops@example.com");
        self.0.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession(Arc::clone(&self.0))))
    }
}

struct MockSession(Arc<MockCa>);

#[async_trait]
impl AcmeSession for MockSession {
    async fn new_order(&self, domains: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        self.0.orders.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockOrder {
            ca: Arc::clone(&self.0),
            domains: domains.to_vec(),
        }))
    }
}

struct MockOrder {
    ca: Arc<MockCa>,
    domains: Vec<String>,
}

#[async_trait]
impl AcmeOrder for MockOrder {
    async fn authorizations(&mut self) -> Result<Vec<Authorization>, AcmeError> {
        let mut tokens = self.ca.tokens_by_url.lock();
        let authorizations = self
            .domains
            .iter()
            .enumerate()
            .map(|(i, domain)| {
                let challenges = self
                    .ca
                    .offered
                    .iter()
                    .map(|kind| {
                        let token = format!("token-{}-{}", i, kind);
                        let url = format!("https://ca.test/challenge/{}/{}", i, kind);
                        tokens.insert(url.clone(), token.clone());
                        Challenge {
                            kind: *kind,
                            key_authorization: format!("{}.thumbprint", token),
                            dns_value: format!("digest-{}", i),
                            token,
                            url,
                        }
                    })
                    .collect();
                Authorization {
                    domain: domain.clone(),
                    valid: self.ca.already_valid,
                    challenges,
                }
            })
            .collect();
        Ok(authorizations)
    }

    async fn set_challenge_ready(&mut self, challenge_url: &str) -> Result<(), AcmeError> {
        let token = self.ca.tokens_by_url.lock().get(challenge_url).cloned();
        if let Some(token) = token {
            let present = self.ca.storage.challenge_path(&token).exists();
            self.ca.artifacts_at_ready.lock().push(present);
        }
        self.ca.ready.lock().push(challenge_url.to_string());
        Ok(())
    }

    async fn wait_ready(&mut self, _timeout: Duration) -> Result<(), AcmeError> {
        if self.ca.fail_validation.load(Ordering::SeqCst) {
            return Err(AcmeError::ChallengeValidation {
                domain: self.domains[0].clone(),
                message: "Invalid response from challenge URL".to_string(),
            });
        }
        Ok(())
    }

    async fn finalize(&mut self, csr_der: &[u8], _timeout: Duration) -> Result<String, AcmeError> {
        self.ca.csrs.lock().push(csr_der.to_vec());
        Ok(self.ca.chain(&self.domains))
    }
}

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct Recorder {
    obtained: Mutex<Vec<CertificatePaths>>,
    renewed: AtomicUsize,
    errors: Mutex<Vec<String>>,
    dns: Mutex<Vec<DnsChallengeRecord>>,
}

impl RenewalObserver for Recorder {
    fn on_obtained(&self, paths: &CertificatePaths) {
        self.obtained.lock().push(paths.clone());
    }

    fn on_renewed(&self, _paths: &CertificatePaths) {
        self.renewed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &AcmeError) {
        self.errors.lock().push(error.to_string());
    }

    fn on_dns_challenge(&self, record: &DnsChallengeRecord) {
        self.dns.lock().push(record.clone());
    }
}

fn acme_config(dir: &TempDir, domains: &[&str]) -> AcmeConfig {
    let mut config = AcmeConfig::new(
        "ops@example.com",
        domains.iter().map(|d| d.to_string()).collect(),
    );
    config.cert_dir = dir.path().to_path_buf();
    config.staging = true;
    config.auto_renew = false;
    config
}

fn client_with(config: AcmeConfig, ca: &Arc<MockCa>) -> (Arc<AcmeClient>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let client = AcmeClient::new(config, Arc::new(MockProvider(Arc::clone(ca))))
        .with_observer(recorder.clone());
    (Arc::new(client), recorder)
}

// ============================================================================
// Issuance
// ============================================================================

#[tokio::test]
async fn test_http01_issuance_writes_bundle() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, recorder) = client_with(acme_config(&dir, &["example.com", "www.example.com"]), &ca);

    let paths = client.obtain_certificates().await.unwrap();

    assert_eq!(paths.cert, dir.path().join("cert.pem"));
    assert_eq!(paths.key, dir.path().join("key.pem"));
    assert_eq!(paths.ca.as_deref(), Some(dir.path().join("ca.pem").as_path()));

    let chain = std::fs::read_to_string(&paths.cert).unwrap();
    assert_eq!(chain.matches("BEGIN CERTIFICATE").count(), 2);
    let ca_pem = std::fs::read_to_string(paths.ca.as_ref().unwrap()).unwrap();
    assert_eq!(ca_pem.matches("BEGIN CERTIFICATE").count(), 1);
    assert!(std::fs::read_to_string(&paths.key)
        .unwrap()
        .contains("PRIVATE KEY"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&paths.key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    assert_eq!(recorder.obtained.lock().as_slice(), &[paths.clone()]);
    assert!(recorder.errors.lock().is_empty());
    assert_eq!(recorder.renewed.load(Ordering::SeqCst), 0);

    assert_eq!(client.certificate_info().unwrap().days_until_expiration, 90);
    assert!(client
        .certificate_info()
        .unwrap()
        .subject_alt_names
        .contains(&"www.example.com".to_string()));
}

#[tokio::test]
async fn test_http01_artifacts_present_during_validation_only() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01, AcmeChallengeType::Dns01]);
    let (client, _) = client_with(acme_config(&dir, &["example.com", "www.example.com"]), &ca);

    client.obtain_certificates().await.unwrap();

    assert_eq!(ca.ready.lock().len(), 2);
    assert_eq!(ca.artifacts_at_ready.lock().as_slice(), &[true, true]);

    let storage = client.storage();
    assert!(!storage.challenge_path("token-0-http-01").exists());
    assert!(!storage.challenge_path("token-1-http-01").exists());
    assert_eq!(client.http01_responses().len(), 0);
    assert_eq!(ca.csrs.lock().len(), 1);
}

#[tokio::test]
async fn test_csr_names_first_domain_as_common_name() {
    use x509_parser::certification_request::X509CertificationRequest;
    use x509_parser::extensions::{GeneralName, ParsedExtension};
    use x509_parser::prelude::FromDer;

    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, _) = client_with(acme_config(&dir, &["example.com", "www.example.com"]), &ca);

    client.obtain_certificates().await.unwrap();

    let csrs = ca.csrs.lock();
    assert_eq!(csrs.len(), 1);
    let (_, csr) = X509CertificationRequest::from_der(&csrs[0]).unwrap();
    let info = &csr.certification_request_info;

    let common_names: Vec<&str> = info
        .subject
        .iter_common_name()
        .map(|cn| cn.as_str().unwrap())
        .collect();
    assert_eq!(common_names, vec!["example.com"]);

    let mut alt_names = Vec::new();
    for extension in csr.requested_extensions().into_iter().flatten() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    alt_names.push(dns.to_string());
                }
            }
        }
    }
    alt_names.sort();
    assert_eq!(alt_names, vec!["example.com", "www.example.com"]);
}

#[tokio::test]
async fn test_session_opened_once() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, recorder) = client_with(acme_config(&dir, &["example.com"]), &ca);

    client.obtain_certificates().await.unwrap();
    client.obtain_certificates().await.unwrap();

    assert_eq!(ca.sessions.load(Ordering::SeqCst), 1);
    assert_eq!(ca.orders.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.obtained.lock().len(), 2);
}

#[tokio::test]
async fn test_single_certificate_chain_has_no_ca_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("ca.pem"), "stale").unwrap();

    let storage = CertificateStorage::new(dir.path());
    let key = rcgen::KeyPair::generate().unwrap();
    let leaf = rcgen::CertificateParams::new(vec!["example.com".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();

    let paths = storage
        .save_bundle(&leaf.pem(), &key.serialize_pem())
        .unwrap();

    assert!(paths.ca.is_none());
    assert!(!dir.path().join("ca.pem").exists());
}

#[tokio::test]
async fn test_validation_failure_reports_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    ca.fail_validation.store(true, Ordering::SeqCst);
    let (client, recorder) = client_with(acme_config(&dir, &["example.com"]), &ca);

    let err = client.obtain_certificates().await.unwrap_err();

    assert!(matches!(err, AcmeError::ChallengeValidation { ref domain, .. } if domain == "example.com"));
    assert_eq!(recorder.errors.lock().as_slice(), &[err.to_string()]);
    assert!(recorder.obtained.lock().is_empty());
    assert!(!client.storage().has_certificate());
    assert!(!client.storage().challenge_path("token-0-http-01").exists());
    assert_eq!(client.http01_responses().len(), 0);
}

#[tokio::test]
async fn test_missing_challenge_type() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Dns01]);
    let (client, recorder) = client_with(acme_config(&dir, &["example.com"]), &ca);

    let err = client.obtain_certificates().await.unwrap_err();

    assert!(matches!(
        err,
        AcmeError::NoChallenge { ref domain, kind: "http-01" } if domain == "example.com"
    ));
    assert_eq!(recorder.errors.lock().len(), 1);
    assert!(ca.ready.lock().is_empty());
}

#[tokio::test]
async fn test_valid_authorizations_are_not_fulfilled() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::already_valid(dir.path());
    let (client, _) = client_with(acme_config(&dir, &["example.com"]), &ca);

    client.obtain_certificates().await.unwrap();

    assert!(ca.ready.lock().is_empty());
    assert!(client.storage().has_certificate());
}

#[tokio::test]
async fn test_no_domains() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, recorder) = client_with(acme_config(&dir, &[]), &ca);

    let err = client.obtain_certificates().await.unwrap_err();

    assert!(matches!(err, AcmeError::NoDomains));
    assert_eq!(ca.sessions.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.errors.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dns01_announces_records_and_waits() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01, AcmeChallengeType::Dns01]);
    let mut config = acme_config(&dir, &["example.com", "*.example.com"]);
    config.challenge_type = AcmeChallengeType::Dns01;
    config.dns_settle_secs = 30;
    let (client, recorder) = client_with(config, &ca);

    let start = tokio::time::Instant::now();
    client.obtain_certificates().await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(60));

    let records = recorder.dns.lock().clone();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "_acme-challenge.example.com");
    assert_eq!(records[0].value, "digest-0");
    assert_eq!(records[1].domain, "*.example.com");
    assert_eq!(records[1].name, "_acme-challenge.example.com");
    assert_eq!(records[1].value, "digest-1");

    assert_eq!(
        ca.ready.lock().as_slice(),
        &[
            "https://ca.test/challenge/0/dns-01".to_string(),
            "https://ca.test/challenge/1/dns-01".to_string(),
        ]
    );
    assert!(!client.storage().challenge_path("token-0-http-01").exists());
}

// ============================================================================
// Renewal
// ============================================================================

#[tokio::test]
async fn test_check_renewal_outcomes() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, recorder) = client_with(acme_config(&dir, &["example.com"]), &ca);

    let outcome = client.check_renewal().await.unwrap();
    assert!(matches!(outcome, RenewalOutcome::Obtained(_)));
    assert_eq!(recorder.renewed.load(Ordering::SeqCst), 0);

    let outcome = client.check_renewal().await.unwrap();
    assert_eq!(outcome, RenewalOutcome::Skipped { days_left: 90 });
    assert_eq!(ca.orders.load(Ordering::SeqCst), 1);

    // Replace the stored certificate with one inside the 30 day threshold.
    ca.validity_days.store(30, Ordering::SeqCst);
    client.obtain_certificates().await.unwrap();
    ca.validity_days.store(90, Ordering::SeqCst);

    let outcome = client.check_renewal().await.unwrap();
    assert!(matches!(outcome, RenewalOutcome::Renewed(_)));
    assert_eq!(recorder.renewed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.obtained.lock().len(), 3);
    assert_eq!(client.certificate_info().unwrap().days_until_expiration, 90);
}

#[tokio::test]
async fn test_renew_emits_obtained_then_renewed() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, recorder) = client_with(acme_config(&dir, &["example.com"]), &ca);

    let paths = client.renew_certificates().await.unwrap();

    assert_eq!(recorder.obtained.lock().as_slice(), &[paths]);
    assert_eq!(recorder.renewed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_renewal_skips_renewed_event() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    ca.fail_validation.store(true, Ordering::SeqCst);
    let (client, recorder) = client_with(acme_config(&dir, &["example.com"]), &ca);

    assert!(client.renew_certificates().await.is_err());
    assert_eq!(recorder.renewed.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.errors.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_renewal_start_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, _) = client_with(acme_config(&dir, &["example.com"]), &ca);

    assert!(client.start_auto_renewal());
    assert!(!client.start_auto_renewal());
    assert!(client.is_auto_renewing());

    // The first check runs immediately and obtains the missing certificate.
    for _ in 0..100 {
        if client.storage().has_certificate() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.storage().has_certificate());
    assert_eq!(ca.orders.load(Ordering::SeqCst), 1);

    // The next check is a day away and finds nothing to do.
    tokio::time::sleep(client.config().renewal_check_interval() + Duration::from_secs(1)).await;
    assert_eq!(ca.orders.load(Ordering::SeqCst), 1);

    assert!(client.stop_auto_renewal());
    assert!(!client.stop_auto_renewal());
    assert!(!client.is_auto_renewing());
}

// ============================================================================
// Binding
// ============================================================================

struct NoopHandler;

#[async_trait]
impl ConnectionHandler for NoopHandler {
    async fn handle(&self, _stream: TlsStream<TcpStream>, _peer: SocketAddr) {}
}

#[derive(Default)]
struct FakeServer {
    tls: Mutex<Option<TlsFiles>>,
    reloads: AtomicUsize,
    failed_reloads: AtomicUsize,
    shutdowns: AtomicUsize,
}

#[async_trait]
impl ManagedServer for FakeServer {
    fn local_addr(&self) -> SocketAddr {
        "127.0.0.1:8443".parse().unwrap()
    }

    async fn reload(&self) -> Result<(), ServerError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        let tls = self.tls.lock().clone();
        if let Some(tls) = tls {
            if let Err(e) = load_bundle(&tls) {
                self.failed_reloads.fetch_add(1, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingAdapter {
    server: Arc<FakeServer>,
    configs: Mutex<Vec<ServerConfig>>,
}

#[async_trait]
impl ServerAdapter for RecordingAdapter {
    fn framework(&self) -> &str {
        "recording"
    }

    async fn serve(
        &self,
        config: ServerConfig,
        _handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Arc<dyn ManagedServer>, ServerError> {
        *self.server.tls.lock() = Some(config.tls.clone());
        self.configs.lock().push(config);
        Ok(self.server.clone())
    }
}

fn registry_with(adapter: &Arc<RecordingAdapter>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::default();
    registry.register(adapter.clone());
    registry
}

#[tokio::test]
async fn test_unknown_framework_issues_nothing() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, _) = client_with(acme_config(&dir, &["example.com"]), &ca);

    let err = bind_with_client(
        client,
        ListenerConfig::default(),
        Arc::new(NoopHandler),
        "koa",
        &AdapterRegistry::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ServerError::UnsupportedFramework(ref tag) if tag == "koa"));
    assert_eq!(ca.sessions.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("cert.pem").exists());
}

#[tokio::test]
async fn test_bind_serves_issued_files_and_reloads_on_renewal() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, _) = client_with(acme_config(&dir, &["example.com"]), &ca);
    let adapter = Arc::new(RecordingAdapter::default());

    let server = bind_with_client(
        client,
        ListenerConfig::default(),
        Arc::new(NoopHandler),
        "Recording",
        &registry_with(&adapter),
    )
    .await
    .unwrap();

    {
        let configs = adapter.configs.lock();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].tls.cert_path, dir.path().join("cert.pem"));
        assert_eq!(configs[0].tls.key_path, dir.path().join("key.pem"));
        assert_eq!(configs[0].tls.ca_path, None);
    }
    assert!(!server.client.is_auto_renewing());
    assert_eq!(server.certificate_info().unwrap().days_until_expiration, 90);

    server.renew_certificates().await.unwrap();
    for _ in 0..50 {
        if adapter.server.reloads.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(adapter.server.reloads.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.server.failed_reloads.load(Ordering::SeqCst), 0);

    server.shutdown().await;
    assert_eq!(adapter.server.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reload_survives_chain_losing_its_ca_blocks() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let (client, _) = client_with(acme_config(&dir, &["example.com"]), &ca);
    let adapter = Arc::new(RecordingAdapter::default());

    let server = bind_with_client(
        client,
        ListenerConfig::default(),
        Arc::new(NoopHandler),
        "recording",
        &registry_with(&adapter),
    )
    .await
    .unwrap();
    assert!(dir.path().join("ca.pem").exists());

    ca.with_root.store(false, Ordering::SeqCst);
    server.renew_certificates().await.unwrap();
    assert!(!dir.path().join("ca.pem").exists());

    for _ in 0..50 {
        if adapter.server.reloads.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(adapter.server.reloads.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.server.failed_reloads.load(Ordering::SeqCst), 0);

    adapter.server.reload().await.unwrap();
    let tls = adapter.configs.lock()[0].tls.clone();
    let bundle = load_bundle(&tls).unwrap();
    assert_eq!(bundle.certificate_pem().matches("BEGIN CERTIFICATE").count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_bind_with_watch_leaves_reload_to_watcher() {
    let dir = TempDir::new().unwrap();
    let ca = MockCa::new(dir.path(), vec![AcmeChallengeType::Http01]);
    let mut config = acme_config(&dir, &["example.com"]);
    config.auto_renew = true;
    let (client, _) = client_with(config, &ca);
    let adapter = Arc::new(RecordingAdapter::default());

    let listener = ListenerConfig {
        watch: true,
        ..ListenerConfig::default()
    };
    let server = bind_with_client(
        client,
        listener,
        Arc::new(NoopHandler),
        "recording",
        &registry_with(&adapter),
    )
    .await
    .unwrap();

    assert!(server.client.is_auto_renewing());

    server.renew_certificates().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(adapter.server.reloads.load(Ordering::SeqCst), 0);

    server.shutdown().await;
    assert!(!server.client.is_auto_renewing());
}
