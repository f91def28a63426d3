//! Common test utilities for invoice-chain-service integration tests.

use chrono::{DateTime, TimeZone, Utc};
use invoice_chain_service::chain::{ChainBuilder, ChainValidator, LedgerExporter};
use invoice_chain_service::config::InvoicingConfig;
use invoice_chain_service::grpc::proto::invoicing_service_client::InvoicingServiceClient;
use invoice_chain_service::models::{DocumentType, InvoiceDraft};
use invoice_chain_service::services::{InMemoryStore, InvoiceStore};
use invoice_chain_service::startup::Application;
use rust_decimal::Decimal;
use service_core::retry::RetryConfig;
use std::sync::{Arc, Once};
use std::time::Duration;
use tonic::transport::Channel;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,invoice_chain_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Chain services wired to one in-memory store.
#[allow(dead_code)]
pub struct TestChain {
    pub store: Arc<InMemoryStore>,
    pub builder: ChainBuilder,
    pub validator: ChainValidator,
    pub exporter: LedgerExporter,
    pub tenant_id: Uuid,
}

/// Fast retries so failure paths do not slow the suite down.
#[allow(dead_code)]
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        add_jitter: false,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn test_chain() -> TestChain {
    init_tracing();

    let store = Arc::new(InMemoryStore::new());
    let shared: Arc<dyn InvoiceStore> = store.clone();

    TestChain {
        builder: ChainBuilder::new(shared.clone(), fast_retry()),
        validator: ChainValidator::new(shared.clone()),
        exporter: LedgerExporter::new(shared),
        store,
        tenant_id: Uuid::new_v4(),
    }
}

/// A fixed issue date in fiscal year 2025.
#[allow(dead_code)]
pub fn issue_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap()
}

/// Invoice draft on series `001` dated in 2025.
#[allow(dead_code)]
pub fn invoice_draft(tenant_id: Uuid, taxable_base: Decimal, tax_rate: Decimal) -> InvoiceDraft {
    InvoiceDraft {
        tenant_id,
        document_type: DocumentType::Invoice,
        series: "001".to_string(),
        fiscal_year: None,
        issue_date: Some(issue_date()),
        client_id: Uuid::new_v4(),
        client_name: "Ciclos Norte SL".to_string(),
        client_tax_id: Some("B12345678".to_string()),
        order_id: Some(Uuid::new_v4()),
        reference_invoice_id: None,
        taxable_base,
        tax_rate,
    }
}

/// Test application wrapper.
#[allow(dead_code)]
pub struct TestApp {
    pub grpc_client: InvoicingServiceClient<Channel>,
    pub tenant_id: Uuid,
    pub http_port: u16,
    pub grpc_port: u16,
}

/// Spawn the application on ephemeral ports with an in-memory store and
/// return a connected gRPC client with a unique tenant ID.
#[allow(dead_code)]
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let app = Application::build(InvoicingConfig::for_tests())
        .await
        .expect("Failed to build application");

    let http_port = app.http_port();
    let grpc_port = app.grpc_port();
    let grpc_addr = format!("http://127.0.0.1:{}", grpc_port);

    // Start the application in the background
    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    // Wait for server to be ready with retry
    let grpc_client = {
        let mut attempts = 0;
        loop {
            match InvoicingServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        grpc_client,
        tenant_id: Uuid::new_v4(),
        http_port,
        grpc_port,
    }
}

/// Attach the tenant to a gRPC request.
#[allow(dead_code)]
pub fn with_tenant<T>(request: T, tenant_id: &Uuid) -> tonic::Request<T> {
    let mut req = tonic::Request::new(request);
    req.metadata_mut()
        .insert("x-tenant-id", tenant_id.to_string().parse().unwrap());
    req
}
