//! End-to-end tests through the gRPC and HTTP surfaces.

mod common;

use common::{spawn_app, with_tenant};
use invoice_chain_service::grpc::proto::{
    CreateCreditNoteRequest, CreateInvoiceRequest, DocumentType, ExportLedgerRequest,
    GetInvoiceRequest, LedgerFormat, ListChainRequest, PaymentStatus, UpdatePaymentStatusRequest,
    ValidateChainRequest,
};
use prost_types::Timestamp;
use tonic::Code;
use uuid::Uuid;

fn create_request(taxable_base: &str) -> CreateInvoiceRequest {
    CreateInvoiceRequest {
        order_id: Uuid::new_v4().to_string(),
        client_id: Uuid::new_v4().to_string(),
        client_name: "Bicicletas Rivera".to_string(),
        client_tax_id: "B99887766".to_string(),
        taxable_base: taxable_base.to_string(),
        tax_rate: "21".to_string(),
        series: "001".to_string(),
        fiscal_year: 0,
        // 2025-03-14T10:30:00Z
        issue_date: Some(Timestamp {
            seconds: 1_741_948_200,
            nanos: 0,
        }),
    }
}

#[tokio::test]
async fn test_create_invoice_assigns_sequence_and_hash() {
    let mut app = spawn_app().await;

    let first = app
        .grpc_client
        .create_invoice(with_tenant(create_request("100.00"), &app.tenant_id))
        .await
        .expect("Failed to create invoice")
        .into_inner();
    let second = app
        .grpc_client
        .create_invoice(with_tenant(create_request("100.00"), &app.tenant_id))
        .await
        .expect("Failed to create invoice")
        .into_inner();

    assert_eq!(first.sequence_number, "FAC-2025-001-00000001");
    assert_eq!(second.sequence_number, "FAC-2025-001-00000002");

    let first_invoice = first.invoice.unwrap();
    let second_invoice = second.invoice.unwrap();
    assert_eq!(first_invoice.previous_hash, "");
    assert_eq!(second_invoice.previous_hash, first.current_hash);
    assert_eq!(first_invoice.tax_amount, "21.00");
    assert_eq!(first_invoice.total, "121.00");
    assert_eq!(first_invoice.hash_version, 1);
    assert_eq!(first_invoice.payment_status, PaymentStatus::Pending as i32);
    assert_eq!(first_invoice.document_type, DocumentType::Invoice as i32);
}

#[tokio::test]
async fn test_missing_tenant_is_unauthenticated() {
    let mut app = spawn_app().await;

    let status = app
        .grpc_client
        .create_invoice(tonic::Request::new(create_request("100.00")))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn test_invalid_draft_is_invalid_argument() {
    let mut app = spawn_app().await;

    let status = app
        .grpc_client
        .create_invoice(with_tenant(create_request("12.345"), &app.tenant_id))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = app
        .grpc_client
        .create_invoice(with_tenant(create_request("abc"), &app.tenant_id))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = app
        .grpc_client
        .create_invoice(with_tenant(
            create_request("79228162514264337593543950335"),
            &app.tenant_id,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    // The handler survived; the service still issues from counter 1.
    let created = app
        .grpc_client
        .create_invoice(with_tenant(create_request("100.00"), &app.tenant_id))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(created.sequence_number, "FAC-2025-001-00000001");
}

#[tokio::test]
async fn test_get_invoice_is_tenant_scoped() {
    let mut app = spawn_app().await;

    let created = app
        .grpc_client
        .create_invoice(with_tenant(create_request("50.00"), &app.tenant_id))
        .await
        .unwrap()
        .into_inner();

    let fetched = app
        .grpc_client
        .get_invoice(with_tenant(
            GetInvoiceRequest {
                invoice_id: created.invoice_id.clone(),
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner()
        .invoice
        .unwrap();
    assert_eq!(fetched.current_hash, created.current_hash);
    assert_eq!(fetched.client_tax_id, "B99887766");

    let status = app
        .grpc_client
        .get_invoice(with_tenant(
            GetInvoiceRequest {
                invoice_id: created.invoice_id,
            },
            &Uuid::new_v4(),
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn test_credit_note_and_listing() {
    let mut app = spawn_app().await;

    let invoice = app
        .grpc_client
        .create_invoice(with_tenant(create_request("80.00"), &app.tenant_id))
        .await
        .unwrap()
        .into_inner();

    let credit_note = app
        .grpc_client
        .create_credit_note(with_tenant(
            CreateCreditNoteRequest {
                reference_invoice_id: invoice.invoice_id.clone(),
                taxable_base: "-80.00".to_string(),
                tax_rate: String::new(),
                series: "R01".to_string(),
                issue_date: Some(Timestamp {
                    seconds: 1_741_948_200,
                    nanos: 0,
                }),
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(credit_note.sequence_number, "RCT-2025-R01-00000001");
    let note = credit_note.invoice.unwrap();
    assert_eq!(note.reference_invoice_id, invoice.invoice_id);
    assert_eq!(note.total, "-96.80");

    let all = app
        .grpc_client
        .list_chain(with_tenant(
            ListChainRequest {
                fiscal_year: 2025,
                series: String::new(),
                document_type: DocumentType::Unspecified as i32,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(all.invoices.len(), 2);

    let credit_notes = app
        .grpc_client
        .list_chain(with_tenant(
            ListChainRequest {
                fiscal_year: 2025,
                series: String::new(),
                document_type: DocumentType::CreditNote as i32,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(credit_notes.invoices.len(), 1);
    assert_eq!(credit_notes.invoices[0].sequence_number, "RCT-2025-R01-00000001");

    let status = app
        .grpc_client
        .create_credit_note(with_tenant(
            CreateCreditNoteRequest {
                reference_invoice_id: Uuid::new_v4().to_string(),
                taxable_base: "-1.00".to_string(),
                tax_rate: String::new(),
                series: "R01".to_string(),
                issue_date: None,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn test_payment_status_update_keeps_hash() {
    let mut app = spawn_app().await;

    let created = app
        .grpc_client
        .create_invoice(with_tenant(create_request("10.00"), &app.tenant_id))
        .await
        .unwrap()
        .into_inner();

    let updated = app
        .grpc_client
        .update_payment_status(with_tenant(
            UpdatePaymentStatusRequest {
                invoice_id: created.invoice_id.clone(),
                payment_status: PaymentStatus::Paid as i32,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner()
        .invoice
        .unwrap();

    assert_eq!(updated.payment_status, PaymentStatus::Paid as i32);
    assert_eq!(updated.current_hash, created.current_hash);

    let status = app
        .grpc_client
        .update_payment_status(with_tenant(
            UpdatePaymentStatusRequest {
                invoice_id: created.invoice_id,
                payment_status: PaymentStatus::Unspecified as i32,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_validate_and_export_ledger() {
    let mut app = spawn_app().await;

    for _ in 0..3 {
        app.grpc_client
            .create_invoice(with_tenant(create_request("100.00"), &app.tenant_id))
            .await
            .unwrap();
    }

    let report = app
        .grpc_client
        .validate_chain(with_tenant(
            ValidateChainRequest {
                fiscal_year: 2025,
                series: "001".to_string(),
                full_verification: true,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(report.valid);
    assert_eq!(report.total_invoices, 3);
    assert!(report.errors.is_empty());

    let empty = app
        .grpc_client
        .validate_chain(with_tenant(
            ValidateChainRequest {
                fiscal_year: 2025,
                series: "999".to_string(),
                full_verification: false,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(empty.valid);
    assert_eq!(empty.total_invoices, 0);

    let export = app
        .grpc_client
        .export_ledger(with_tenant(
            ExportLedgerRequest {
                fiscal_year: 2025,
                format: LedgerFormat::Csv as i32,
            },
            &app.tenant_id,
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(export.row_count, 3);
    assert_eq!(export.content.lines().count(), 4);
}

#[tokio::test]
async fn test_http_ledger_and_health() {
    let mut app = spawn_app().await;

    app.grpc_client
        .create_invoice(with_tenant(create_request("100.00"), &app.tenant_id))
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", app.http_port);

    let health = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());

    let metrics = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("http_requests_total"));
    assert!(metrics.contains("invoice_chain_grpc_requests_total"));

    let ledger = client
        .get(format!("{}/ledger/2025?format=csv", base))
        .header("x-tenant-id", app.tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert!(ledger.status().is_success());
    let body = ledger.text().await.unwrap();
    assert_eq!(body.lines().count(), 2);
    assert!(body.starts_with("sequenceNumber;issueDate;"));

    let json = client
        .get(format!("{}/ledger/2025?format=json", base))
        .header("x-tenant-id", app.tenant_id.to_string())
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(json[0]["sequenceNumber"], "FAC-2025-001-00000001");

    let missing_tenant = client
        .get(format!("{}/ledger/2025", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_tenant.status().as_u16(), 401);

    let bad_format = client
        .get(format!("{}/ledger/2025?format=xml", base))
        .header("x-tenant-id", app.tenant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(bad_format.status().as_u16(), 400);
}
