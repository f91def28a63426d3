//! InvoicingService gRPC implementation.

use crate::chain::hasher::format_money;
use crate::chain::{
    ChainAnomaly, ChainBuilder, ChainValidator, LedgerExporter, LedgerFormat, VerificationMode,
};
use crate::grpc::proto::{
    invoicing_service_server::InvoicingService, ChainAnomaly as ProtoChainAnomaly,
    CreateCreditNoteRequest, CreateCreditNoteResponse, CreateInvoiceRequest,
    CreateInvoiceResponse, ExportLedgerRequest, ExportLedgerResponse, GetInvoiceRequest,
    GetInvoiceResponse, Invoice as ProtoInvoice, ListChainRequest, ListChainResponse,
    UpdatePaymentStatusRequest, UpdatePaymentStatusResponse, ValidateChainRequest,
    ValidateChainResponse,
};
use crate::models::{CreditNoteDraft, DocumentType, Invoice, InvoiceDraft, PaymentStatus};
use crate::services::metrics::record_grpc_request;
use crate::services::{ChainFilter, InvoiceStore};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use service_core::grpc::extract_tenant_id;
use service_core::retry::RetryConfig;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Code, Request, Response, Status};
use tracing::{instrument, Span};
use uuid::Uuid;

#[allow(clippy::result_large_err)]
fn parse_uuid(field: &str, value: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value).map_err(|_| Status::invalid_argument(format!("Invalid {} format", field)))
}

#[allow(clippy::result_large_err)]
fn parse_optional_uuid(field: &str, value: &str) -> Result<Option<Uuid>, Status> {
    if value.is_empty() {
        Ok(None)
    } else {
        parse_uuid(field, value).map(Some)
    }
}

#[allow(clippy::result_large_err)]
fn parse_decimal(field: &str, value: &str) -> Result<Decimal, Status> {
    Decimal::from_str(value.trim())
        .map_err(|_| Status::invalid_argument(format!("Invalid {} amount", field)))
}

#[allow(clippy::result_large_err)]
fn parse_fiscal_year(value: i32) -> Result<i32, Status> {
    if value <= 0 {
        return Err(Status::invalid_argument("fiscal_year is required"));
    }
    Ok(value)
}

#[allow(clippy::result_large_err)]
fn parse_timestamp(value: Option<Timestamp>) -> Result<Option<DateTime<Utc>>, Status> {
    value
        .map(|ts| {
            u32::try_from(ts.nanos)
                .ok()
                .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
                .ok_or_else(|| Status::invalid_argument("Invalid issue_date timestamp"))
        })
        .transpose()
}

fn to_timestamp(ts: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: ts.timestamp(),
        nanos: ts.timestamp_subsec_nanos() as i32,
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn status_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::InvalidArgument => "invalid_argument",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::Aborted => "aborted",
        Code::Unauthenticated => "unauthenticated",
        Code::Unavailable => "unavailable",
        _ => "internal",
    }
}

/// Convert domain Invoice to proto Invoice.
fn invoice_to_proto(invoice: &Invoice) -> ProtoInvoice {
    ProtoInvoice {
        invoice_id: invoice.invoice_id.to_string(),
        tenant_id: invoice.tenant_id.to_string(),
        document_type: invoice.document_type().to_proto(),
        sequence_number: invoice.sequence_number.clone(),
        fiscal_year: invoice.fiscal_year,
        series: invoice.series.clone(),
        counter: invoice.counter,
        issue_date: Some(to_timestamp(invoice.issue_date)),
        client_id: invoice.client_id.to_string(),
        client_name: invoice.client_name.clone(),
        client_tax_id: invoice.client_tax_id.clone().unwrap_or_default(),
        order_id: invoice.order_id.map(|id| id.to_string()).unwrap_or_default(),
        reference_invoice_id: invoice
            .reference_invoice_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        taxable_base: format_money(invoice.taxable_base),
        tax_rate: format_money(invoice.tax_rate),
        tax_amount: format_money(invoice.tax_amount),
        total: format_money(invoice.total),
        previous_hash: invoice.previous_hash.clone(),
        current_hash: invoice.current_hash.clone(),
        hash_version: i32::from(invoice.hash_version),
        payment_status: invoice.payment_status().to_proto(),
        created_at: Some(to_timestamp(invoice.created_utc)),
    }
}

fn anomaly_to_proto(anomaly: &ChainAnomaly) -> ProtoChainAnomaly {
    ProtoChainAnomaly {
        sequence_number: anomaly.sequence_number.clone(),
        expected_hash: anomaly.expected_hash.clone(),
        actual_hash: anomaly.actual_hash.clone(),
        kind: anomaly.kind.to_proto(),
    }
}

/// InvoicingService implementation.
pub struct InvoicingServiceImpl {
    store: Arc<dyn InvoiceStore>,
    builder: ChainBuilder,
    validator: ChainValidator,
    exporter: LedgerExporter,
}

impl InvoicingServiceImpl {
    /// Create a new InvoicingService instance.
    pub fn new(store: Arc<dyn InvoiceStore>, retry: RetryConfig) -> Self {
        Self {
            builder: ChainBuilder::new(store.clone(), retry),
            validator: ChainValidator::new(store.clone()),
            exporter: LedgerExporter::new(store.clone()),
            store,
        }
    }

    /// Run a handler and record its outcome.
    async fn observed<T, F>(method: &'static str, handler: F) -> Result<Response<T>, Status>
    where
        F: Future<Output = Result<Response<T>, Status>>,
    {
        let start = Instant::now();
        let result = handler.await;
        let code = match &result {
            Ok(_) => Code::Ok,
            Err(status) => status.code(),
        };
        record_grpc_request(method, status_label(code), start.elapsed().as_secs_f64());
        result
    }

    #[allow(clippy::result_large_err)]
    fn tenant<T>(request: &Request<T>) -> Result<Uuid, Status> {
        let tenant_id = extract_tenant_id(request)?;
        Span::current().record("tenant_id", tenant_id.to_string());
        Ok(tenant_id)
    }
}

#[tonic::async_trait]
impl InvoicingService for InvoicingServiceImpl {
    #[instrument(skip(self, request), fields(tenant_id))]
    async fn create_invoice(
        &self,
        request: Request<CreateInvoiceRequest>,
    ) -> Result<Response<CreateInvoiceResponse>, Status> {
        Self::observed("CreateInvoice", async {
            let tenant_id = Self::tenant(&request)?;
            let req = request.into_inner();

            let draft = InvoiceDraft {
                tenant_id,
                document_type: DocumentType::Invoice,
                series: req.series,
                fiscal_year: if req.fiscal_year == 0 {
                    None
                } else {
                    Some(req.fiscal_year)
                },
                issue_date: parse_timestamp(req.issue_date)?,
                client_id: parse_uuid("client_id", &req.client_id)?,
                client_name: req.client_name,
                client_tax_id: non_empty(req.client_tax_id),
                order_id: parse_optional_uuid("order_id", &req.order_id)?,
                reference_invoice_id: None,
                taxable_base: parse_decimal("taxable_base", &req.taxable_base)?,
                tax_rate: parse_decimal("tax_rate", &req.tax_rate)?,
            };

            let invoice = self.builder.create_invoice(draft).await?;

            Ok::<_, Status>(Response::new(CreateInvoiceResponse {
                invoice_id: invoice.invoice_id.to_string(),
                sequence_number: invoice.sequence_number.clone(),
                current_hash: invoice.current_hash.clone(),
                invoice: Some(invoice_to_proto(&invoice)),
            }))
        })
        .await
    }

    #[instrument(skip(self, request), fields(tenant_id))]
    async fn create_credit_note(
        &self,
        request: Request<CreateCreditNoteRequest>,
    ) -> Result<Response<CreateCreditNoteResponse>, Status> {
        Self::observed("CreateCreditNote", async {
            let tenant_id = Self::tenant(&request)?;
            let req = request.into_inner();

            let tax_rate = if req.tax_rate.trim().is_empty() {
                None
            } else {
                Some(parse_decimal("tax_rate", &req.tax_rate)?)
            };

            let draft = CreditNoteDraft {
                tenant_id,
                reference_invoice_id: parse_uuid("reference_invoice_id", &req.reference_invoice_id)?,
                series: req.series,
                taxable_base: parse_decimal("taxable_base", &req.taxable_base)?,
                tax_rate,
                issue_date: parse_timestamp(req.issue_date)?,
            };

            let credit_note = self.builder.create_credit_note(draft).await?;

            Ok::<_, Status>(Response::new(CreateCreditNoteResponse {
                invoice_id: credit_note.invoice_id.to_string(),
                sequence_number: credit_note.sequence_number.clone(),
                current_hash: credit_note.current_hash.clone(),
                invoice: Some(invoice_to_proto(&credit_note)),
            }))
        })
        .await
    }

    #[instrument(skip(self, request), fields(tenant_id))]
    async fn get_invoice(
        &self,
        request: Request<GetInvoiceRequest>,
    ) -> Result<Response<GetInvoiceResponse>, Status> {
        Self::observed("GetInvoice", async {
            let tenant_id = Self::tenant(&request)?;
            let invoice_id = parse_uuid("invoice_id", &request.get_ref().invoice_id)?;

            let invoice = self
                .store
                .get_invoice(tenant_id, invoice_id)
                .await?
                .ok_or_else(|| Status::not_found("Invoice not found"))?;

            Ok::<_, Status>(Response::new(GetInvoiceResponse {
                invoice: Some(invoice_to_proto(&invoice)),
            }))
        })
        .await
    }

    #[instrument(skip(self, request), fields(tenant_id))]
    async fn list_chain(
        &self,
        request: Request<ListChainRequest>,
    ) -> Result<Response<ListChainResponse>, Status> {
        Self::observed("ListChain", async {
            let tenant_id = Self::tenant(&request)?;
            let req = request.into_inner();
            let fiscal_year = parse_fiscal_year(req.fiscal_year)?;

            let filter = ChainFilter {
                series: non_empty(req.series),
                document_type: DocumentType::from_proto(req.document_type),
            };
            let invoices = self
                .store
                .list_chain_invoices(tenant_id, fiscal_year, &filter)
                .await?;

            Ok::<_, Status>(Response::new(ListChainResponse {
                invoices: invoices.iter().map(invoice_to_proto).collect(),
            }))
        })
        .await
    }

    #[instrument(skip(self, request), fields(tenant_id))]
    async fn update_payment_status(
        &self,
        request: Request<UpdatePaymentStatusRequest>,
    ) -> Result<Response<UpdatePaymentStatusResponse>, Status> {
        Self::observed("UpdatePaymentStatus", async {
            let tenant_id = Self::tenant(&request)?;
            let req = request.into_inner();
            let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;
            let status = PaymentStatus::from_proto(req.payment_status)
                .ok_or_else(|| Status::invalid_argument("payment_status is required"))?;

            let invoice = self
                .store
                .update_payment_status(tenant_id, invoice_id, status)
                .await?
                .ok_or_else(|| Status::not_found("Invoice not found"))?;

            tracing::info!(
                sequence_number = %invoice.sequence_number,
                payment_status = %status,
                "Payment status updated"
            );

            Ok::<_, Status>(Response::new(UpdatePaymentStatusResponse {
                invoice: Some(invoice_to_proto(&invoice)),
            }))
        })
        .await
    }

    #[instrument(skip(self, request), fields(tenant_id))]
    async fn validate_chain(
        &self,
        request: Request<ValidateChainRequest>,
    ) -> Result<Response<ValidateChainResponse>, Status> {
        Self::observed("ValidateChain", async {
            let tenant_id = Self::tenant(&request)?;
            let req = request.into_inner();
            let fiscal_year = parse_fiscal_year(req.fiscal_year)?;
            let mode = if req.full_verification {
                VerificationMode::Full
            } else {
                VerificationMode::Linkage
            };

            let report = self
                .validator
                .validate(
                    tenant_id,
                    fiscal_year,
                    non_empty(req.series).as_deref(),
                    mode,
                )
                .await?;

            Ok::<_, Status>(Response::new(ValidateChainResponse {
                valid: report.valid,
                total_invoices: i32::try_from(report.total_invoices).unwrap_or(i32::MAX),
                errors: report.errors.iter().map(anomaly_to_proto).collect(),
            }))
        })
        .await
    }

    #[instrument(skip(self, request), fields(tenant_id))]
    async fn export_ledger(
        &self,
        request: Request<ExportLedgerRequest>,
    ) -> Result<Response<ExportLedgerResponse>, Status> {
        Self::observed("ExportLedger", async {
            let tenant_id = Self::tenant(&request)?;
            let req = request.into_inner();
            let fiscal_year = parse_fiscal_year(req.fiscal_year)?;

            let export = self
                .exporter
                .export(tenant_id, fiscal_year, LedgerFormat::from_proto(req.format))
                .await?;

            Ok::<_, Status>(Response::new(ExportLedgerResponse {
                content: export.content,
                content_type: export.content_type.to_string(),
                row_count: i32::try_from(export.row_count).unwrap_or(i32::MAX),
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_convert_both_ways() {
        let ts = Timestamp {
            seconds: 1_741_948_200,
            nanos: 0,
        };
        let parsed = parse_timestamp(Some(ts)).unwrap().unwrap();
        assert_eq!(to_timestamp(parsed).seconds, 1_741_948_200);
        assert!(parse_timestamp(None).unwrap().is_none());
    }

    #[test]
    fn negative_nanos_are_rejected() {
        let ts = Timestamp {
            seconds: 0,
            nanos: -1,
        };
        assert_eq!(
            parse_timestamp(Some(ts)).unwrap_err().code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn malformed_amounts_are_invalid_arguments() {
        assert_eq!(
            parse_decimal("taxable_base", "12,50").unwrap_err().code(),
            Code::InvalidArgument
        );
        assert_eq!(
            parse_decimal("taxable_base", " 12.50 ").unwrap(),
            Decimal::new(1250, 2)
        );
    }

    #[test]
    fn fiscal_year_is_required() {
        assert!(parse_fiscal_year(0).is_err());
        assert_eq!(parse_fiscal_year(2025).unwrap(), 2025);
    }
}
