//! Concurrent issuance on shared and independent chains.

mod common;

use common::{invoice_draft, test_chain};
use futures::future::join_all;
use invoice_chain_service::chain::{validate_chain, VerificationMode};
use invoice_chain_service::services::{ChainFilter, InvoiceStore};
use rust_decimal::Decimal;

const WRITERS: i64 = 50;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_get_gapless_numbers() {
    let chain = test_chain();

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let builder = chain.builder.clone();
        let draft = invoice_draft(chain.tenant_id, Decimal::new(1000 + i, 2), Decimal::from(21));
        handles.push(tokio::spawn(
            async move { builder.create_invoice(draft).await },
        ));
    }

    let mut counters: Vec<i64> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().counter)
        .collect();
    counters.sort_unstable();

    assert_eq!(counters, (1..=WRITERS).collect::<Vec<_>>());

    let invoices = chain
        .store
        .list_chain_invoices(chain.tenant_id, 2025, &ChainFilter::series("001"))
        .await
        .unwrap();
    assert_eq!(invoices.len() as i64, WRITERS);

    let report = validate_chain(&invoices, VerificationMode::Full);
    assert!(report.valid, "anomalies: {:?}", report.errors);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_series_proceed_in_parallel() {
    let chain = test_chain();

    let mut handles = Vec::new();
    for i in 0..20 {
        let builder = chain.builder.clone();
        let mut draft = invoice_draft(chain.tenant_id, Decimal::new(5000, 2), Decimal::from(10));
        draft.series = if i % 2 == 0 { "A" } else { "B" }.to_string();
        handles.push(tokio::spawn(
            async move { builder.create_invoice(draft).await },
        ));
    }

    for joined in join_all(handles).await {
        joined.unwrap().unwrap();
    }

    for series in ["A", "B"] {
        let invoices = chain
            .store
            .list_chain_invoices(chain.tenant_id, 2025, &ChainFilter::series(series))
            .await
            .unwrap();
        let counters: Vec<i64> = invoices.iter().map(|i| i.counter).collect();
        assert_eq!(counters, (1..=10).collect::<Vec<_>>());
    }

    let report = chain
        .validator
        .validate(chain.tenant_id, 2025, None, VerificationMode::Linkage)
        .await
        .unwrap();
    assert!(report.valid);
    assert_eq!(report.total_invoices, 20);
}
