use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};

use procurex_core::{PurchaseOrderId, TenantId, VendorId};
use procurex_correlation::{
    CorrelationRequest, Evidence, ExternalKey, OpenOrderSummary,
};
use procurex_infra::{ReconciliationService, ServiceConfig};
use procurex_matching::{
    InvoiceDocument, InvoiceLine, OrderLine, PurchaseOrderLines, ReceiptLine, ShipmentReceipt,
};

struct Fixture {
    service: std::sync::Arc<ReconciliationService>,
    tenant: TenantId,
    vendor: VendorId,
    po: PurchaseOrderId,
}

fn fixture(lines: usize) -> Fixture {
    let service = ReconciliationService::new(ServiceConfig::default()).unwrap();
    let tenant = TenantId::new();
    let vendor = VendorId::new();
    let po = PurchaseOrderId::new();

    let order_lines: Vec<OrderLine> = (0..lines)
        .map(|i| OrderLine {
            sku: format!("SKU-{i}"),
            quantity: 100,
            unit_amount: 1_000,
        })
        .collect();
    let total: u64 = order_lines.iter().map(|l| l.quantity as u64 * l.unit_amount).sum();

    service.order_book().register_order(
        OpenOrderSummary {
            purchase_order_id: po,
            vendor_id: vendor,
            reference: "PO-BENCH".to_string(),
            total_amount: total,
            order_date: Utc::now() - Duration::days(5),
            expected_date: Some(Utc::now() + Duration::days(10)),
            next_follow_up_due: None,
            last_sent_at: Some(Utc::now() - Duration::days(1)),
        },
        PurchaseOrderLines {
            purchase_order_id: po,
            vendor_id: vendor,
            lines: order_lines.clone(),
            expected_date: Some(Utc::now() + Duration::days(10)),
        },
    );
    service.order_book().register_identifier(po, "1Z-BENCH");

    let key = ExternalKey::tracking("1Z-BENCH");
    service
        .register_receipt(
            key.clone(),
            ShipmentReceipt {
                receipt_id: "rcpt-bench".to_string(),
                tenant_id: tenant,
                declared_reference: None,
                vendor_id: vendor,
                lines: order_lines
                    .iter()
                    .map(|l| ReceiptLine {
                        sku: l.sku.clone(),
                        quantity: l.quantity,
                    })
                    .collect(),
                received_at: Utc::now(),
            },
        )
        .unwrap();
    service
        .ingest_external_event(CorrelationRequest {
            tenant_id: tenant,
            external_key: key,
            evidence: Evidence::Tracking {
                carrier: "ups".to_string(),
                status: "delivered".to_string(),
                vendor_hint: None,
            },
            raw_payload_ref: "events/bench".to_string(),
            observed_at: Utc::now(),
        })
        .unwrap();

    let invoice_key = ExternalKey::invoice_document("doc-bench");
    service
        .register_invoice(
            invoice_key.clone(),
            InvoiceDocument {
                invoice_id: "doc-bench".to_string(),
                tenant_id: tenant,
                declared_reference: Some("PO-BENCH".to_string()),
                vendor_id: vendor,
                lines: order_lines
                    .iter()
                    .map(|l| InvoiceLine {
                        sku: l.sku.clone(),
                        quantity: l.quantity,
                        unit_amount: 1_050,
                    })
                    .collect(),
                total_amount: order_lines.len() as u64 * 100 * 1_050,
                issued_at: Utc::now(),
            },
        )
        .unwrap();
    service
        .ingest_external_event(CorrelationRequest {
            tenant_id: tenant,
            external_key: invoice_key,
            evidence: Evidence::Invoice {
                declared_reference: Some("PO-BENCH".to_string()),
                vendor_hint: Some(vendor),
                amount_hint: None,
                date_hint: None,
            },
            raw_payload_ref: "docs/bench".to_string(),
            observed_at: Utc::now(),
        })
        .unwrap();

    Fixture {
        service,
        tenant,
        vendor,
        po,
    }
}

fn bench_match_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_recompute");
    for lines in [1usize, 10, 100] {
        let f = fixture(lines);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, _| {
            b.iter(|| {
                let result = f
                    .service
                    .recompute_match(black_box(f.tenant), black_box(f.po))
                    .unwrap();
                black_box(result.overall_score)
            })
        });
    }
    group.finish();
}

fn bench_correlate_exact(c: &mut Criterion) {
    let f = fixture(10);
    c.bench_function("correlate_exact_identifier", |b| {
        b.iter(|| {
            let outcome = f
                .service
                .ingest_external_event(CorrelationRequest {
                    tenant_id: f.tenant,
                    external_key: ExternalKey::tracking("1Z-BENCH"),
                    evidence: Evidence::Tracking {
                        carrier: "ups".to_string(),
                        status: "delivered".to_string(),
                        vendor_hint: Some(f.vendor),
                    },
                    raw_payload_ref: "events/bench-loop".to_string(),
                    observed_at: Utc::now(),
                })
                .unwrap();
            black_box(outcome)
        })
    });
}

fn bench_vendor_recalculation(c: &mut Criterion) {
    let f = fixture(10);
    f.service.recompute_match(f.tenant, f.po).unwrap();
    c.bench_function("vendor_score_recalculation", |b| {
        b.iter(|| {
            let profile = f
                .service
                .recalculate_vendor(black_box(f.tenant), black_box(f.vendor), "bench")
                .unwrap();
            black_box(profile.confidence_score)
        })
    });
}

criterion_group!(
    benches,
    bench_match_recompute,
    bench_correlate_exact,
    bench_vendor_recalculation
);
criterion_main!(benches);
