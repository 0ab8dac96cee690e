//! End-to-end flow over stub transport: two statement files fetched
//! through the bounded pool, parsed, loaded into the primary store and
//! migrated into the warehouse, then the whole flow re-run to show
//! nothing duplicates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use fpp_core::{DateRange, FundKind, PositionCategory, ReportFile, ReportKind};
use fpp_parsers::{parse_report, RawReport};
use fpp_portal::{BackoffPolicy, FetchError, FetchOrchestrator, ReportFetcher};
use fpp_store::{LoadBatch, LoadEngine, MigrationEngine, PrimaryStore, Warehouse};

fn statement(date: &str, nav: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:semt.003.001.09">
  <SctiesBalAcctgRpt>
    <StmtGnlDtls><StmtDtTm><Dt>{date}</Dt></StmtDtTm></StmtGnlDtls>
    <AcctBaseCcyTtlAmts><TtlHldgsValOfStmt><Amt>{nav}</Amt></TtlHldgsValOfStmt></AcctBaseCcyTtlAmts>
    <SubAcctDtls>
      <BalForSubAcct>
        <FinInstrmId>
          <OthrId><Id>CASH</Id><Tp><Prtry>NIVEL 1</Prtry></Tp></OthrId>
          <Desc>Conta corrente</Desc>
        </FinInstrmId>
        <AcctBaseCcyAmts><HldgVal><Amt>50000.00</Amt></HldgVal></AcctBaseCcyAmts>
      </BalForSubAcct>
    </SubAcctDtls>
  </SctiesBalAcctgRpt>
</Document>"#
    )
}

struct MapFetcher {
    payloads: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl ReportFetcher for MapFetcher {
    async fn fetch(&self, file: &ReportFile) -> Result<Vec<u8>, FetchError> {
        self.payloads
            .get(&file.remote_id)
            .cloned()
            .ok_or(FetchError::Denied {
                status: 404,
                url: format!("stub://{}", file.remote_id),
                detail: "não encontrado".into(),
            })
    }
}

fn report_file(remote_id: &str, fund_local_id: i64, date: NaiveDate) -> ReportFile {
    ReportFile {
        remote_id: remote_id.to_string(),
        fund_remote_id: "f-1".into(),
        fund_local_id,
        kind: ReportKind::XmlCurrent,
        reference_date: date,
        file_name: format!("{}.{:02} - Carteira XML - FIP Teste.xml", date.format("%d"), 3),
        byte_size: None,
    }
}

async fn run_flow(
    fetcher: Arc<dyn ReportFetcher>,
    files: Vec<ReportFile>,
    engine: &LoadEngine,
) -> usize {
    let orchestrator = FetchOrchestrator::new(
        10,
        BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        },
    );
    let (downloaded, failures) = orchestrator.run(files, fetcher).await.downloaded();
    assert!(failures.is_empty());

    let mut batch = LoadBatch::default();
    for fetched in &downloaded {
        let parsed = parse_report(&RawReport {
            file_name: fetched.file.file_name.clone(),
            fund_local_id: fetched.file.fund_local_id,
            bytes: fetched.bytes.clone(),
        })
        .unwrap();
        batch.records.extend(parsed.records);
        batch.snapshots.extend(parsed.snapshot);
    }
    let result = engine.load(batch).await;
    assert!(result.failures.is_empty());
    downloaded.len()
}

#[tokio::test]
async fn two_files_flow_into_the_warehouse_without_duplication() {
    let dir = tempfile::tempdir().unwrap();
    let primary = PrimaryStore::connect(dir.path().join("primary.db").to_str().unwrap())
        .await
        .unwrap();
    let warehouse = Warehouse::connect(dir.path().join("warehouse.db").to_str().unwrap())
        .await
        .unwrap();
    let fund = primary
        .ensure_fund("f-1", "FIP Teste", "00.000.000/0001-00", FundKind::Fip)
        .await
        .unwrap();

    let d1 = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
    let d2 = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
    let fetcher = Arc::new(MapFetcher {
        payloads: HashMap::from([
            ("a1".to_string(), statement("2025-03-03", "1500000.00").into_bytes()),
            ("a2".to_string(), statement("2025-03-04", "1510000.00").into_bytes()),
        ]),
    });
    let files = vec![report_file("a1", fund, d1), report_file("a2", fund, d2)];
    let engine = LoadEngine::new(primary.clone());

    let downloaded = run_flow(
        Arc::clone(&fetcher) as Arc<dyn ReportFetcher>,
        files.clone(),
        &engine,
    )
    .await;
    assert_eq!(downloaded, 2);
    assert_eq!(primary.position_count(PositionCategory::Cash).await.unwrap(), 2);
    assert_eq!(primary.snapshot_count().await.unwrap(), 2);

    let range = DateRange { start: d1, end: d2 };
    let migration = MigrationEngine::new(primary.clone(), warehouse.clone());
    migration.migrate_all(range).await.unwrap();
    assert_eq!(warehouse.row_count("pos_cash_2025").await.unwrap(), 2);
    assert_eq!(warehouse.row_count("pos_nav_2025").await.unwrap(), 2);

    // Second pass over the same portal contents: counts stay flat.
    run_flow(fetcher, files, &engine).await;
    migration.migrate_all(range).await.unwrap();
    assert_eq!(primary.position_count(PositionCategory::Cash).await.unwrap(), 2);
    assert_eq!(warehouse.row_count("pos_cash_2025").await.unwrap(), 2);
    assert_eq!(warehouse.row_count("pos_nav_2025").await.unwrap(), 2);
}
