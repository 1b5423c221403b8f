use common::warehouse::{Query, SqliteWarehouse, Warehouse, WarehouseClient};
use metrics_exporter_prometheus::PrometheusBuilder;

#[test]
fn asyncdb_call_named_records_latency_and_errors() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    let rt = tokio::runtime::Runtime::new().unwrap();
    metrics::with_local_recorder(&recorder, || {
        rt.block_on(async {
            let tmp = tempfile::NamedTempFile::new().unwrap();
            let db = common::db::AsyncDb::open(tmp.path().to_str().unwrap())
                .await
                .unwrap();

            let v: i64 = db.call_named("test.ok", |_conn| Ok(1)).await.unwrap();
            assert_eq!(v, 1);

            let err: anyhow::Result<()> = db
                .call_named("test.err", |conn| {
                    let _ = conn.execute("SELECT * FROM definitely_missing_table", [])?;
                    Ok(())
                })
                .await;
            assert!(err.is_err());
        });
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("transfers_db_query_latency_ms"),
        "expected transfers_db_query_latency_ms in rendered metrics, got:\n{rendered}"
    );
    assert!(
        rendered.contains("transfers_db_query_errors_total"),
        "expected transfers_db_query_errors_total in rendered metrics, got:\n{rendered}"
    );
}

#[test]
fn warehouse_client_records_backend_latency_and_error_kind() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    let rt = tokio::runtime::Runtime::new().unwrap();
    metrics::with_local_recorder(&recorder, || {
        rt.block_on(async {
            let client = WarehouseClient::Sqlite(SqliteWarehouse::open(":memory:").await.unwrap());

            let ok = client
                .execute(&Query::new("SELECT COUNT(*) AS n FROM fact_transfers", vec![]))
                .await
                .unwrap();
            assert_eq!(ok.rows[0][0].as_i64(), Some(0));

            let err = client
                .execute(&Query::new("SELECT * FROM fact_nothing", vec![]))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "query");
        });
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("transfers_warehouse_query_latency_ms"),
        "expected warehouse latency histogram, got:\n{rendered}"
    );
    assert!(
        rendered.contains(r#"transfers_warehouse_errors_total{backend="sqlite",kind="query"} 1"#),
        "expected one sqlite query error, got:\n{rendered}"
    );
}
