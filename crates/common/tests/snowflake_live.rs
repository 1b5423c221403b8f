use common::config::{AuthMode, SnowflakeConfig};
use common::warehouse::{Param, Query, SnowflakeWarehouse, Warehouse};

/// Needs SNOWFLAKE_ACCOUNT, SNOWFLAKE_USER and SNOWFLAKE_PASSWORD.
#[tokio::test]
#[ignore] // requires network and credentials
async fn test_live_snowflake_binds_and_returns_rows() {
    let config = SnowflakeConfig {
        account: std::env::var("SNOWFLAKE_ACCOUNT").unwrap(),
        user: std::env::var("SNOWFLAKE_USER").unwrap(),
        auth_mode: AuthMode::Password,
        account_url: None,
        warehouse: std::env::var("SNOWFLAKE_WAREHOUSE").ok(),
        database: None,
        schema: None,
        role: None,
        password: None,
        private_key_path: None,
        oauth_token: None,
        browser_timeout_secs: 120,
        request_timeout_secs: 60,
    };
    let wh = SnowflakeWarehouse::new(config).unwrap();
    let t = wh
        .execute(&Query::new(
            "SELECT TO_VARCHAR(DATE_TRUNC('week', TO_DATE(?)), 'YYYY-MM-DD') AS \"Date\", ? AS \"N\"",
            vec![Param::Text("2025-01-08".into()), Param::Int(3)],
        ))
        .await
        .unwrap();
    // WEEK_START = 1 puts the bucket on Monday.
    assert_eq!(t.rows[0][t.column("Date").unwrap()].to_text().as_deref(), Some("2025-01-06"));
    assert_eq!(t.rows[0][t.column("N").unwrap()].as_i64(), Some(3));
}
