//! Snowflake over its HTTPS session protocol: log in once, then submit
//! statements with positional bindings and read JSON rowsets.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate};
use rsa::RsaPrivateKey;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

use super::auth::{await_browser_token, keypair_jwt, load_private_key, qualified_account};
use super::{Backend, Cell, Param, Query, Table, Warehouse, WarehouseError};
use crate::config::{AuthMode, SnowflakeConfig};

const CLIENT_APP_ID: &str = "transfer-dashboards";
const ACCEPT: &str = "application/snowflake";
/// Statement still running; poll `getResultUrl`.
const IN_PROGRESS_CODES: [&str; 2] = ["333333", "333334"];
/// Session or master token expired; log in again on the next render.
const SESSION_EXPIRED_CODES: [&str; 2] = ["390112", "390114"];
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

enum Credentials {
    Password(String),
    KeyPair(RsaPrivateKey),
    OAuth(String),
    Browser,
}

/// Authentication fields of a login request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoginAuth {
    Password(String),
    Token {
        authenticator: &'static str,
        token: String,
        proof_key: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    message: Option<String>,
    code: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticatorData {
    sso_url: String,
    proof_key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<Vec<Value>>,
    #[serde(default)]
    chunks: Vec<Value>,
    get_result_url: Option<String>,
    query_result_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

pub struct SnowflakeWarehouse {
    http: reqwest::Client,
    config: SnowflakeConfig,
    base_url: String,
    credentials: Credentials,
    session: tokio::sync::Mutex<Option<String>>,
    sequence: AtomicU64,
}

impl SnowflakeWarehouse {
    /// Validates that `auth_mode` has what it needs; does not log in.
    pub fn new(config: SnowflakeConfig) -> Result<Self, WarehouseError> {
        let missing = |what: &str| {
            WarehouseError::Connection(format!(
                "auth_mode = \"{}\" needs {what}",
                config.auth_mode.as_str()
            ))
        };
        let credentials = match config.auth_mode {
            AuthMode::Password => Credentials::Password(
                config
                    .password()
                    .ok_or_else(|| missing("password or SNOWFLAKE_PASSWORD"))?,
            ),
            AuthMode::Keypair => {
                let path = config
                    .private_key_path
                    .as_deref()
                    .ok_or_else(|| missing("private_key_path"))?;
                Credentials::KeyPair(load_private_key(path)?)
            }
            AuthMode::Oauth => Credentials::OAuth(
                config
                    .oauth_token()
                    .ok_or_else(|| missing("oauth_token or SNOWFLAKE_OAUTH_TOKEN"))?,
            ),
            AuthMode::Browser => Credentials::Browser,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(format!("{CLIENT_APP_ID}/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WarehouseError::Connection(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            config,
            credentials,
            session: tokio::sync::Mutex::new(None),
            sequence: AtomicU64::new(0),
        })
    }

    /// Current session token, logging in first if there is none.
    async fn session_token(&self) -> Result<String, WarehouseError> {
        let mut session = self.session.lock().await;
        if let Some(token) = session.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *session = Some(token.clone());
        Ok(token)
    }

    async fn forget_session(&self) {
        *self.session.lock().await = None;
    }

    async fn login(&self) -> Result<String, WarehouseError> {
        let auth = match &self.credentials {
            Credentials::Password(p) => LoginAuth::Password(p.clone()),
            Credentials::KeyPair(key) => LoginAuth::Token {
                authenticator: "SNOWFLAKE_JWT",
                token: keypair_jwt(
                    &self.config.account,
                    &self.config.user,
                    key,
                    chrono::Utc::now(),
                )?,
                proof_key: None,
            },
            Credentials::OAuth(t) => LoginAuth::Token {
                authenticator: "OAUTH",
                token: t.clone(),
                proof_key: None,
            },
            Credentials::Browser => {
                let (token, proof_key) = self.browser_sign_in().await?;
                LoginAuth::Token {
                    authenticator: "EXTERNALBROWSER",
                    token,
                    proof_key: Some(proof_key),
                }
            }
        };

        let mut url = reqwest::Url::parse(&format!("{}/session/v1/login-request", self.base_url))
            .map_err(|e| WarehouseError::Connection(format!("account url: {e}")))?;
        {
            let mut qp = url.query_pairs_mut();
            let optional = [
                ("databaseName", &self.config.database),
                ("schemaName", &self.config.schema),
                ("warehouse", &self.config.warehouse),
                ("roleName", &self.config.role),
            ];
            for (name, value) in optional {
                if let Some(v) = value {
                    qp.append_pair(name, v);
                }
            }
            qp.append_pair("request_id", &uuid::Uuid::new_v4().to_string());
        }

        let envelope: Envelope<LoginData> = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .json(&login_body(&self.config, &auth))
            .send()
            .await
            .map_err(connection_error)?
            .json()
            .await
            .map_err(connection_error)?;

        if !envelope.success {
            return Err(WarehouseError::Connection(envelope_message(&envelope)));
        }
        let token = envelope
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| WarehouseError::Connection("login response had no token".into()))?;
        tracing::info!(
            account = %self.config.account,
            auth_mode = self.config.auth_mode.as_str(),
            "snowflake session established"
        );
        Ok(token)
    }

    /// Ask Snowflake for the identity provider URL, send the user there and
    /// wait for the redirect back to a localhost port.
    async fn browser_sign_in(&self) -> Result<(String, String), WarehouseError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| WarehouseError::Connection(format!("sso callback listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| WarehouseError::Connection(format!("sso callback listener: {e}")))?
            .port();

        let body = json!({
            "data": {
                "ACCOUNT_NAME": qualified_account(&self.config.account),
                "LOGIN_NAME": self.config.user,
                "AUTHENTICATOR": "EXTERNALBROWSER",
                "BROWSER_MODE_REDIRECT_PORT": port.to_string(),
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
            }
        });
        let envelope: Envelope<AuthenticatorData> = self
            .http
            .post(format!("{}/session/authenticator-request", self.base_url))
            .header(reqwest::header::ACCEPT, ACCEPT)
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?
            .json()
            .await
            .map_err(connection_error)?;
        if !envelope.success {
            return Err(WarehouseError::Connection(envelope_message(&envelope)));
        }
        let data = envelope.data.ok_or_else(|| {
            WarehouseError::Connection("authenticator response had no data".into())
        })?;

        tracing::warn!(sso_url = %data.sso_url, port, "waiting for browser sign-in");
        eprintln!("Open this URL in a browser to sign in to Snowflake:\n{}", data.sso_url);

        let token = await_browser_token(
            listener,
            Duration::from_secs(self.config.browser_timeout_secs),
        )
        .await?;
        Ok((token, data.proof_key))
    }

    async fn submit(&self, token: &str, query: &Query) -> Result<Table, WarehouseError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let mut body = json!({
            "sqlText": query.sql,
            "asyncExec": false,
            "sequenceId": sequence,
            "querySubmissionTime": chrono::Utc::now().timestamp_millis(),
        });
        if !query.params.is_empty() {
            body["bindings"] = bindings(&query.params);
        }

        let url = format!(
            "{}/queries/v1/query-request?requestId={}",
            self.base_url,
            uuid::Uuid::new_v4()
        );
        let mut envelope: Envelope<QueryData> = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::AUTHORIZATION, auth_header(token))
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?
            .json()
            .await
            .map_err(query_error)?;

        let mut wait = Duration::from_millis(250);
        while envelope
            .code
            .as_deref()
            .is_some_and(|c| IN_PROGRESS_CODES.contains(&c))
        {
            let result_url = envelope
                .data
                .as_ref()
                .and_then(|d| d.get_result_url.clone())
                .ok_or_else(|| {
                    WarehouseError::Query("statement in progress without a result url".into())
                })?;
            tokio::time::sleep(wait).await;
            wait = (wait * 2).min(MAX_POLL_INTERVAL);
            tracing::debug!(%result_url, "polling in-progress statement");
            envelope = self
                .http
                .get(format!("{}{result_url}", self.base_url))
                .header(reqwest::header::ACCEPT, ACCEPT)
                .header(reqwest::header::AUTHORIZATION, auth_header(token))
                .send()
                .await
                .map_err(connection_error)?
                .json()
                .await
                .map_err(query_error)?;
        }

        if !envelope.success {
            let message = envelope_message(&envelope);
            if envelope
                .code
                .as_deref()
                .is_some_and(|c| SESSION_EXPIRED_CODES.contains(&c))
            {
                self.forget_session().await;
                return Err(WarehouseError::Connection(message));
            }
            return Err(WarehouseError::Query(message));
        }

        decode_result(envelope.data.unwrap_or_default())
    }
}

impl Warehouse for SnowflakeWarehouse {
    fn backend(&self) -> Backend {
        Backend::Snowflake
    }

    async fn execute(&self, query: &Query) -> Result<Table, WarehouseError> {
        let token = self.session_token().await?;
        self.submit(&token, query).await
    }
}

fn login_body(config: &SnowflakeConfig, auth: &LoginAuth) -> Value {
    let mut data = json!({
        "CLIENT_APP_ID": CLIENT_APP_ID,
        "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
        "ACCOUNT_NAME": qualified_account(&config.account),
        "LOGIN_NAME": config.user,
        "CLIENT_ENVIRONMENT": {
            "APPLICATION": CLIENT_APP_ID,
            "OS": std::env::consts::OS,
        },
        // Calendar bucketing is defined in UTC with ISO (Monday) weeks.
        "SESSION_PARAMETERS": {
            "TIMEZONE": "UTC",
            "WEEK_START": 1,
            "QUERY_RESULT_FORMAT": "JSON",
        },
    });
    match auth {
        LoginAuth::Password(p) => {
            data["PASSWORD"] = json!(p);
        }
        LoginAuth::Token {
            authenticator,
            token,
            proof_key,
        } => {
            data["AUTHENTICATOR"] = json!(authenticator);
            data["TOKEN"] = json!(token);
            if let Some(pk) = proof_key {
                data["PROOF_KEY"] = json!(pk);
            }
        }
    }
    json!({ "data": data })
}

/// `{"1": {"type": "TEXT", "value": "..."}, ...}`; dates travel as text and
/// the SQL converts them with `TO_DATE(?)`.
fn bindings(params: &[Param]) -> Value {
    let map: serde_json::Map<String, Value> = params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let kind = match p {
                Param::Int(_) => "FIXED",
                Param::Text(_) | Param::Date(_) => "TEXT",
            };
            (
                (i + 1).to_string(),
                json!({ "type": kind, "value": p.to_text() }),
            )
        })
        .collect();
    Value::Object(map)
}

fn auth_header(token: &str) -> String {
    format!("Snowflake Token=\"{token}\"")
}

fn envelope_message<T>(envelope: &Envelope<T>) -> String {
    let message = envelope
        .message
        .clone()
        .unwrap_or_else(|| "unknown error".to_string());
    match &envelope.code {
        Some(code) => format!("{message} (code {code})"),
        None => message,
    }
}

fn connection_error(e: reqwest::Error) -> WarehouseError {
    WarehouseError::Connection(e.to_string())
}

fn query_error(e: reqwest::Error) -> WarehouseError {
    WarehouseError::Query(format!("unreadable response: {e}"))
}

fn decode_result(data: QueryData) -> Result<Table, WarehouseError> {
    if !data.chunks.is_empty() {
        return Err(WarehouseError::Query(format!(
            "result spans {} chunks; aggregate queries should return inline rows",
            data.chunks.len()
        )));
    }
    if let Some(format) = data.query_result_format.as_deref() {
        if !format.eq_ignore_ascii_case("json") {
            return Err(WarehouseError::Query(format!(
                "unsupported result format {format:?}"
            )));
        }
    }
    let columns = data.rowtype.iter().map(|c| c.name.clone()).collect();
    let rows = data
        .rowset
        .into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, v)| to_cell(v, data.rowtype.get(i)))
                .collect()
        })
        .collect();
    Ok(Table { columns, rows })
}

/// Rowset values arrive as strings; `rowtype` says how to read them.
fn to_cell(value: Value, column: Option<&RowType>) -> Cell {
    let text = match value {
        Value::Null => return Cell::Null,
        Value::String(s) => s,
        Value::Number(n) => {
            return n
                .as_i64()
                .map(Cell::Int)
                .or_else(|| n.as_f64().map(Cell::Real))
                .unwrap_or(Cell::Null)
        }
        other => return Cell::Text(other.to_string()),
    };
    let Some(column) = column else {
        return Cell::Text(text);
    };
    match column.kind.to_ascii_lowercase().as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => {
            text.parse().map_or(Cell::Text(text), Cell::Int)
        }
        "fixed" | "real" => text.parse().map_or(Cell::Text(text), Cell::Real),
        // Days since the epoch.
        "date" => text
            .parse::<i64>()
            .ok()
            .and_then(|days| {
                NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(ChronoDuration::days(days))
            })
            .map_or(Cell::Text(text), |d| Cell::Text(d.to_string())),
        // Fractional seconds since the epoch.
        "timestamp_ntz" => epoch_seconds(&text).map_or(Cell::Text(text), Cell::Text),
        _ => Cell::Text(text),
    }
}

fn epoch_seconds(text: &str) -> Option<String> {
    let (secs, frac) = text.split_once('.').unwrap_or((text, "0"));
    let secs: i64 = secs.parse().ok()?;
    let nanos: u32 = format!("{frac:0<9}").get(..9)?.parse().ok()?;
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format(crate::db::TIMESTAMP_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn config(url: &str) -> SnowflakeConfig {
        SnowflakeConfig {
            account: "xy12345.us-east-1".into(),
            user: "analyst".into(),
            auth_mode: AuthMode::Oauth,
            account_url: Some(url.into()),
            warehouse: Some("COMPUTE_WH".into()),
            database: None,
            schema: None,
            role: None,
            password: None,
            private_key_path: None,
            oauth_token: Some("oauth-123".into()),
            browser_timeout_secs: 5,
            request_timeout_secs: 5,
        }
    }

    #[derive(Default)]
    struct Mock {
        logins: AtomicUsize,
        queries: AtomicUsize,
    }

    async fn login(State(m): State<Arc<Mock>>, Json(body): Json<Value>) -> Json<Value> {
        let n = m.logins.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(body["data"]["AUTHENTICATOR"], "OAUTH");
        assert_eq!(body["data"]["TOKEN"], "oauth-123");
        Json(json!({ "success": true, "data": { "token": format!("session-{n}") } }))
    }

    async fn query(
        State(m): State<Arc<Mock>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        m.queries.fetch_add(1, Ordering::SeqCst);
        let auth = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("Snowflake Token=\"session-"));
        let sql = body["sqlText"].as_str().unwrap();
        if sql.contains("expired") {
            return Json(json!({ "success": false, "code": "390112", "message": "Your session has expired." }));
        }
        if sql.contains("broken") {
            return Json(json!({ "success": false, "code": "002003", "message": "SQL compilation error" }));
        }
        if sql.contains("slow") {
            return Json(json!({
                "success": true,
                "code": "333334",
                "data": { "getResultUrl": "/queries/q-1/result" }
            }));
        }
        assert_eq!(body["bindings"]["1"]["type"], "TEXT");
        assert_eq!(body["bindings"]["1"]["value"], "2025-01-01");
        Json(result_body())
    }

    async fn result() -> Json<Value> {
        Json(result_body())
    }

    fn result_body() -> Value {
        json!({
            "success": true,
            "data": {
                "queryResultFormat": "json",
                "rowtype": [
                    { "name": "Date", "type": "date" },
                    { "name": "Number of Successful Txns", "type": "fixed", "scale": 0 },
                    { "name": "Volume (USD)", "type": "real" }
                ],
                "rowset": [["20089", "3", "150.5"], ["20090", "1", null]]
            }
        })
    }

    async fn serve() -> (String, Arc<Mock>) {
        let mock = Arc::new(Mock::default());
        let app = Router::new()
            .route("/session/v1/login-request", post(login))
            .route("/queries/v1/query-request", post(query))
            .route("/queries/q-1/result", get(result))
            .with_state(mock.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), mock)
    }

    fn dated(sql: &str) -> Query {
        Query::new(
            sql,
            vec![Param::Date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())],
        )
    }

    #[tokio::test]
    async fn test_logs_in_once_and_decodes_rowset() {
        let (url, mock) = serve().await;
        let wh = SnowflakeWarehouse::new(config(&url)).unwrap();

        let t = wh.execute(&dated("SELECT ...")).await.unwrap();
        wh.execute(&dated("SELECT ...")).await.unwrap();

        assert_eq!(mock.logins.load(Ordering::SeqCst), 1);
        assert_eq!(mock.queries.load(Ordering::SeqCst), 2);
        assert_eq!(t.columns[1], "Number of Successful Txns");
        assert_eq!(
            t.rows[0],
            vec![
                Cell::Text("2025-01-01".into()),
                Cell::Int(3),
                Cell::Real(150.5)
            ]
        );
        assert_eq!(t.rows[1][2], Cell::Null);
    }

    #[tokio::test]
    async fn test_compilation_error_is_query_error() {
        let (url, _mock) = serve().await;
        let wh = SnowflakeWarehouse::new(config(&url)).unwrap();
        let err = wh.execute(&dated("broken")).await.unwrap_err();
        assert_eq!(err.kind(), "query");
        assert!(err.to_string().contains("002003"));
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped() {
        let (url, mock) = serve().await;
        let wh = SnowflakeWarehouse::new(config(&url)).unwrap();
        let err = wh.execute(&dated("expired")).await.unwrap_err();
        assert_eq!(err.kind(), "connection");

        wh.execute(&dated("SELECT ...")).await.unwrap();
        assert_eq!(mock.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_progress_statement_is_polled() {
        let (url, _mock) = serve().await;
        let wh = SnowflakeWarehouse::new(config(&url)).unwrap();
        let t = wh.execute(&dated("slow")).await.unwrap();
        assert_eq!(t.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_account_is_connection_error() {
        let wh = SnowflakeWarehouse::new(config("http://127.0.0.1:9")).unwrap();
        let err = wh.execute(&dated("SELECT 1")).await.unwrap_err();
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn test_missing_credentials_rejected_up_front() {
        let mut c = config("http://localhost");
        c.auth_mode = AuthMode::Keypair;
        let err = SnowflakeWarehouse::new(c).err().unwrap();
        assert!(err.to_string().contains("private_key_path"));
    }

    #[test]
    fn test_login_body_per_auth_mode() {
        let c = config("http://localhost");
        let pw = login_body(&c, &LoginAuth::Password("hunter2".into()));
        assert_eq!(pw["data"]["PASSWORD"], "hunter2");
        assert_eq!(pw["data"]["ACCOUNT_NAME"], "XY12345");
        assert_eq!(pw["data"]["SESSION_PARAMETERS"]["TIMEZONE"], "UTC");
        assert!(pw["data"].get("AUTHENTICATOR").is_none());

        let browser = login_body(
            &c,
            &LoginAuth::Token {
                authenticator: "EXTERNALBROWSER",
                token: "t".into(),
                proof_key: Some("pk".into()),
            },
        );
        assert_eq!(browser["data"]["AUTHENTICATOR"], "EXTERNALBROWSER");
        assert_eq!(browser["data"]["PROOF_KEY"], "pk");
    }

    #[test]
    fn test_bindings_are_positional() {
        let b = bindings(&[
            Param::Text("0xabc".into()),
            Param::Int(10),
            Param::Date(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()),
        ]);
        assert_eq!(b["1"]["value"], "0xabc");
        assert_eq!(b["2"]["type"], "FIXED");
        assert_eq!(b["3"]["value"], "2025-02-01");
    }

    #[test]
    fn test_chunked_results_rejected() {
        let data = QueryData {
            chunks: vec![json!({"url": "https://s3/chunk0"})],
            ..QueryData::default()
        };
        assert_eq!(decode_result(data).unwrap_err().kind(), "query");
    }

    #[test]
    fn test_timestamp_ntz_cells() {
        let col = RowType {
            name: "Created At".into(),
            kind: "timestamp_ntz".into(),
            scale: Some(9),
        };
        assert_eq!(
            to_cell(json!("1735689600.500000000"), Some(&col)),
            Cell::Text("2025-01-01 00:00:00".into())
        );
    }
}
