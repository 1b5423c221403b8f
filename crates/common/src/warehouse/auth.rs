//! Credential plumbing for the Snowflake session login: key-pair JWTs and
//! the one-shot localhost callback used by browser SSO.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

use super::WarehouseError;

const JWT_LIFETIME_MINUTES: i64 = 60;

pub fn load_private_key(path: &str) -> Result<RsaPrivateKey, WarehouseError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| WarehouseError::Connection(format!("private key {path}: {e}")))?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .map_err(|e| WarehouseError::Connection(format!("private key {path}: {e}")))
}

/// `SHA256:<base64 of sha256(public key DER)>`, the form Snowflake stores
/// as `RSA_PUBLIC_KEY_FP`.
pub fn public_key_fingerprint(key: &RsaPrivateKey) -> Result<String, WarehouseError> {
    let der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| WarehouseError::Connection(format!("encoding public key: {e}")))?;
    Ok(format!("SHA256:{}", STANDARD.encode(Sha256::digest(der.as_bytes()))))
}

/// Account identifier as it appears in JWT claims: upper case, region and
/// cloud suffixes dropped (`xy12345.us-east-1` -> `XY12345`).
pub(super) fn qualified_account(account: &str) -> String {
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_ascii_uppercase()
}

/// RS256 JWT for `SNOWFLAKE_JWT` authentication.
pub fn keypair_jwt(
    account: &str,
    user: &str,
    key: &RsaPrivateKey,
    now: DateTime<Utc>,
) -> Result<String, WarehouseError> {
    let subject = format!(
        "{}.{}",
        qualified_account(account),
        user.to_ascii_uppercase()
    );
    let fingerprint = public_key_fingerprint(key)?;
    let header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    let claims = serde_json::json!({
        "iss": format!("{subject}.{fingerprint}"),
        "sub": subject,
        "iat": now.timestamp(),
        "exp": (now + Duration::minutes(JWT_LIFETIME_MINUTES)).timestamp(),
    });
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let signature = SigningKey::<Sha256>::new(key.clone()).sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

type TokenSlot = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Wait for the identity provider to redirect the browser back to
/// `listener` and return the `token` it carries.
pub async fn await_browser_token(
    listener: TcpListener,
    timeout: std::time::Duration,
) -> Result<String, WarehouseError> {
    let (token_tx, token_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let slot: TokenSlot = Arc::new(Mutex::new(Some(token_tx)));
    let app = Router::new()
        .route("/", get(receive_token))
        .with_state(slot);

    tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::warn!(error = %e, "sso callback server failed");
        }
    });

    let outcome = tokio::time::timeout(timeout, token_rx).await;
    let _ = stop_tx.send(());
    match outcome {
        Ok(Ok(token)) => Ok(token),
        Ok(Err(_closed)) => Err(WarehouseError::Connection(
            "sso callback server stopped before a token arrived".to_string(),
        )),
        Err(elapsed) => Err(WarehouseError::Connection(format!(
            "timed out waiting for browser sign-in ({elapsed})"
        ))),
    }
}

async fn receive_token(
    State(slot): State<TokenSlot>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    let Some(token) = params.get("token").filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "Authentication failed: no token received.",
        );
    };
    let Some(sender) = slot.lock().await.take() else {
        return (StatusCode::CONFLICT, "Authentication already completed.");
    };
    tracing::debug!("sso callback received token");
    if sender.send(token.clone()).is_err() {
        return (StatusCode::GONE, "Sign-in is no longer waiting for a token.");
    }
    (
        StatusCode::OK,
        "Authentication complete. You can close this window.",
    )
}
