mod metrics;
mod models;
mod queries;

use anyhow::Result;
use askama::Template;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use chrono::{NaiveDate, Utc};
use common::config::Dashboard;
use common::observability::{build_dispatch, LogTarget};
use common::warehouse::{Cached, Warehouse, WarehouseClient};
use metrics_exporter_prometheus::PrometheusHandle;
use models::{AssetView, EventView, GranularityOption, KpiCards, RouteView, ServiceView};
use queries::{Panel, SeriesData, WindowParams};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use transfers::{build_normalized_view, Allowlist, Dialect, QueryFragment};

pub struct AppState {
    pub warehouse: Cached<WarehouseClient>,
    pub view: QueryFragment,
    pub dashboard: Dashboard,
    pub auth_password: Option<String>,
    /// Mixed into the auth cookie so cookies stop working after a restart.
    pub session_key: [u8; 32],
    pub prometheus: Option<PrometheusHandle>,
}

// --- Cookie-based Auth Middleware ---

const AUTH_COOKIE_NAME: &str = "transfers_auth";

fn generate_auth_token(session_key: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_key);
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Redirects to /login if auth_password is configured and the request carries no valid cookie.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(password) = state.auth_password.as_deref() else {
        return next.run(request).await;
    };

    let expected = format!(
        "{AUTH_COOKIE_NAME}={}",
        generate_auth_token(&state.session_key, password)
    );
    let is_authenticated = request
        .headers()
        .get(header::COOKIE)
        .and_then(|cookie_header| cookie_header.to_str().ok())
        .is_some_and(|cookie_str| cookie_str.split(';').any(|c| c.trim() == expected));

    if is_authenticated {
        return next.run(request).await;
    }

    // HTMX swaps the body of a plain redirect into the panel; ask for a full page load instead.
    if request.headers().contains_key("HX-Request") {
        (
            StatusCode::UNAUTHORIZED,
            [("HX-Redirect", "/login")],
            "Session expired. Please log in again.",
        )
            .into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

// --- Templates ---

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    title: String,
    start: String,
    end: String,
    granularities: Vec<GranularityOption>,
    auth_enabled: bool,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    error: Option<String>,
}

#[derive(Template)]
#[template(path = "partials/kpis.html")]
struct KpisTemplate {
    notice: Option<String>,
    cards: Option<KpiCards>,
}

#[derive(Template)]
#[template(path = "partials/series.html")]
struct SeriesTemplate {
    notice: Option<String>,
    series: SeriesData,
    chart_json: String,
}

#[derive(Template)]
#[template(path = "partials/routes.html")]
struct RoutesTemplate {
    notice: Option<String>,
    routes: Vec<RouteView>,
}

#[derive(Template)]
#[template(path = "partials/services.html")]
struct ServicesTemplate {
    notice: Option<String>,
    services: Vec<ServiceView>,
}

#[derive(Template)]
#[template(path = "partials/assets.html")]
struct AssetsTemplate {
    notice: Option<String>,
    assets: Vec<AssetView>,
}

#[derive(Template)]
#[template(path = "partials/events.html")]
struct EventsTemplate {
    notice: Option<String>,
    events: Vec<EventView>,
}

fn render<T: Template>(template: &T) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "template render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// --- Handlers ---

async fn index(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Response {
    let today = today();
    let sel = queries::resolve(&params, &state.dashboard, today)
        .unwrap_or_else(|_| queries::form_defaults(&state.dashboard, today));
    render(&DashboardTemplate {
        title: state.dashboard.title.clone(),
        start: sel.window.start().to_string(),
        end: sel.window.end().to_string(),
        granularities: common::types::Granularity::ALL
            .iter()
            .map(|g| GranularityOption {
                value: g.as_str(),
                selected: *g == sel.granularity,
            })
            .collect(),
        auth_enabled: state.auth_password.is_some(),
    })
}

async fn login_form(State(state): State<Arc<AppState>>) -> Response {
    if state.auth_password.is_none() {
        return Redirect::to("/").into_response();
    }
    render(&LoginTemplate { error: None })
}

#[derive(Deserialize)]
struct LoginForm {
    password: String,
}

async fn login_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(password) = state.auth_password.as_deref() else {
        return Redirect::to("/").into_response();
    };

    if form.password != password {
        tracing::warn!("dashboard login rejected");
        return render(&LoginTemplate {
            error: Some("Invalid password".to_string()),
        });
    }

    let auth_token = generate_auth_token(&state.session_key, password);
    let cookie =
        format!("{AUTH_COOKIE_NAME}={auth_token}; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800");
    (
        StatusCode::SEE_OTHER,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, "/".to_string()),
        ],
    )
        .into_response()
}

async fn logout() -> Response {
    let cookie = format!("{AUTH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    (
        StatusCode::SEE_OTHER,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, "/login".to_string()),
        ],
    )
        .into_response()
}

async fn kpis_partial(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Response {
    let Panel { notice, data } = queries::kpis(&state, &params, today()).await;
    render(&KpisTemplate {
        notice,
        cards: data,
    })
}

async fn series_partial(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Response {
    let Panel { notice, data } = queries::series(&state, &params, today()).await;
    render(&SeriesTemplate {
        notice,
        chart_json: data.chart.to_json(),
        series: data,
    })
}

async fn routes_partial(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Response {
    let Panel { notice, data } = queries::routes(&state, &params, today()).await;
    render(&RoutesTemplate {
        notice,
        routes: data,
    })
}

async fn services_partial(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Response {
    let Panel { notice, data } = queries::services(&state, &params, today()).await;
    render(&ServicesTemplate {
        notice,
        services: data,
    })
}

async fn assets_partial(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Response {
    let Panel { notice, data } = queries::assets(&state, &params, today()).await;
    render(&AssetsTemplate {
        notice,
        assets: data,
    })
}

async fn events_partial(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Response {
    let Panel { notice, data } = queries::events(&state, &params, today()).await;
    render(&EventsTemplate {
        notice,
        events: data,
    })
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    let Some(handle) = state.prometheus.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    handle.run_upkeep();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}

// --- Router ---

pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/login", get(login_form).post(login_submit))
        .route("/logout", get(logout))
        .route("/metrics", get(metrics_endpoint));

    let protected_routes = Router::new()
        .route("/", get(index))
        .route("/partials/kpis", get(kpis_partial))
        .route("/partials/series", get(series_partial))
        .route("/partials/routes", get(routes_partial))
        .route("/partials/services", get(services_partial))
        .route("/partials/assets", get(assets_partial))
        .route("/partials/events", get(events_partial))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public_routes
        .merge(protected_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;
    let (dispatch, _otel_guard) =
        build_dispatch("web", &config.general.log_level, LogTarget::Stdout);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;
    let prometheus = crate::metrics::init_global()?;

    let web_port = config.web.as_ref().map_or(8080, |w| w.port);
    let web_host = config
        .web
        .as_ref()
        .map_or("0.0.0.0".to_string(), |w| w.host.clone());
    let auth_password = config.web.as_ref().and_then(|w| w.auth_password.clone());

    let client = common::warehouse::connect(&config.warehouse).await?;
    let allowlist = Allowlist::new(&config.dashboard.allowlist)?;
    let view = build_normalized_view(
        Dialect::for_backend(client.backend()),
        &config.sources,
        &allowlist,
    )?;
    tracing::info!(
        backend = client.backend().as_str(),
        allowlist = allowlist.len(),
        cache_ttl_secs = config.cache.ttl_secs,
        "warehouse ready"
    );

    let state = Arc::new(AppState {
        warehouse: Cached::new(
            client,
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        ),
        view,
        dashboard: config.dashboard,
        auth_password,
        session_key: rand::random(),
        prometheus: Some(prometheus),
    });

    let app = create_router_with_state(state);
    let addr: SocketAddr = format!("{web_host}:{web_port}").parse()?;
    tracing::info!("dashboard listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
