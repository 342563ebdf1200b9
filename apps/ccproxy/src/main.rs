use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{Map, Value, json};
use tracing::info;

use ccproxy_config::CcproxyConfig;
use ccproxy_core::{ProxyHandler, UpstreamDispatch, preflight};
use ccproxy_credentials::CredentialStore;
use ccproxy_mitm::MitmAddon;
use ccproxy_pipeline::{
    HookServices, PipelineExecutor, RequestClassifier, RequestData, RequestMetadataStore,
    RoutingTable, specs_from_config,
};
use ccproxy_storage::{TraceStorage, TraceStore};

mod cli;
mod dispatch;
mod models;

use cli::Cli;
use dispatch::WreqDispatch;
use models::YamlModelProvider;

struct App {
    handler: Arc<ProxyHandler>,
    dispatch: Arc<WreqDispatch>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.config_dir)?;

    let config_path = cli.config_dir.join("ccproxy.yaml");
    let config = if config_path.exists() {
        CcproxyConfig::from_yaml_path(&config_path)?
    } else {
        CcproxyConfig::default()
    };
    init_tracing(config.debug);

    let mut ports = vec![cli.port];
    if config.mitm.enabled {
        ports.push(config.mitm.port);
    }
    preflight::run_preflight(&cli.config_dir, &ports)?;

    let credentials = Arc::new(CredentialStore::from_config(&config)?);
    credentials.load_all().await?;

    let classifier = Arc::new(RequestClassifier::from_config(&config.rules)?);
    let router = Arc::new(RoutingTable::new(Arc::new(YamlModelProvider::new(
        cli.config_dir.join("config.yaml"),
    ))));
    let services = HookServices {
        classifier,
        router,
        credentials: credentials.clone(),
        metadata_store: Arc::new(RequestMetadataStore::new()),
        default_model_passthrough: config.default_model_passthrough,
    };
    let pipeline = PipelineExecutor::new(specs_from_config(&config)?, services)?;
    let handler = Arc::new(ProxyHandler::new(pipeline, credentials));

    let addon = if config.mitm.enabled {
        let storage: Option<Arc<dyn TraceStore>> = match &config.mitm.database_url {
            Some(url) => {
                let storage = TraceStorage::connect(url).await?;
                storage.sync().await?;
                Some(Arc::new(storage))
            }
            None => None,
        };
        Some(Arc::new(MitmAddon::new(storage, config.mitm.clone())))
    } else {
        None
    };
    let dispatch = Arc::new(WreqDispatch::new(addon)?);

    let app = Arc::new(App { handler, dispatch });
    let routes = Router::new()
        .route("/v1/messages", post(proxy))
        .route("/v1/chat/completions", post(proxy))
        .route("/ccproxy/status", get(status))
        .with_state(app);

    let pid_file = cli.config_dir.join("dispatcher.pid");
    preflight::write_pid_file(&pid_file, std::process::id())?;

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "listening");
    let served = axum::serve(listener, routes).await;
    preflight::remove_pid_file(&pid_file);
    served?;
    Ok(())
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn proxy(
    State(app): State<Arc<App>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let envelope = build_envelope(&uri, &headers, body);
    let data = match app.handler.pre_call(envelope, None) {
        Ok(data) => data,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    };

    match app.dispatch.completion(data.clone()).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            if err.is_auth_error()
                && let Some(response) = app
                    .handler
                    .post_call_failure(&data, &err, app.dispatch.as_ref() as &dyn UpstreamDispatch)
                    .await
            {
                return Json(response).into_response();
            }
            let status = err
                .status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(status, &err.message)
        }
    }
}

async fn status(State(app): State<Arc<App>>) -> Response {
    Json(app.handler.last_status()).into_response()
}

/// Wrap an inbound request in the envelope the pipeline expects:
/// the body fields at the top level plus `proxy_server_request` and
/// `secret_fields.raw_headers` carrying the original header values.
fn build_envelope(uri: &Uri, headers: &HeaderMap, body: Value) -> RequestData {
    let mut envelope = body.as_object().cloned().unwrap_or_default();
    let client_body = envelope.clone();

    let mut header_map = Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }

    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let url = format!("http://{host}{uri}");

    let mut raw_headers = Map::new();
    for name in ["authorization", "x-api-key"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            raw_headers.insert(name.to_string(), Value::String(value.to_string()));
        }
    }

    envelope
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    envelope.insert(
        "litellm_call_id".to_string(),
        Value::String(uuid::Uuid::new_v4().to_string()),
    );
    envelope.insert(
        "proxy_server_request".to_string(),
        json!({
            "method": "POST",
            "url": url,
            "headers": Value::Object(header_map),
            "body": Value::Object(client_body),
        }),
    );
    envelope.insert(
        "secret_fields".to_string(),
        json!({"raw_headers": Value::Object(raw_headers)}),
    );
    envelope
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"type": "proxy_error", "message": message}})),
    )
        .into_response()
}
