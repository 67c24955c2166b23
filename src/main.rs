use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use recruit_capture::api;
use recruit_capture::browser::{BrowserHost, ChromeHost};
use recruit_capture::config::{Config, ExtractionMode};
use recruit_capture::coordinator::{Coordinator, ProfileExtractor, RemoteExtractor};
use recruit_capture::interceptor::NetworkInterceptor;
use recruit_capture::pdf::LocalPdfExtractor;
use recruit_capture::processor::{ExtensionTabProcessor, TabProcessor};
use recruit_capture::recruiting_api::{HttpRecruitingApi, RecruitingApi};
use recruit_capture::settings::SettingsStore;
use recruit_capture::worker::BatchQueueEngine;

const CHROME_LAUNCH_ATTEMPTS: u32 = 3;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::get_queue,
        api::detect_tabs,
        api::start_queue,
        api::stop_queue,
        api::source_profiles,
        api::get_review,
        api::accept_result,
        api::reject_result,
        api::get_settings,
        api::put_settings,
        api::capture_profile,
        api::parse_profile_text
    ),
    components(
        schemas(
            api::StartRequest,
            api::RunAccepted,
            api::StopResponse,
            api::SourceRequest,
            api::SourceResponse,
            api::ReviewResponse,
            api::SettingsView,
            api::CaptureRequest,
            api::ParseRequest,
            api::ErrorBody,
            recruit_capture::queue::QueueState,
            recruit_capture::queue::QueueItem,
            recruit_capture::queue::QueueResult,
            recruit_capture::queue::ItemStatus,
            recruit_capture::queue::EnginePhase,
            recruit_capture::queue::Decision,
            recruit_capture::browser::TabId,
            recruit_capture::profile::StructuredProfile,
            recruit_capture::profile::ContactInfo,
            recruit_capture::profile::ExperienceEntry,
            recruit_capture::profile::EducationEntry,
            recruit_capture::profile::NamedItem,
            recruit_capture::recruiting_api::MatchResult,
            recruit_capture::recruiting_api::CategoryScore,
            recruit_capture::recruiting_api::Application,
            recruit_capture::settings::Settings,
            recruit_capture::coordinator::ActionBehavior
        )
    ),
    tags(
        (name = "queue", description = "Batch capture queue"),
        (name = "review", description = "Candidate review"),
        (name = "settings", description = "User settings"),
        (name = "profile", description = "Single-profile capture and parsing")
    )
)]
struct ApiDoc;

async fn launch_chrome(config: &Config) -> anyhow::Result<ChromeHost> {
    let mut attempts = 0;
    loop {
        let chrome = config.chrome.clone();
        match tokio::task::spawn_blocking(move || ChromeHost::launch(&chrome)).await? {
            Ok(host) => return Ok(host),
            Err(e) => {
                attempts += 1;
                if attempts >= CHROME_LAUNCH_ATTEMPTS {
                    error!("🔥 Chrome failed to start after {} attempts", attempts);
                    return Err(e);
                }
                warn!(
                    "⚠️ Chrome launch failed ({}), retrying in 2s... (Attempt {}/{})",
                    e, attempts, CHROME_LAUNCH_ATTEMPTS
                );
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        "⚙️ Extraction: {:?}, API: {}, DOM fallback: {}",
        config.extraction_mode, config.api_base_url, config.dom_fallback
    );

    let settings_store = Arc::new(SettingsStore::new(&config.settings_path));
    let settings = Arc::new(RwLock::new(settings_store.load().await?));

    let recruiting_api: Arc<dyn RecruitingApi> = Arc::new(HttpRecruitingApi::new(
        &config.api_base_url,
        config.api_token.clone(),
    )?);
    let extractor: Arc<dyn ProfileExtractor> = match config.extraction_mode {
        ExtractionMode::Remote => Arc::new(RemoteExtractor::new(recruiting_api.clone())),
        ExtractionMode::Local => Arc::new(LocalPdfExtractor),
    };
    let (coordinator, _coordinator_task) =
        Coordinator::start(extractor, settings, config.capture_url_markers.clone()).await;

    info!("🌐 Launching Chrome...");
    let host: Arc<dyn BrowserHost> = Arc::new(launch_chrome(&config).await?);

    let processor = Arc::new(ExtensionTabProcessor::new(
        host.clone(),
        coordinator.clone(),
        recruiting_api.clone(),
        Arc::new(NetworkInterceptor::new(config.capture_url_markers.clone())),
        config.timings.clone(),
        config.dom_fallback,
    ));
    let tab_processor: Arc<dyn TabProcessor> = processor.clone();
    let engine = Arc::new(BatchQueueEngine::new(
        host,
        tab_processor,
        recruiting_api,
        config.timings.clone(),
    ));

    let state = api::AppState {
        engine,
        processor,
        coordinator,
        settings_store,
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/queue", get(api::get_queue))
        .route("/queue/detect", post(api::detect_tabs))
        .route("/queue/start", post(api::start_queue))
        .route("/queue/stop", post(api::stop_queue))
        .route("/queue/source", post(api::source_profiles))
        .route("/queue/review", get(api::get_review))
        .route("/queue/review/:index/accept", post(api::accept_result))
        .route("/queue/review/:index/reject", post(api::reject_result))
        .route("/settings", get(api::get_settings).put(api::put_settings))
        .route("/profile/capture", post(api::capture_profile))
        .route("/profile/parse", post(api::parse_profile_text))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
