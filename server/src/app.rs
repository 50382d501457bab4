use std::sync::{atomic::AtomicUsize, Arc};

use axum::{
    routing::{get, patch, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::channels::ChannelSequencer;
use crate::config::{Config, StoreBackend};
use crate::handlers;
use crate::invite::{Mailer, SmtpMailer};
use crate::llm::{GeminiClient, LanguageModel};
use crate::mention::MentionDetector;
use crate::notify::push::{PushSender, WebPushSender};
use crate::realtime::Hub;
use crate::store::{memory::MemoryStore, postgres::PgStore, Store};
use crate::ws::ws_handler;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub hub: Hub,
    pub sequencer: ChannelSequencer,
    pub model: Arc<dyn LanguageModel>,
    pub push: Option<Arc<dyn PushSender>>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub mention: MentionDetector,
    pub next_client_id: AtomicUsize,
}

impl AppState {
    /// Push and mail start disabled; attach them with `with_push` / `with_mailer`.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self, regex::Error> {
        let mention = MentionDetector::new(&config.assistant_handle)?;
        Ok(Self {
            config,
            store,
            hub: Hub::new(),
            sequencer: ChannelSequencer::new(),
            model,
            push: None,
            mailer: None,
            mention,
            next_client_id: AtomicUsize::new(0),
        })
    }

    pub fn with_push(mut self, push: Arc<dyn PushSender>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/channels", get(handlers::list_channels))
        .route("/api/channels/direct", post(handlers::create_direct_channel))
        .route("/api/channels/{channel_id}", patch(handlers::patch_channel))
        .route(
            "/api/channels/{channel_id}/messages",
            get(handlers::list_messages),
        )
        .route("/api/messages", post(handlers::send_message))
        .route(
            "/api/messages/{message_id}/assistant",
            post(handlers::retry_assistant),
        )
        .route("/api/chat", post(handlers::chat))
        .route(
            "/api/insights",
            get(handlers::list_insights).post(handlers::create_insight),
        )
        .route("/api/insights/generate", post(handlers::generate_insights))
        .route(
            "/api/contexts",
            get(handlers::list_contexts).post(handlers::create_context),
        )
        .route(
            "/api/push/subscribe",
            post(handlers::push_subscribe).delete(handlers::push_unsubscribe),
        )
        .route("/api/tasks", get(handlers::list_tasks))
        .route("/api/tasks/from-thread", post(handlers::create_task_from_thread))
        .route("/api/policy/check", post(handlers::check_policy))
        .route("/api/push/send", post(handlers::push_send))
        .route("/api/push/vapid-public-key", get(handlers::vapid_public_key))
        .route("/api/invite", post(handlers::send_invites))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("workspace_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            let db = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await
                .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

            sqlx::migrate!("./migrations")
                .run(&db)
                .await
                .expect("failed to run sqlx migrations");
            Arc::new(PgStore::new(db))
        }
        StoreBackend::Memory => {
            warn!("using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let model = Arc::new(
        GeminiClient::new(
            reqwest::Client::new(),
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
        )
        .with_base_url(config.gemini_base_url.clone()),
    );
    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set, assistant replies will use the local fallback");
    }

    let push = match config.vapid.clone() {
        Some(vapid) => match WebPushSender::new(vapid) {
            Ok(sender) => Some(Arc::new(sender) as Arc<dyn PushSender>),
            Err(err) => {
                warn!(error = %err, "web push disabled");
                None
            }
        },
        None => {
            info!("VAPID keys not set, push notifications disabled");
            None
        }
    };

    let mailer = match config.smtp.as_ref() {
        Some(smtp) => match SmtpMailer::new(smtp) {
            Ok(mailer) => Some(Arc::new(mailer) as Arc<dyn Mailer>),
            Err(err) => {
                warn!(error = %err, "invite email disabled");
                None
            }
        },
        None => {
            info!("SMTP credentials not set, invite email disabled");
            None
        }
    };

    let port = config.port;
    let mut state =
        AppState::new(config, store, model).expect("ASSISTANT_HANDLE must form a valid pattern");
    state.push = push;
    state.mailer = mailer;
    let app = router(Arc::new(state));

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    info!("workspace server running at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
