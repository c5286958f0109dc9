use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use internship_api::auth::reset::{
    HttpMailer, LogMailer, Mailer, MemoryResetTokens, PasswordResets, RedisResetTokens,
    ResetTokenStore,
};
use internship_api::auth::JwtVerifier;
use internship_api::config::{Backend, Config, HostedConfig};
use internship_api::db::{create_pool, ensure_schema};
use internship_api::routes::build_router;
use internship_api::state::AppState;
use internship_api::storage::{MemoryObjectStorage, ObjectStorage, S3ObjectStorage};
use internship_api::store::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use internship_api::workflow::{Buckets, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Internship API v{}", env!("CARGO_PKG_VERSION"));

    let (store, storage, reset_tokens): (
        Arc<dyn DocumentStore>,
        Arc<dyn ObjectStorage>,
        Arc<dyn ResetTokenStore>,
    ) = match &config.backend {
        Backend::Hosted(hosted) => {
            // Initialize PostgreSQL
            let pool = create_pool(&hosted.database_url).await?;
            ensure_schema(&pool).await?;

            // Initialize Redis
            let redis = redis::Client::open(hosted.redis_url.clone())?;
            info!("Redis client initialized");

            // Initialize S3 / MinIO
            let s3 = build_s3_client(hosted).await;
            info!("S3 client initialized");

            (
                Arc::new(PgDocumentStore::new(pool)),
                Arc::new(S3ObjectStorage::new(s3, hosted.s3_endpoint.clone())),
                Arc::new(RedisResetTokens::new(redis)),
            )
        }
        Backend::Memory => {
            info!("Using in-memory backends; data is lost on restart");
            (
                Arc::new(MemoryDocumentStore::new()),
                Arc::new(MemoryObjectStorage::new()),
                Arc::new(MemoryResetTokens::new()),
            )
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.mail_relay_url {
        Some(url) => {
            info!("Reset mail goes through relay {url}");
            Arc::new(HttpMailer::new(url.clone()))
        }
        None => Arc::new(LogMailer),
    };

    let workflow = Workflow::new(
        store.clone(),
        storage,
        Buckets {
            submissions: config.submissions_bucket.clone(),
            tasks: config.tasks_bucket.clone(),
        },
    );

    // Build app state
    let state = AppState {
        store: store.clone(),
        workflow,
        tokens: Arc::new(JwtVerifier::new(&config.jwt_secret)),
        resets: Arc::new(PasswordResets::new(
            reset_tokens,
            mailer,
            config.reset_link_base.clone(),
        )),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the portal frontend

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &HostedConfig) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "internship-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.s3_region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
