use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lexicore::{config, db, handlers, remote::MemoryRemote, session::StudySession};

#[tokio::main]
async fn main() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lexicore=debug,tower_http=debug".into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = config::load();
  let pool = db::init_db(&config.database_path).expect("Failed to initialize database");

  // Development backend; a networked RemoteStore plugs in here
  let remote = Arc::new(MemoryRemote::new());
  let session = StudySession::new(pool, remote, config.sync, true).expect("Failed to restore sync state");

  let pending = session.pending_count();
  if pending > 0 {
    tracing::info!("{} mutations waiting from a previous run", pending);
    if let Err(e) = session.sync().on_app_foreground().await {
      tracing::warn!("Startup sync failed: {}", e);
    }
  }

  let app = handlers::router(session);

  let bind_addr = config.bind_addr();
  let listener = tokio::net::TcpListener::bind(&bind_addr)
    .await
    .unwrap_or_else(|_| panic!("Failed to bind to {}", bind_addr));

  tracing::info!("Server running on http://localhost:{}", config.server_port);

  axum::serve(listener, app)
    .await
    .expect("Server failed to start");
}
