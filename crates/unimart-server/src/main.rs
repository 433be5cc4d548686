mod bootstrap;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use unimart_api::auth::{self, AppState, AppStateInner};
use unimart_api::middleware::{require_admin, require_auth};
use unimart_api::{admin, listings, members, messages, negotiations, uploads};
use unimart_db::Database;
use unimart_gateway::connection;
use unimart_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unimart=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and seed the bootstrap master admin
    let db = Arc::new(Database::open(&config.db_path)?);
    bootstrap::seed_master_admin(&db, &config)?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret: config.jwt_secret.clone(),
        email_domain: config.email_domain.clone(),
        upload_dir: config.upload_dir.clone(),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/admin/login", post(auth::admin_login))
        .with_state(app_state.clone());

    let member_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/members/me", patch(members::update_me))
        .route("/members/{member_id}", get(members::get_member))
        .route(
            "/listings",
            get(listings::list_listings).post(listings::create_listing),
        )
        .route(
            "/listings/{listing_id}",
            get(listings::get_listing).delete(listings::delete_listing),
        )
        .route(
            "/negotiations",
            get(negotiations::list_negotiations).post(negotiations::create_negotiation),
        )
        .route(
            "/negotiations/{negotiation_id}/accept",
            post(negotiations::accept_negotiation),
        )
        .route(
            "/negotiations/{negotiation_id}/reject",
            post(negotiations::reject_negotiation),
        )
        .route(
            "/negotiations/{negotiation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/uploads/{filename}", post(uploads::upload_image))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state.clone());

    let admin_routes = Router::new()
        .route("/admin/members", get(admin::list_members))
        .route("/admin/members/{member_id}", delete(admin::delete_member))
        .route("/admin/listings", get(admin::list_listings))
        .route("/admin/listings/{listing_id}", delete(admin::delete_listing))
        .route("/admin/grants", post(admin::create_grant))
        .route(
            "/admin/grants/{member_id}/promote",
            post(admin::promote_grant),
        )
        .route("/admin/grants/{member_id}/demote", post(admin::demote_grant))
        .route("/admin/grants/{member_id}", delete(admin::remove_grant))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_admin,
        ))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state.clone());

    let gateway_state = GatewayState {
        dispatcher: dispatcher.clone(),
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
    };
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(member_routes)
        .merge(admin_routes)
        .merge(ws_route)
        .nest_service("/media", ServeDir::new(&config.upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("unimart server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret)
    })
}
