//! HTTP surface for the search core.
//!
//! One actix-web server exposing session and task lifecycles; the
//! [`SessionManager`] is constructed at startup and injected into every
//! handler through the application data.

pub mod handlers;

use actix_cors::Cors;
use actix_web::App;
use actix_web::HttpServer;
use actix_web::middleware::Logger;
use actix_web::web;
use pb_config::Settings;
use pb_evaluator::EvaluatorClient;
use pb_search::Registry;
use pb_session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

/// Wire up the manager from settings and serve until shutdown.
#[rustfmt::skip]
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let bind = settings.server.bind.clone();
    let evaluator = Arc::new(EvaluatorClient::new(
        settings.server.evaluator_url.clone(),
        Duration::from_secs(settings.server.evaluation_timeout_secs),
    ));
    let manager = web::Data::new(Arc::new(SessionManager::new(
        settings,
        Registry::discover(),
        evaluator,
    )));
    log::info!("starting search core on {}", bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%r %s %Ts"))
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(manager.clone())
            .route("/health", web::get().to(handlers::health))
            .route("/initialize", web::post().to(handlers::initialize))
            .route("/sessions/{session_id}", web::get().to(handlers::session))
            .route("/run", web::post().to(handlers::run))
            .route("/stop/{task_id}", web::post().to(handlers::stop))
            .route("/status", web::get().to(handlers::status))
            .route("/tasks/{task_id}", web::get().to(handlers::task))
            .route("/tree/{session_id}", web::get().to(handlers::tree))
    })
    .bind(bind)?
    .run()
    .await?;
    Ok(())
}
