use actix_web::HttpResponse;
use actix_web::Responder;
use actix_web::web;
use pb_core::SearchError;
use pb_session::SessionManager;
use pb_session::TaskId;
use serde::Deserialize;
use std::sync::Arc;

type Manager = web::Data<Arc<SessionManager>>;

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Map error kinds onto the status codes the API contract names.
fn fault(error: SearchError) -> HttpResponse {
    let body = serde_json::json!({ "message": error.to_string() });
    match error {
        SearchError::NotFound(_) => HttpResponse::NotFound().json(body),
        SearchError::Conflict(_) => HttpResponse::Conflict().json(body),
        SearchError::InvalidState(_) => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "prismbench-search",
    }))
}

pub async fn initialize(manager: Manager, req: web::Json<InitializeRequest>) -> impl Responder {
    match manager.initialize(&req.session_id).await {
        Err(e) => fault(e),
        Ok(size) => HttpResponse::Ok().json(serde_json::json!({
            "session_id": req.session_id,
            "tree_size": size,
            "message": "session initialized",
        })),
    }
}

pub async fn session(manager: Manager, path: web::Path<String>) -> impl Responder {
    let session_id = path.into_inner();
    match manager.session_size(&session_id).await {
        Err(e) => fault(e),
        Ok(size) => HttpResponse::Ok().json(serde_json::json!({
            "session_id": session_id,
            "tree_size": size,
            "message": "session active",
        })),
    }
}

pub async fn run(manager: Manager, req: web::Json<RunRequest>) -> impl Responder {
    match manager.run(req.session_id.clone()).await {
        Err(e) => fault(e),
        Ok(view) => HttpResponse::Accepted().json(serde_json::json!({
            "task_id": view.task_id,
            "session_id": view.session_id,
            "phases": view.phases,
            "message": "task started",
        })),
    }
}

pub async fn stop(manager: Manager, path: web::Path<String>) -> impl Responder {
    let Ok(task_id) = path.into_inner().parse::<TaskId>() else {
        return fault(SearchError::NotFound("task".into()));
    };
    match manager.stop(task_id).await {
        Err(e) => fault(e),
        Ok(view) => HttpResponse::Ok().json(serde_json::json!({
            "task_id": view.task_id,
            "session_id": view.session_id,
            "phases": view.phases,
            "message": "cancellation requested",
        })),
    }
}

pub async fn status(manager: Manager) -> impl Responder {
    let views = manager.status().await;
    match views.is_empty() {
        true => HttpResponse::Ok().json(serde_json::json!({ "message": "no tasks" })),
        false => HttpResponse::Ok().json(serde_json::json!({ "tasks": views })),
    }
}

pub async fn task(manager: Manager, path: web::Path<String>) -> impl Responder {
    let Ok(task_id) = path.into_inner().parse::<TaskId>() else {
        return fault(SearchError::NotFound("task".into()));
    };
    match manager.task(task_id).await {
        Err(e) => fault(e),
        Ok(view) => HttpResponse::Ok().json(serde_json::json!({
            "task_id": view.task_id,
            "session_id": view.session_id,
            "status": view.status,
            "phases": view.phases,
            "message": "ok",
        })),
    }
}

pub async fn tree(manager: Manager, path: web::Path<String>) -> impl Responder {
    match manager.tree(&path.into_inner()).await {
        Err(e) => fault(e),
        Ok(view) => HttpResponse::Ok().json(view),
    }
}
