use anyhow::{anyhow, Result};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, options, post, routes, Build, Request, Responder, Response, Rocket, State};
use serde::Serialize;

use common::Config;

use crate::history::{ResearchPayload, ResearchRecord};
use crate::research::{ResearchError, ResearchQuery, Researcher};

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub researcher: Researcher,
}

/// Body of every error reply.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Responder)]
enum ApiError {
    #[response(status = 400)]
    BadRequest(Json<ErrorBody>),
    #[response(status = 404)]
    NotFound(Json<ErrorBody>),
    #[response(status = 500)]
    Internal(Json<ErrorBody>),
}

impl ApiError {
    fn not_found(detail: &str) -> Self {
        ApiError::NotFound(Json(ErrorBody {
            detail: detail.to_string(),
        }))
    }

    fn internal(e: &anyhow::Error) -> Self {
        ApiError::Internal(Json(ErrorBody {
            detail: format!("{:#}", e),
        }))
    }
}

impl From<ResearchError> for ApiError {
    fn from(e: ResearchError) -> Self {
        match e {
            ResearchError::InvalidQuery(msg) => ApiError::BadRequest(Json(ErrorBody { detail: msg })),
            ResearchError::NoResults => ApiError::not_found("No search results found"),
            ResearchError::Internal(e) => ApiError::internal(&e),
        }
    }
}

/// Liveness probe.
#[get("/")]
fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "API is live" }))
}

/// Search, scrape, summarize and store one query.
#[post("/research", data = "<body>")]
async fn research(state: &State<AppState>, body: Json<ResearchQuery>) -> Result<Json<ResearchPayload>, ApiError> {
    match state.researcher.run(&body).await {
        Ok(payload) => Ok(Json(payload)),
        Err(ResearchError::Internal(e)) => {
            tracing::error!("research failed: {:#}", e);
            Err(ApiError::internal(&e))
        }
        Err(e) => Err(e.into()),
    }
}

#[get("/history")]
async fn history(state: &State<AppState>) -> Result<Json<Vec<ResearchRecord>>, ApiError> {
    state.researcher.history.list_all().await.map(Json).map_err(|e| {
        tracing::error!("failed to list history: {:#}", e);
        ApiError::internal(&e)
    })
}

/// Ids that do not parse can never have been issued, so they are "not found" too.
#[get("/history/<id>")]
async fn history_item(state: &State<AppState>, id: &str) -> Result<Json<ResearchRecord>, ApiError> {
    let Ok(id) = id.parse::<i64>() else {
        return Err(ApiError::not_found("Not found"));
    };

    match state.researcher.history.get(id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::not_found("Not found")),
        Err(e) => {
            tracing::error!("failed to load history record {}: {:#}", id, e);
            Err(ApiError::internal(&e))
        }
    }
}

/// CORS preflight for every path; the headers come from [`Cors`].
#[options("/<_..>")]
fn preflight() -> Status {
    Status::NoContent
}

#[catch(404)]
fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody {
        detail: "Not found".to_string(),
    })
}

#[catch(default)]
fn default_catcher(status: Status, _req: &Request<'_>) -> Json<ErrorBody> {
    Json(ErrorBody {
        detail: status.reason().unwrap_or("Error").to_string(),
    })
}

/// Adds CORS headers for allowed browser origins. An entry of `"*"` allows any origin.
pub struct Cors {
    allowed_origins: Vec<String>,
}

impl Cors {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    fn allow_origin(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_string())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_string())
        } else {
            None
        }
    }
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let Some(origin) = req.headers().get_one("Origin") else {
            return;
        };
        let Some(allowed) = self.allow_origin(origin) else {
            tracing::debug!("cors: origin {} not allowed", origin);
            return;
        };

        if allowed != "*" {
            res.set_header(Header::new("Vary", "Origin"));
        }
        res.set_header(Header::new("Access-Control-Allow-Origin", allowed));
        res.set_header(Header::new("Access-Control-Allow-Methods", "GET, POST, OPTIONS"));
        let requested_headers = req
            .headers()
            .get_one("Access-Control-Request-Headers")
            .unwrap_or("*")
            .to_string();
        res.set_header(Header::new("Access-Control-Allow-Headers", requested_headers));
    }
}

/// Assemble the Rocket instance with managed state, routes, catchers and CORS.
pub fn build_rocket(figment: Figment, researcher: Researcher, allowed_origins: Vec<String>) -> Rocket<Build> {
    let state = AppState { researcher };

    rocket::custom(figment)
        .manage(state)
        .attach(Cors::new(allowed_origins))
        .mount("/", routes![index, research, history, history_item, preflight])
        .register("/", catchers![not_found, default_catcher])
}

/// Build and launch the Rocket server, binding to `[server] bind/port` from the config.
///
/// This function blocks until the Rocket server shuts down and returns an error if
/// Rocket fails to start.
pub async fn launch_rocket(config: &Config, researcher: Researcher) -> Result<()> {
    let server = config.server.clone().unwrap_or_default();
    let figment = rocket::Config::figment()
        .merge(("address", server.bind.unwrap_or_else(|| "0.0.0.0".to_string())))
        .merge(("port", server.port.unwrap_or(8000)));

    let rocket = build_rocket(figment, researcher, config.allowed_origins());

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
