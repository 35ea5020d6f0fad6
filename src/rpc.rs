//! HTTP façade. `POST /utils/script/evaluate/{address}` serves the cached
//! result for a registered request or admits a one-shot evaluation; the
//! handlers talk to the request registry directly, never to the events
//! actor.

use actix::prelude::*;
use actix_web::{web, HttpResponse};
use log::{error, info};
use serde_json::{json, Value};

use std::str::FromStr;
use std::sync::Arc;

use crate::blockchain::SharedBlockchainData;
use crate::common::{Address, API_ERR_CUSTOM_VALIDATION};
use crate::registry::Registry;

#[derive(Clone)]
struct RpcState {
    registry: Registry,
    shared: Arc<SharedBlockchainData>,
}

async fn evaluate(
    state: web::Data<RpcState>, path: web::Path<String>,
    body: web::Json<Value>,
) -> HttpResponse {
    let address = match Address::from_str(&path) {
        Ok(a) => a,
        Err(()) => {
            return HttpResponse::BadRequest().json(json!({
                "error": API_ERR_CUSTOM_VALIDATION,
                "message": format!("invalid address: {}", path),
            }))
        }
    };
    let result = state
        .registry
        .cached_or_run(address, body.into_inner())
        .await;
    // dApp-absence and friends come back as a validation envelope
    if result.get("error").and_then(Value::as_i64)
        == Some(API_ERR_CUSTOM_VALIDATION as i64)
    {
        HttpResponse::BadRequest().json(result)
    } else {
        HttpResponse::Ok().json(result)
    }
}

async fn status(state: web::Data<RpcState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "height": state.shared.height(),
        "scripts": state.registry.script_count(),
    }))
}

pub struct RpcServer {
    bind_addr: String,
    registry: Registry,
    shared: Arc<SharedBlockchainData>,
}

impl RpcServer {
    pub fn new(
        bind_addr: &str, registry: &Registry,
        shared: &Arc<SharedBlockchainData>,
    ) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            registry: registry.clone(),
            shared: shared.clone(),
        }
    }
}

impl Actor for RpcServer {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("rpc server listening on {}", self.bind_addr);
        let state = RpcState {
            registry: self.registry.clone(),
            shared: self.shared.clone(),
        };
        match actix_web::HttpServer::new(move || {
            let cors = actix_cors::Cors::permissive();
            actix_web::App::new()
                .wrap(cors)
                .app_data(web::Data::new(state.clone()))
                .route(
                    "/utils/script/evaluate/{address}",
                    web::post().to(evaluate),
                )
                .route("/status", web::get().to(status))
        })
        .bind(&self.bind_addr)
        {
            Err(e) => error!("bind error: {}", e),
            Ok(server) => {
                let fut = async move {
                    if let Err(e) = server.run().await {
                        error!("server returns: {}", e);
                    }
                }
                .into_actor(self);
                ctx.wait(fut);
            }
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("rpc server stopped");
    }
}
