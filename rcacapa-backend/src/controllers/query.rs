use actix_web::{web, HttpResponse, Responder};
use futures_util::stream;
use rcacapa_types::{ErrorResponse, QueryRequest, QueryResponse};

use crate::ai::streaming::StreamEvent;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/rcacapa-query").route(web::post().to(query)))
        .service(web::resource("/rcacapa-query/stream_plain").route(web::post().to(query_stream_plain)));
}

async fn query(state: web::Data<AppState>, body: web::Json<QueryRequest>) -> impl Responder {
    let request = body.into_inner();
    log::info!(
        "[QUERY] Conversation {} ({} chars)",
        request.conversation_id,
        request.user_query.len()
    );

    match state.router.respond(&request.conversation_id, &request.user_query).await {
        Ok(reply) => HttpResponse::Ok().json(QueryResponse { assistant: reply.text }),
        Err(e) => {
            log::error!(
                "[QUERY] Conversation {} failed for query {:?}: {}",
                request.conversation_id,
                request.user_query,
                e
            );
            HttpResponse::InternalServerError().json(ErrorResponse::new(e.public_message()))
        }
    }
}

/// Plain-text stream of the same reply `/rcacapa-query` returns.
///
/// Headers are sent before the reply exists, so a failure shows up as the
/// generic error text at the end of the body instead of a 500.
async fn query_stream_plain(state: web::Data<AppState>, body: web::Json<QueryRequest>) -> impl Responder {
    let request = body.into_inner();
    log::info!("[QUERY] Streaming conversation {}", request.conversation_id);

    let rx = state.router.respond_stream(request.conversation_id, request.user_query);
    let body = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(StreamEvent::Delta { content }) => {
                Some((Ok::<_, actix_web::Error>(web::Bytes::from(content)), rx))
            }
            Some(StreamEvent::Error { message }) => Some((Ok(web::Bytes::from(message)), rx)),
            Some(StreamEvent::Done) | None => None,
        }
    });

    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .streaming(body)
}
