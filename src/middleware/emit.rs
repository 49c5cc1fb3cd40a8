//! Emit-after-response: publish a change notification only once a handler has
//! produced a successful response.
//!
//! ```ignore
//! let recipes = EntityEmitters::new(&publisher, "recipe")?;
//! let app = Router::new()
//!     .route("/recipes", post(create_recipe)
//!         .route_layer(from_fn_with_state(recipes.created, emit_after_response)))
//!     .route("/recipes/:id", delete(delete_recipe)
//!         .route_layer(from_fn_with_state(recipes.deleted, emit_after_response)));
//! ```
//!
//! The response body is buffered to build the payload, so use it on JSON
//! handlers only, never on streaming responses.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{RawPathParams, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::models::channel::Channel;
use crate::models::notification::entity_payload;
use crate::services::publisher::EventPublisher;

/// Authenticated user id. The API's auth layer puts it in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

/// What a payload builder sees of the request behind a response.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Matched path parameters, e.g. `id` for `/recipes/:id`.
    pub params: HashMap<String, String>,
    pub actor: Option<Actor>,
}

impl RequestContext {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.0.as_str())
    }
}

type BuildFn = dyn Fn(&RequestContext, &Value) -> Option<Value> + Send + Sync;

/// Middleware state: which channel to publish on and how to build the event body.
///
/// The builder gets the request context and the decoded JSON response body
/// (`null` for empty or non-JSON bodies). Returning `None` skips the event.
#[derive(Clone)]
pub struct EmitAfterResponse {
    publisher: EventPublisher,
    channel: Channel,
    build: Arc<BuildFn>,
}

impl EmitAfterResponse {
    pub fn new<F>(publisher: EventPublisher, channel: Channel, build: F) -> Self
    where
        F: Fn(&RequestContext, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            publisher,
            channel,
            build: Arc::new(build),
        }
    }

    /// Publish the response body unchanged.
    pub fn body(publisher: EventPublisher, channel: Channel) -> Self {
        Self::new(publisher, channel, |_, body| Some(body.clone()))
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

/// Run the handler, then publish if the response is 2xx.
pub async fn emit_after_response(
    State(emit): State<EmitAfterResponse>,
    params: Option<RawPathParams>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext {
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        params: params
            .map(|p| p.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            .unwrap_or_default(),
        actor: request.extensions().get::<Actor>().cloned(),
    };

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            warn!(channel = %emit.channel, error = %e, "response body unreadable, event skipped");
            return Response::from_parts(parts, Body::empty());
        }
    };
    let data = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);
    match (emit.build)(&ctx, &data) {
        Some(event) => emit.publisher.publish(&emit.channel, &event),
        None => debug!(channel = %emit.channel, path = %ctx.path, "nothing to emit"),
    }
    Response::from_parts(parts, Body::from(bytes))
}

/// `<entity>:created|updated|deleted` emitters with the standard entity body.
#[derive(Clone)]
pub struct EntityEmitters {
    /// Id from the response body (`_id` or `id`), snapshot is the body.
    pub created: EmitAfterResponse,
    /// Id from the `id` path parameter, else the body; snapshot is the body.
    pub updated: EmitAfterResponse,
    /// Id from the `id` path parameter; no snapshot.
    pub deleted: EmitAfterResponse,
}

impl EntityEmitters {
    pub fn new(publisher: &EventPublisher, entity: &str) -> AppResult<Self> {
        Ok(Self {
            created: entity_emitter(publisher, entity, "created", created_id, true)?,
            updated: entity_emitter(publisher, entity, "updated", updated_id, true)?,
            deleted: entity_emitter(publisher, entity, "deleted", deleted_id, false)?,
        })
    }
}

type PickId = fn(&RequestContext, &Value) -> Option<String>;

fn entity_emitter(
    publisher: &EventPublisher,
    entity: &str,
    verb: &str,
    pick: PickId,
    with_snapshot: bool,
) -> AppResult<EmitAfterResponse> {
    let channel = Channel::for_entity(entity, verb)?;
    let entity = entity.to_string();
    Ok(EmitAfterResponse::new(publisher.clone(), channel, move |ctx, body| {
        let id = pick(ctx, body)?;
        let snapshot = with_snapshot.then(|| body.clone());
        Some(entity_payload(&entity, &id, snapshot, ctx.actor_id()))
    }))
}

fn created_id(_: &RequestContext, body: &Value) -> Option<String> {
    body_id(body)
}

fn updated_id(ctx: &RequestContext, body: &Value) -> Option<String> {
    ctx.param("id").map(str::to_string).or_else(|| body_id(body))
}

fn deleted_id(ctx: &RequestContext, _: &Value) -> Option<String> {
    ctx.param("id").map(str::to_string)
}

fn body_id(body: &Value) -> Option<String> {
    ["_id", "id"].iter().find_map(|key| match body.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::publisher::tests::RecordingSink;
    use axum::http::StatusCode;
    use axum::middleware::from_fn_with_state;
    use axum::routing::{delete, post, put};
    use axum::{Extension, Json, Router};
    use serde_json::json;
    use tower::util::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let req = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn created_publishes_body_after_success() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        let recipes = EntityEmitters::new(&publisher, "recipe").unwrap();
        let app = Router::new()
            .route(
                "/recipes",
                post(|| async {
                    (StatusCode::CREATED, Json(json!({ "_id": "r1", "title": "Pho" })))
                })
                .route_layer(from_fn_with_state(recipes.created, emit_after_response)),
            )
            .layer(Extension(Actor("u1".to_string())));

        let (status, body) = call(app, "POST", "/recipes").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "_id": "r1", "title": "Pho" }));
        task.shutdown().await;

        assert_eq!(
            sink.sent(),
            vec![(
                Channel::RecipeCreated,
                json!({
                    "recipeId": "r1",
                    "recipe": { "_id": "r1", "title": "Pho" },
                    "authorId": "u1"
                })
            )]
        );
    }

    #[tokio::test]
    async fn failed_response_publishes_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        let blogs = EntityEmitters::new(&publisher, "blog").unwrap();
        let app = Router::new().route(
            "/blogs",
            post(|| async { (StatusCode::BAD_REQUEST, Json(json!({ "error": "title required" }))) })
                .route_layer(from_fn_with_state(blogs.created, emit_after_response)),
        );

        let (status, body) = call(app, "POST", "/blogs").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "title required" }));
        task.shutdown().await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn updated_and_deleted_take_id_from_path() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        let comments = EntityEmitters::new(&publisher, "comment").unwrap();
        let app = Router::new()
            .route(
                "/comments/:id",
                put(|| async { Json(json!({ "text": "edited" })) })
                    .route_layer(from_fn_with_state(comments.updated, emit_after_response)),
            )
            .route(
                "/comments/:id/remove",
                delete(|| async { StatusCode::NO_CONTENT })
                    .route_layer(from_fn_with_state(comments.deleted, emit_after_response)),
            );

        call(app.clone(), "PUT", "/comments/c7").await;
        let (status, _) = call(app, "DELETE", "/comments/c7/remove").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        task.shutdown().await;

        // No actor in the request: authorId is left out.
        assert_eq!(
            sink.sent(),
            vec![
                (
                    Channel::Other("comment:updated".to_string()),
                    json!({ "commentId": "c7", "comment": { "text": "edited" } })
                ),
                (Channel::CommentDeleted, json!({ "commentId": "c7" })),
            ]
        );
    }

    #[tokio::test]
    async fn missing_id_skips_the_event() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        let recipes = EntityEmitters::new(&publisher, "recipe").unwrap();
        let app = Router::new().route(
            "/recipes",
            post(|| async { Json(json!({ "title": "no id" })) })
                .route_layer(from_fn_with_state(recipes.created, emit_after_response)),
        );

        let (status, _) = call(app, "POST", "/recipes").await;
        assert_eq!(status, StatusCode::OK);
        task.shutdown().await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn body_emitter_forwards_response_as_is() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        let emit = EmitAfterResponse::body(publisher, Channel::FavoriteAdded);
        assert_eq!(emit.channel(), &Channel::FavoriteAdded);
        let app = Router::new().route(
            "/recipes/:id/favorite",
            post(|| async { Json(json!({ "recipeId": "r1", "userId": "u2" })) })
                .route_layer(from_fn_with_state(emit, emit_after_response)),
        );

        call(app, "POST", "/recipes/r1/favorite").await;
        task.shutdown().await;
        assert_eq!(
            sink.sent(),
            vec![(Channel::FavoriteAdded, json!({ "recipeId": "r1", "userId": "u2" }))]
        );
    }

    #[tokio::test]
    async fn invalid_entity_is_rejected() {
        let (publisher, task) = EventPublisher::start(Arc::new(RecordingSink::default()));
        assert!(matches!(
            EntityEmitters::new(&publisher, "re*cipe"),
            Err(crate::error::AppError::InvalidChannel(_))
        ));
        task.shutdown().await;
    }
}
