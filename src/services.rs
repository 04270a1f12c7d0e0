use std::io::{self, Read};
use std::sync::Arc;
use std::thread;

use serde_json::{Value, json};
use tiny_http::{Header, Method, Request, Response, Server};

use crate::{create_breadcrumb, create_echo_token, BotPatch, Config, ConversationStore, Orchestrator};

const PROCESSING_ERROR: &str = "A processing error occurred";

/// Everything a request handler needs, shared across request threads.
pub(crate) struct ServiceState {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) store: Arc<ConversationStore>,
    pub(crate) config: Arc<Config>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ApiResponse {
    pub(crate) status: u16,
    pub(crate) body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: json!({"error": "Not found"}),
        }
    }

    fn failed(route: &str, err: &dyn std::fmt::Display) -> Self {
        tracing::warn!(route, error = %err, "request failed");
        Self {
            status: 500,
            body: json!({"error": PROCESSING_ERROR}),
        }
    }
}

pub(crate) fn parse_json_body(request: &mut Request) -> Result<Value, String> {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .map_err(|e| format!("read body: {e}"))?;
    if body.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&body).map_err(|e| format!("json: {e}"))
}

/// Value of one `key=value` pair in the query string, percent-decoded.
fn query_param(url: &str, key: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| decode_segment(&v.replace('+', " ")))
}

fn respond_with<T: serde::Serialize, E: std::fmt::Display>(route: &str, result: Result<T, E>) -> ApiResponse {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(body) => ApiResponse::ok(body),
            Err(err) => ApiResponse::failed(route, &err),
        },
        Err(err) => ApiResponse::failed(route, &err),
    }
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Dispatches one request to its handler. Pure apart from the state it is
/// given, so routes can be exercised without a socket.
pub(crate) fn route_request(state: &ServiceState, method: &Method, url: &str, body: &Value, remote: &str) -> ApiResponse {
    let path = url.split('?').next().unwrap_or("").trim_end_matches('/');
    let segments: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode_segment)
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    let token = create_echo_token();
    let breadcrumb = create_breadcrumb(&token, remote);
    tracing::debug!(%method, path, correlation_id = %breadcrumb.correlation_id, "request");

    let registry = state.orchestrator.registry();
    match (method, segments.as_slice()) {
        (Method::Get, ["api", "echo"]) => ApiResponse::ok(json!(registry.get_names())),
        (Method::Post, ["api", "echo", "message", channel_id]) => {
            let (Some(user), Some(text)) = (body.get("user").and_then(Value::as_str), body.get("text").and_then(Value::as_str)) else {
                return ApiResponse::failed("handle_message", &"body must carry user and text");
            };
            match state.orchestrator.handle_text(channel_id, user, text) {
                Ok(reply) => ApiResponse::ok(json!(reply)),
                Err(err) => ApiResponse::failed("handle_message", &err),
            }
        }
        (Method::Get, ["api", "echo", agent, action]) => match registry.action_info(agent, action) {
            Some(info) => match serde_json::to_value(info) {
                Ok(value) => ApiResponse::ok(value),
                Err(err) => ApiResponse::failed("get_action", &err),
            },
            None => ApiResponse::not_found(),
        },
        (Method::Get, ["api", "conversation"]) => match state.store.get_conversations(&token) {
            Ok(list) => ApiResponse::ok(json!(list)),
            Err(err) => ApiResponse::failed("get_conversations", &err),
        },
        (Method::Get, ["api", "conversation", channel_id]) => {
            match state.store.get_conversation(channel_id, &token, &breadcrumb) {
                Ok(conversation) => ApiResponse::ok(json!(conversation)),
                Err(err) => ApiResponse::failed("get_conversation", &err),
            }
        }
        (Method::Get, ["api", "config"]) => ApiResponse::ok(state.config.to_public_value(&token)),
        (Method::Get, ["api", "bot"]) => {
            let query = query_param(url, "query");
            respond_with("get_bots", state.store.get_bots(query.as_deref(), &token))
        }
        (Method::Get, ["api", "bot", bot_id]) => respond_with("get_bot", state.store.get_bot(bot_id, &token)),
        (Method::Patch, ["api", "bot", bot_id]) => {
            let patch = match serde_json::from_value::<BotPatch>(body.clone()) {
                Ok(patch) => patch,
                Err(err) => return ApiResponse::failed("update_bot", &err),
            };
            respond_with("update_bot", state.store.update_bot(bot_id, &patch, &token, &breadcrumb))
        }
        (Method::Get, ["api", "bot", bot_id, "channels"]) => {
            respond_with("get_channels", state.store.get_channels(bot_id, &token))
        }
        (Method::Post, ["api", "bot", bot_id, "channel", channel_id]) => respond_with(
            "add_channel",
            state.store.add_channel(bot_id, channel_id, &token, &breadcrumb),
        ),
        (Method::Delete, ["api", "bot", bot_id, "channel", channel_id]) => respond_with(
            "remove_channel",
            state.store.remove_channel(bot_id, channel_id, &token, &breadcrumb),
        ),
        _ => ApiResponse::not_found(),
    }
}

fn respond(mut request: Request, state: &ServiceState) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let remote = request
        .remote_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let response = match method {
        Method::Post | Method::Patch => match parse_json_body(&mut request) {
            Ok(body) => route_request(state, &method, &url, &body, &remote),
            Err(err) => ApiResponse::failed("parse_body", &err),
        },
        _ => route_request(state, &method, &url, &Value::Null, &remote),
    };
    let body = serde_json::to_string(&response.body).unwrap_or_else(|_| "{}".to_string());
    let mut reply = Response::from_string(body).with_status_code(response.status);
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        reply = reply.with_header(header);
    }
    if let Err(err) = request.respond(reply) {
        tracing::warn!(%url, error = %err, "failed to write response");
    }
}

/// Serves the API until the listener fails. Each request runs on its own
/// thread so a slow model call does not block other channels.
pub(crate) fn run_server(state: ServiceState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state.config.bind_addr();
    let server = Server::http(&addr).map_err(|e| io::Error::other(format!("server: {e}")))?;
    tracing::info!(%addr, bot = state.orchestrator.bot_name(), "echo API listening");
    let state = Arc::new(state);
    for request in server.incoming_requests() {
        let state = state.clone();
        thread::spawn(move || respond(request, &state));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_registry, FileConfig, MockLlmClient, DEFAULT_BOT_ID};

    fn state(reply: &str) -> ServiceState {
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let config = Arc::new(Config::resolve(&FileConfig::default(), &|_| None).unwrap());
        let registry = build_registry(store.clone(), config.clone()).unwrap();
        let llm = Arc::new(MockLlmClient {
            replies: vec![reply.to_string()],
        });
        ServiceState {
            orchestrator: Arc::new(Orchestrator::new("Echo", registry, llm)),
            store,
            config,
        }
    }

    #[test]
    fn lists_agents() {
        let state = state("From:Echo To:group hi");
        let response = route_request(&state, &Method::Get, "/api/echo", &Value::Null, "127.0.0.1");
        assert_eq!(response, ApiResponse::ok(json!(["echo", "bot", "conversation", "config"])));
    }

    #[test]
    fn bot_routes() {
        let state = state("From:Echo To:group hi");
        let token = create_echo_token();
        state
            .store
            .ensure_bot(DEFAULT_BOT_ID, "Echo", "Test bot", &token, &create_breadcrumb(&token, "test"))
            .unwrap();
        let base = format!("/api/bot/{DEFAULT_BOT_ID}");

        let listed = route_request(&state, &Method::Get, "/api/bot?query=%5EEc", &Value::Null, "127.0.0.1");
        assert_eq!(listed.body[0]["_id"], DEFAULT_BOT_ID);
        let none = route_request(&state, &Method::Get, "/api/bot?query=Fran", &Value::Null, "127.0.0.1");
        assert_eq!(none, ApiResponse::ok(json!([])));

        let added = route_request(&state, &Method::Post, &format!("{base}/channel/general"), &json!({}), "127.0.0.1");
        assert_eq!(added, ApiResponse::ok(json!(["general"])));
        let channels = route_request(&state, &Method::Get, &format!("{base}/channels"), &Value::Null, "127.0.0.1");
        assert_eq!(channels, ApiResponse::ok(json!(["general"])));
        let removed = route_request(&state, &Method::Delete, &format!("{base}/channel/general"), &Value::Null, "127.0.0.1");
        assert_eq!(removed, ApiResponse::ok(json!([])));

        let patched = route_request(&state, &Method::Patch, &base, &json!({"name": "Echo Two"}), "10.1.1.1");
        assert_eq!(patched.body["name"], "Echo Two");
        assert_eq!(patched.body["last_saved"]["fromIp"], "10.1.1.1");
        let fetched = route_request(&state, &Method::Get, &base, &Value::Null, "127.0.0.1");
        assert_eq!(fetched.body["name"], "Echo Two");
    }

    #[test]
    fn unknown_bot_is_a_processing_error() {
        let state = state("From:Echo To:group hi");
        let response = route_request(&state, &Method::Get, "/api/bot/missing", &Value::Null, "127.0.0.1");
        assert_eq!(response.status, 500);
        assert_eq!(response.body, json!({"error": "A processing error occurred"}));
    }

    #[test]
    fn action_info_or_404() {
        let state = state("From:Echo To:group hi");
        let found = route_request(&state, &Method::Get, "/api/echo/echo/get_agents", &Value::Null, "127.0.0.1");
        assert_eq!(found.status, 200);
        assert_eq!(found.body["name"], "get_agents");
        let missing = route_request(&state, &Method::Get, "/api/echo/echo/nope", &Value::Null, "127.0.0.1");
        assert_eq!(missing.status, 404);
    }

    #[test]
    fn message_runs_the_turn_loop() {
        let state = state("From:Echo To:group Hello Mike");
        let body = json!({"user": "Mike", "text": "Hi"});
        let response = route_request(&state, &Method::Post, "/api/echo/message/general", &body, "127.0.0.1");
        assert_eq!(response, ApiResponse::ok(json!("Hello Mike")));
        let conversation = route_request(&state, &Method::Get, "/api/conversation/general", &Value::Null, "127.0.0.1");
        assert_eq!(conversation.body["messages"].as_array().unwrap().len(), 2);
        let listed = route_request(&state, &Method::Get, "/api/conversation", &Value::Null, "127.0.0.1");
        assert_eq!(listed.body[0]["channel_id"], "general");
    }

    #[test]
    fn failures_are_generic() {
        let state = state("From:Echo To:group hi");
        let response = route_request(&state, &Method::Post, "/api/echo/message/general", &json!({}), "127.0.0.1");
        assert_eq!(response.status, 500);
        assert_eq!(response.body, json!({"error": "A processing error occurred"}));
        let bad_command = json!({"user": "Mike", "text": "/echo/ping/not json"});
        let response = route_request(&state, &Method::Post, "/api/echo/message/general", &bad_command, "127.0.0.1");
        assert_eq!(response.body, json!({"error": "A processing error occurred"}));
    }

    #[test]
    fn config_is_masked_and_paths_are_decoded() {
        let state = state("From:Echo To:group hi");
        let config = route_request(&state, &Method::Get, "/api/config", &Value::Null, "127.0.0.1");
        assert!(config.body["config_items"].is_array());
        let conversation = route_request(&state, &Method::Get, "/api/conversation/my%20channel", &Value::Null, "127.0.0.1");
        assert_eq!(conversation.body["channel_id"], "my channel");
        let unknown = route_request(&state, &Method::Put, "/api/echo", &Value::Null, "127.0.0.1");
        assert_eq!(unknown.status, 404);
    }
}
