use crate::assistant::{send_chat, ChatOptions};
use crate::ipc::error::{chat_err, no_workspace, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::model::{ChatMessage, ChatRole};
use serde_json::json;

fn handle_chat_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let message = match required_str(req, "message") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let user = ChatMessage::new(ChatRole::User, message);
    let mut conversation = store.chat_history();
    conversation.push(user.clone());

    let reply = match send_chat(
        state.chat.as_ref(),
        &store.settings(),
        &conversation,
        &ChatOptions::default(),
    ) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "chat failed");
            return chat_err(&req.id, &e);
        }
    };

    store.push_chat_exchange(user, ChatMessage::new(ChatRole::Assistant, reply.clone()));
    ok(&req.id, json!({ "reply": reply }))
}

fn handle_chat_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let messages = state
        .store
        .as_ref()
        .map(|s| s.chat_history())
        .unwrap_or_default();
    ok(&req.id, json!({ "messages": messages }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chat.send" => Some(handle_chat_send(state, req)),
        "chat.history" => Some(handle_chat_history(state, req)),
        _ => None,
    }
}
