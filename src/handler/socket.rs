//! Realtime push channel. The capture client joins a room, then sends each
//! encoded media chunk as one binary frame. Joined clients get every session
//! status transition back as a `status` event.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    handler::AppState,
    session::{PushOutcome, SessionController, SessionSnapshot},
};

const JOIN_ROOM_EVENT: &str = "join_stream_room";

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct ClientEvent {
    event: String,
    room: Option<String>,
}

#[derive(Debug, PartialEq)]
enum FrameAction {
    Reply(String),
    Continue,
    Close,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    log::info!("push channel connected");
    let (mut sender, mut receiver) = socket.split();
    let mut transitions = state.controller.subscribe();
    let mut room = None;

    loop {
        let reply = tokio::select! {
            message = receiver.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        log::debug!("push channel error: {}", e);
                        break;
                    }
                    None => break,
                };
                match handle_frame(&state.controller, &mut room, message) {
                    FrameAction::Reply(text) => Some(text),
                    FrameAction::Continue => None,
                    FrameAction::Close => break,
                }
            }
            transition = transitions.recv() => match transition {
                Ok(snapshot) => room.as_ref().map(|_| status_event(&snapshot)),
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("push channel missed {} status transitions", skipped);
                    None
                }
                Err(RecvError::Closed) => break,
            },
        };

        if let Some(text) = reply {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    }

    log::info!("push channel closed (room {:?})", room);
}

fn status_event(snapshot: &SessionSnapshot) -> String {
    serde_json::json!({ "event": "status", "session": snapshot }).to_string()
}

fn handle_frame(
    controller: &SessionController,
    room: &mut Option<String>,
    message: Message,
) -> FrameAction {
    match message {
        Message::Binary(chunk) => {
            let len = chunk.len();
            match controller.push_chunk(chunk) {
                PushOutcome::Accepted => {}
                outcome => log::trace!("chunk of {} bytes not accepted: {:?}", len, outcome),
            }
            FrameAction::Continue
        }
        Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(ClientEvent {
                event,
                room: Some(joined),
            }) if event == JOIN_ROOM_EVENT => {
                log::info!("push channel joined room {}", joined);
                let reply = serde_json::json!({ "event": "joined", "room": joined });
                *room = Some(joined);
                FrameAction::Reply(reply.to_string())
            }
            _ => {
                log::debug!("ignoring push channel text frame: {}", text.as_str());
                FrameAction::Continue
            }
        },
        Message::Close(_) => FrameAction::Close,
        Message::Ping(_) | Message::Pong(_) => FrameAction::Continue,
    }
}
