//! Chat server example
//!
//! Run with: cargo run -p chat-server
//!
//! Then connect a WAMP v1 client to ws://127.0.0.1:8080 and:
//! - CALL `http://example.com/calc#add` with numbers to sum them
//! - CALL `http://example.com/echo` to get the arguments back
//! - SUBSCRIBE and PUBLISH to `http://example.com/chat/<room>`

use wampkit::prelude::*;

/// A chat line as delivered to subscribers
#[derive(Debug, Serialize, Deserialize)]
struct ChatLine {
    room: String,
    from: String,
    text: Value,
}

/// Chat rooms, one topic per room
struct Chat;

impl TopicHandler for Chat {
    fn on_subscribe(
        &self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        request: &WampMessageRequest,
    ) -> Result<()> {
        info!(
            session = %connection.session_id(),
            room = request.param("room").unwrap_or_default(),
            members = topic.count(),
            "Joined room"
        );
        Ok(())
    }

    fn on_unsubscribe(
        &self,
        connection: &WampConnectionRef,
        _topic: &Arc<Topic>,
        request: &WampMessageRequest,
    ) -> Result<()> {
        info!(
            session = %connection.session_id(),
            room = request.param("room").unwrap_or_default(),
            "Left room"
        );
        Ok(())
    }

    fn on_publish(
        &self,
        connection: &WampConnectionRef,
        topic: &Arc<Topic>,
        request: &WampMessageRequest,
        event: &Value,
        exclude: &[String],
        eligible: &[String],
    ) -> Result<()> {
        let line = ChatLine {
            room: request.param("room").unwrap_or_default().to_string(),
            from: connection.session_id().to_string(),
            text: event.clone(),
        };
        let delivered = topic.broadcast(&line, exclude, eligible)?;
        debug!(room = %line.room, delivered, "Broadcast chat line");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    WampServer::from_env()?
        .rpc(
            "http://example.com/calc#add",
            rpc_fn(|connection, call_id, _request, params| {
                let sum: f64 = params.iter().filter_map(Value::as_f64).sum();
                connection.call_result(call_id, Some(&sum))
            }),
        )
        .rpc(
            "http://example.com/echo",
            rpc_fn(|connection, call_id, _request, params| {
                connection.call_result(call_id, Some(params))
            }),
        )
        .topic("http://example.com/chat/{room}", Chat)
        .run()
        .await
}
