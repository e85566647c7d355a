//! WebSocket handler: token check before upgrade, then one read pump and one
//! write pump per connection.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::handlers::http::AppState;
use crate::middleware::AuthUser;
use crate::models::Event;
use crate::services::{Dispatcher, EventContext, HubHandle, PumpSettings, SessionHandle};

/// GET /ws — upgrade an authenticated request to a chat session.
pub async fn ws_handler(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let limit = state.pump().max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(state, socket, username))
}

async fn handle_socket(state: AppState, socket: WebSocket, username: String) {
    let pump = state.pump().clone();
    let (session, outbound) = SessionHandle::new(username, pump.outbound_queue);
    if let Err(e) = state.hub().register(session.clone()) {
        warn!(username = %session.username(), error = %e, "register failed");
        return;
    }
    info!(username = %session.username(), session_id = %session.id(), "ws connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(
        sink,
        outbound,
        session.clone(),
        state.hub().clone(),
        pump.clone(),
    ));

    let ctx = EventContext::new(
        session.clone(),
        state.hub().clone(),
        state.store().clone(),
        pump.write_wait,
    );
    read_pump(stream, state.dispatcher(), &ctx, &pump).await;

    state.hub().unregister(session.id());
    session.close();
    if let Err(e) = writer.await {
        warn!(session_id = %session.id(), error = %e, "write pump panicked");
    }
    info!(username = %session.username(), session_id = %session.id(), "ws disconnected");
}

/// Decode and route inbound frames until the peer leaves, goes quiet for
/// `pong_wait`, sends a malformed envelope, or the session is closed.
async fn read_pump<S, E>(mut stream: S, dispatcher: &Dispatcher, ctx: &EventContext, pump: &PumpSettings)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let session = &ctx.session;
    loop {
        let frame = tokio::select! {
            _ = session.closed() => break,
            frame = timeout(pump.pong_wait, stream.next()) => frame,
        };
        let message = match frame {
            Err(_) => {
                debug!(session_id = %session.id(), "read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(session_id = %session.id(), error = %e, "read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let bytes = match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };
        let event = match Event::decode(&bytes) {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "malformed envelope, closing");
                break;
            }
        };
        if let Err(e) = dispatcher.route(&event, ctx).await {
            warn!(
                username = %session.username(),
                session_id = %session.id(),
                kind = %event.kind,
                error = %e,
                "event failed"
            );
        }
    }
}

/// Drain the outbound queue into the socket, pinging every `ping_period`.
/// Each burst of queued events costs one flush.
async fn write_pump<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Event>,
    session: SessionHandle,
    hub: HubHandle,
    pump: PumpSettings,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let mut ping = interval_at(Instant::now() + pump.ping_period, pump.ping_period);

    let result: AppResult<()> = loop {
        tokio::select! {
            _ = session.closed() => break Ok(()),
            item = outbound.recv() => {
                let Some(event) = item else { break Ok(()) };
                if let Err(e) = write_burst(&mut sink, &mut outbound, event, &pump).await {
                    break Err(e);
                }
            }
            _ = ping.tick() => {
                if let Err(e) = timed(pump.write_wait, sink.send(Message::Ping(Vec::new()))).await {
                    break Err(e);
                }
            }
        }
    };
    if let Err(e) = result {
        debug!(session_id = %session.id(), error = %e, "write pump failed");
    }

    hub.unregister(session.id());
    session.close();
    let _ = timed(pump.write_wait, sink.send(Message::Close(None))).await;
}

async fn write_burst<K>(
    sink: &mut K,
    outbound: &mut mpsc::Receiver<Event>,
    first: Event,
    pump: &PumpSettings,
) -> AppResult<()>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let mut next = Some(first);
    let mut written = 0;
    while let Some(event) = next {
        timed(pump.write_wait, sink.feed(Message::Text(event.encode()?))).await?;
        written += 1;
        next = if written < pump.outbound_queue {
            outbound.try_recv().ok()
        } else {
            None
        };
    }
    timed(pump.write_wait, sink.flush()).await
}

async fn timed<F, E>(wait: Duration, write: F) -> AppResult<()>
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match timeout(wait, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AppError::Internal(anyhow::anyhow!("websocket write: {}", e))),
        Err(_) => Err(AppError::Internal(anyhow::anyhow!(
            "websocket write timed out after {:?}",
            wait
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use futures::channel::mpsc::{unbounded, UnboundedSender};

    use crate::db::MemoryStore;
    use crate::models::{Empty, EventBody, EventKind, Presence};
    use crate::services::hub::HubCommand;
    use crate::services::EventHandler;

    type Inbound = UnboundedSender<Result<Message, io::Error>>;

    /// Sink that records frames and counts flushes.
    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Message>>>,
        flushes: Arc<AtomicUsize>,
        broken: bool,
    }

    impl Recorder {
        fn frames(&self) -> Vec<Message> {
            self.frames.lock().unwrap().clone()
        }

        async fn wait_for(&self, done: impl Fn(&[Message]) -> bool) {
            timeout(Duration::from_secs(2), async {
                while !done(self.frames().as_slice()) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("frames never arrived");
        }
    }

    impl Sink<Message> for Recorder {
        type Error = io::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            if self.broken {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")));
            }
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), io::Error> {
            self.frames.lock().unwrap().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, event: &Event, _ctx: &EventContext) -> AppResult<()> {
            event.payload_as::<Empty>()?;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings() -> PumpSettings {
        PumpSettings {
            outbound_queue: 8,
            max_message_bytes: 512,
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_millis(200),
        }
    }

    fn context() -> EventContext {
        let (hub, _rx) = HubHandle::detached();
        let (session, _queue) = SessionHandle::new("alice", 4);
        EventContext::new(session, hub, Arc::new(MemoryStore::new()), Duration::from_millis(50))
    }

    fn counting() -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::builder()
            .register(EventKind::GetRooms, Counting(calls.clone()))
            .build();
        (dispatcher, calls)
    }

    fn text(raw: &str) -> Result<Message, io::Error> {
        Ok(Message::Text(raw.to_string()))
    }

    async fn run_reader(
        inbound: futures::channel::mpsc::UnboundedReceiver<Result<Message, io::Error>>,
        dispatcher: &Dispatcher,
        ctx: &EventContext,
        pump: &PumpSettings,
    ) {
        timeout(Duration::from_secs(2), read_pump(inbound, dispatcher, ctx, pump))
            .await
            .expect("read pump kept running");
    }

    fn feed(tx: &Inbound, frames: Vec<Result<Message, io::Error>>) {
        for frame in frames {
            tx.unbounded_send(frame).unwrap();
        }
    }

    #[tokio::test]
    async fn malformed_envelope_ends_reading() {
        let (dispatcher, calls) = counting();
        let (tx, rx) = unbounded();
        feed(&tx, vec![text("{not json"), text(r#"{"type":"get_rooms"}"#)]);
        run_reader(rx, &dispatcher, &context(), &settings()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_events_keep_the_connection_open() {
        let (dispatcher, calls) = counting();
        let (tx, rx) = unbounded();
        feed(
            &tx,
            vec![
                text(r#"{"type":"launch_rockets","payload":{}}"#),
                text(r#"{"type":"get_rooms","payload":"text"}"#),
                Ok(Message::Ping(vec![1])),
                Ok(Message::Binary(br#"{"type":"get_rooms","payload":{}}"#.to_vec())),
                text(r#"{"type":"get_rooms"}"#),
                Ok(Message::Close(None)),
                text(r#"{"type":"get_rooms"}"#),
            ],
        );
        run_reader(rx, &dispatcher, &context(), &settings()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn quiet_peer_hits_read_deadline() {
        let (dispatcher, _calls) = counting();
        let (_tx, rx) = unbounded();
        let pump = PumpSettings {
            pong_wait: Duration::from_millis(50),
            ..settings()
        };
        run_reader(rx, &dispatcher, &context(), &pump).await;
    }

    #[tokio::test]
    async fn closed_session_stops_reading() {
        let (dispatcher, _calls) = counting();
        let (_tx, rx) = unbounded();
        let ctx = context();
        ctx.session.close();
        run_reader(rx, &dispatcher, &ctx, &settings()).await;
    }

    fn presence(name: &str) -> Event {
        EventBody::UserConnected(Presence { username: name.into() })
            .into_event()
            .unwrap()
    }

    #[tokio::test]
    async fn queued_burst_is_flushed_once_then_closed() {
        let (hub, _hub_rx) = HubHandle::detached();
        let (session, outbound) = SessionHandle::new("alice", 8);
        for name in ["a", "b", "c"] {
            session.try_deliver(presence(name)).unwrap();
        }
        let sink = Recorder::default();
        let writer = tokio::spawn(write_pump(sink.clone(), outbound, session.clone(), hub, settings()));

        sink.wait_for(|frames| frames.len() == 3).await;
        assert_eq!(sink.flushes.load(Ordering::SeqCst), 1);
        for (frame, name) in sink.frames().iter().zip(["a", "b", "c"]) {
            match frame {
                Message::Text(text) => {
                    assert_eq!(Event::decode(text.as_bytes()).unwrap(), presence(name));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        session.close();
        timeout(Duration::from_secs(2), writer).await.unwrap().unwrap();
        assert!(matches!(sink.frames().last(), Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn idle_writer_sends_pings() {
        let (hub, _hub_rx) = HubHandle::detached();
        let (session, outbound) = SessionHandle::new("alice", 8);
        let pump = PumpSettings {
            ping_period: Duration::from_millis(20),
            ..settings()
        };
        let sink = Recorder::default();
        let writer = tokio::spawn(write_pump(sink.clone(), outbound, session.clone(), hub, pump));

        sink.wait_for(|frames| frames.iter().any(|f| matches!(f, Message::Ping(_)))).await;
        session.close();
        timeout(Duration::from_secs(2), writer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn write_failure_unregisters_session() {
        let (hub, mut hub_rx) = HubHandle::detached();
        let (session, outbound) = SessionHandle::new("alice", 8);
        session.try_deliver(presence("a")).unwrap();
        let sink = Recorder {
            broken: true,
            ..Recorder::default()
        };
        timeout(
            Duration::from_secs(2),
            write_pump(sink.clone(), outbound, session.clone(), hub, settings()),
        )
        .await
        .expect("write pump kept running");

        assert!(session.is_closing());
        assert!(sink.frames().is_empty());
        match hub_rx.try_recv() {
            Ok(HubCommand::Unregister(id)) => assert_eq!(id, session.id()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
