//! JSON-lines host protocol.
//!
//! The embedding browser (or a test harness) writes one [`HostEvent`] per
//! line and reads [`HostOutput`] lines back. Every event gets exactly one
//! `reply` with the same `id`. Messages the agent sends to pages arrive as
//! `post_message` lines whenever they happen.
//!
//! `client_opened` is handled before the next line is read, so later events
//! can name the new client. Every other event runs as its own task and its
//! reply may overtake earlier ones; a slow install never holds up fetches.
//! Installs and activations are still serialized by the registration.

use std::sync::Arc;

use offgrid_client::UpdateStatus;
use offgrid_core::{
    AgentMessage, AgentRequest, CacheVersion, CapturedResponse, ClientHandle, ClientId, ClientMessage, Error,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::agent::{Action, AgentEvent};
use crate::error::HostError;
use crate::notification::Notification;
use crate::registration::{AgentBuild, AgentRegistration};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Fetch {
        id: u64,
        request: AgentRequest,
    },
    ClientOpened {
        id: u64,
        url: Url,
    },
    ClientClosed {
        id: u64,
        client: ClientId,
    },
    Message {
        id: u64,
        client: ClientId,
        data: Value,
    },
    Update {
        id: u64,
        build: AgentBuild,
    },
    Sync {
        id: u64,
        tag: String,
    },
    Push {
        id: u64,
        #[serde(default)]
        payload: Option<Value>,
    },
    NotificationClick {
        id: u64,
        #[serde(default)]
        data: Option<Value>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Respond { response: CapturedResponse },
    Passthrough,
    Failed { code: &'static str, message: String },
    Done,
    Client { client: ClientId, controller: Option<CacheVersion> },
    Closed { connected: bool },
    Update { status: &'static str, version: Option<CacheVersion> },
    ShowNotification { notification: Notification },
    FocusClient { client: ClientId },
    OpenWindow { url: String },
    Ignored,
}

impl Reply {
    fn failed(err: &Error) -> Self {
        Reply::Failed { code: err.code(), message: err.to_string() }
    }

    fn update(status: UpdateStatus) -> Self {
        match status {
            UpdateStatus::UpToDate => Reply::Update { status: "up_to_date", version: None },
            UpdateStatus::Waiting(v) => Reply::Update { status: "waiting", version: Some(v) },
            UpdateStatus::Activated(v) => Reply::Update { status: "activated", version: Some(v) },
        }
    }
}

impl From<Action> for Reply {
    fn from(action: Action) -> Self {
        match action {
            Action::RespondWith(response) => Reply::Respond { response },
            Action::Passthrough => Reply::Passthrough,
            Action::Failed(e) | Action::WaitUntil(Err(e)) => Reply::failed(&e),
            Action::WaitUntil(Ok(())) | Action::SkipWaiting => Reply::Done,
            Action::ShowNotification(notification) => Reply::ShowNotification { notification },
            Action::FocusClient(client) => Reply::FocusClient { client },
            Action::OpenWindow(url) => Reply::OpenWindow { url },
            Action::Ignored => Reply::Ignored,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostOutput {
    Reply { id: u64, reply: Reply },
    PostMessage { client: ClientId, data: AgentMessage },
    Error { id: Option<u64>, code: &'static str, message: String },
}

type Outbox = mpsc::UnboundedSender<HostOutput>;

fn emit(outbox: &Outbox, output: HostOutput) {
    if outbox.send(output).is_err() {
        tracing::warn!("output closed, dropping host output");
    }
}

/// Drives one registration from a line-oriented transport. Run it once.
pub struct Host {
    registration: Arc<AgentRegistration>,
    tasks: TaskTracker,
    forwarders: TaskTracker,
    cancel: CancellationToken,
}

impl Host {
    pub fn new(registration: Arc<AgentRegistration>) -> Self {
        Self {
            registration,
            tasks: TaskTracker::new(),
            forwarders: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Serve events from `reader` until EOF, then settle and hand back `writer`.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<W, HostError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, outputs) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_lines(writer, outputs));
        let responder = Responder {
            registration: Arc::clone(&self.registration),
            forwarders: self.forwarders.clone(),
            cancel: self.cancel.clone(),
            outbox: outbox.clone(),
        };

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<HostEvent>(line) {
                Ok(event @ HostEvent::ClientOpened { .. }) => responder.handle(event).await,
                Ok(event) => {
                    let responder = responder.clone();
                    self.tasks.spawn(async move { responder.handle(event).await });
                }
                Err(e) => {
                    let id = serde_json::from_str::<Value>(line)
                        .ok()
                        .and_then(|value| value.get("id").and_then(Value::as_u64));
                    tracing::warn!(?id, error = %e, "malformed host event");
                    emit(&outbox, HostOutput::Error { id, code: "INVALID_INPUT", message: e.to_string() });
                }
            }
        }

        tracing::info!("input closed, settling");
        self.tasks.close();
        self.tasks.wait().await;
        self.registration.settle().await;

        self.cancel.cancel();
        self.forwarders.close();
        self.forwarders.wait().await;

        drop(responder);
        drop(outbox);
        writer_task.await?
    }
}

/// Everything one event needs, cloned into its task.
#[derive(Clone)]
struct Responder {
    registration: Arc<AgentRegistration>,
    forwarders: TaskTracker,
    cancel: CancellationToken,
    outbox: Outbox,
}

impl Responder {
    async fn handle(&self, event: HostEvent) {
        let (id, reply) = self.respond(event).await;
        emit(&self.outbox, HostOutput::Reply { id, reply });
    }

    async fn respond(&self, event: HostEvent) -> (u64, Reply) {
        let registration = self.registration.as_ref();
        match event {
            HostEvent::Fetch { id, request } => (id, registration.handle_fetch(request).await.into()),
            HostEvent::ClientOpened { id, url } => match registration.client_opened(url).await {
                Ok(handle) => {
                    let client = handle.id;
                    let controller = registration.active_version().await;
                    self.forward(handle);
                    (id, Reply::Client { client, controller })
                }
                Err(e) => (id, Reply::failed(&e)),
            },
            HostEvent::ClientClosed { id, client } => {
                (id, Reply::Closed { connected: registration.client_closed(client).await })
            }
            HostEvent::Message { id, client, data } => {
                let message = ClientMessage::from_value(data);
                (id, registration.handle_message(client, message).await.into())
            }
            HostEvent::Update { id, build } => {
                registration.publish(build.clone()).await;
                match registration.update(build).await {
                    Ok(status) => (id, Reply::update(status)),
                    Err(e) => (id, Reply::failed(&e)),
                }
            }
            HostEvent::Sync { id, tag } => (id, registration.handle_event(AgentEvent::Sync { tag }).await.into()),
            HostEvent::Push { id, payload } => (id, registration.handle_event(AgentEvent::Push { payload }).await.into()),
            HostEvent::NotificationClick { id, data } => {
                (id, registration.handle_event(AgentEvent::NotificationClick { data }).await.into())
            }
        }
    }

    /// Relay a page's inbox to the output until it closes or the host stops.
    fn forward(&self, handle: ClientHandle) {
        let ClientHandle { id: client, mut inbox } = handle;
        let outbox = self.outbox.clone();
        let cancel = self.cancel.clone();

        self.forwarders.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    message = inbox.recv() => match message {
                        Some(data) => emit(&outbox, HostOutput::PostMessage { client, data }),
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }
}

async fn write_lines<W>(mut writer: W, mut outputs: mpsc::UnboundedReceiver<HostOutput>) -> Result<W, HostError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(output) = outputs.recv().await {
        let mut line = serde_json::to_vec(&output)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(writer)
}
