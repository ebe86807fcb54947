use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chatgenius_backend::{Backend, BackendError};
use chatgenius_types::events::{AuthChange, AuthHandler, ChangeEvent, ChangeHandler, EventFilter};
use chatgenius_types::models::{Channel, Message, Session, User};
use chatgenius_types::query::Table;

use crate::directory::{self, ChannelDirectory, ChannelForm, NewChannel};
use crate::error::ClientError;
use crate::feed::{self, FeedPhase, LoadTicket, Merge, MessageFeed, NewMessage};
use crate::session::{Screen, SessionGate};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// Everything a front-end needs to render the current view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub screen: Screen,
    pub user: Option<User>,
    pub channels: Vec<Channel>,
    pub users: Vec<User>,
    pub active_channel: Option<Channel>,
    pub form: ChannelForm,
    pub phase: FeedPhase,
    pub messages: Vec<Message>,
    /// Live messages held back until the history load settles.
    pub buffered: usize,
}

impl ViewState {
    pub fn username(&self, user_id: Uuid) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.username.as_str())
    }
}

enum Command {
    SignUp {
        username: String,
        password: String,
        reply: Reply<()>,
    },
    SignIn {
        username: String,
        password: String,
        reply: Reply<()>,
    },
    SignOut {
        reply: Reply<()>,
    },
    RefreshChannels,
    RefreshUsers,
    SelectChannel {
        channel_id: Uuid,
        reply: Reply<()>,
    },
    ShowChannelForm(bool),
    EditChannelForm {
        name: String,
        description: String,
    },
    SubmitChannelForm {
        reply: Reply<()>,
    },
    SendMessage {
        content: String,
        reply: Reply<()>,
    },
    Unmount {
        done: oneshot::Sender<()>,
    },
}

/// Results and notifications re-entering the view loop.
enum ViewEvent {
    SessionLoaded(Result<Option<Session>, BackendError>),
    AuthChanged(AuthChange),
    ChannelsLoaded(Result<Vec<Channel>, BackendError>),
    UsersLoaded(Result<Vec<User>, BackendError>),
    HistoryLoaded {
        ticket: LoadTicket,
        result: Result<Vec<Message>, BackendError>,
    },
    Change {
        ticket: LoadTicket,
        event: ChangeEvent,
    },
    ChannelCreated {
        result: Result<(), BackendError>,
        reply: Reply<()>,
    },
}

/// The chat view: session gate, channel directory and message feed driven by
/// one task.
///
/// Backend I/O runs in spawned tasks; results come back as `ViewEvent`s on an
/// unbounded channel that subscription handlers also feed, so handlers never
/// block. After teardown the receiver is gone and late sends are dropped.
pub struct ChatView {
    backend: Arc<dyn Backend>,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    state_tx: watch::Sender<ViewState>,
    gate: SessionGate,
    directory: ChannelDirectory,
    feed: MessageFeed,
    chat_mounted: bool,
}

impl ChatView {
    /// Mount the view on a new task.
    pub fn spawn(backend: Arc<dyn Backend>) -> (ViewHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ViewState::default());

        let view = ChatView {
            backend,
            events_tx,
            state_tx,
            gate: SessionGate::new(),
            directory: ChannelDirectory::new(),
            feed: MessageFeed::new(),
            chat_mounted: false,
        };
        let task = tokio::spawn(view.run(commands_rx, events_rx));

        let handle = ViewHandle {
            commands: commands_tx,
            state: state_rx,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<ViewEvent>,
    ) {
        self.mount();
        self.publish();

        loop {
            // Drain pending events before taking the next command, so a
            // command observes every event sent before it.
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All view handles dropped");
                        self.unmount();
                        break;
                    }
                },
            }
            self.publish();
        }
    }

    fn mount(&mut self) {
        let tx = self.events_tx.clone();
        let handler: AuthHandler = Arc::new(move |change: AuthChange| {
            let _ = tx.send(ViewEvent::AuthChanged(change));
        });
        if let Err(e) = self.gate.mount(self.backend.as_ref(), handler) {
            error!("Failed to subscribe to auth changes: {}", e);
        }

        self.spawn_io(|backend| async move { ViewEvent::SessionLoaded(backend.get_session().await) });
        info!("Chat view mounted");
    }

    fn unmount(&mut self) {
        self.release_feed();
        self.gate.unmount(self.backend.as_ref());
        info!("Chat view unmounted");
    }

    fn publish(&self) {
        let next = ViewState {
            screen: self.gate.screen(),
            user: self.gate.user().cloned(),
            channels: self.directory.channels().to_vec(),
            users: self.directory.users().to_vec(),
            active_channel: self.directory.active().cloned(),
            form: self.directory.form().clone(),
            phase: self.feed.phase(),
            messages: self.feed.messages().to_vec(),
            buffered: self.feed.buffered(),
        };
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Run backend I/O off the loop and feed its result back in.
    fn spawn_io<F, Fut>(&self, io: F)
    where
        F: FnOnce(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = ViewEvent> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let task = io(self.backend.clone());
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    /// Returns false once the view should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::SignUp {
                username,
                password,
                reply,
            } => {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let result = backend.sign_up(&username, &password).await.map(|_| ());
                    answer(reply, "Sign-up", result);
                });
            }
            Command::SignIn {
                username,
                password,
                reply,
            } => {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let result = backend
                        .sign_in_with_password(&username, &password)
                        .await
                        .map(|_| ());
                    answer(reply, "Sign-in", result);
                });
            }
            Command::SignOut { reply } => {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let result = backend.sign_out().await;
                    answer(reply, "Sign-out", result);
                });
            }
            Command::RefreshChannels => self.refresh_channels(),
            Command::RefreshUsers => self.refresh_users(),
            Command::SelectChannel { channel_id, reply } => {
                let result = self.select_channel(channel_id);
                let _ = reply.send(result);
            }
            Command::ShowChannelForm(visible) => self.directory.form_mut().visible = visible,
            Command::EditChannelForm { name, description } => {
                let form = self.directory.form_mut();
                form.name = name;
                form.description = description;
            }
            Command::SubmitChannelForm { reply } => self.submit_channel_form(reply),
            Command::SendMessage { content, reply } => {
                let message = match NewMessage::new(self.directory.active_id(), &content) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Message not sent: {}", e);
                        let _ = reply.send(Err(e.into()));
                        return true;
                    }
                };
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let result = feed::send_message(backend.as_ref(), message).await;
                    answer(reply, "Send", result);
                });
            }
            Command::Unmount { done } => {
                self.unmount();
                self.publish();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn handle_event(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::SessionLoaded(Ok(session)) => {
                let before = self.gate.user_id();
                self.gate.apply_initial(session);
                self.after_session_change(before);
            }
            ViewEvent::SessionLoaded(Err(e)) => error!("Failed to read session: {}", e),
            ViewEvent::AuthChanged(change) => {
                debug!("Auth state changed: {:?}", change.event);
                let before = self.gate.user_id();
                self.gate.apply(change.session);
                self.after_session_change(before);
            }
            ViewEvent::ChannelsLoaded(result) => match result {
                Ok(channels) if self.chat_mounted => self.directory.set_channels(channels),
                Ok(_) => debug!("Dropping channel list for an unmounted chat"),
                Err(e) => error!("Failed to load channels: {}", e),
            },
            ViewEvent::UsersLoaded(result) => match result {
                Ok(users) if self.chat_mounted => self.directory.set_users(users),
                Ok(_) => debug!("Dropping user list for an unmounted chat"),
                Err(e) => error!("Failed to load users: {}", e),
            },
            ViewEvent::HistoryLoaded { ticket, result } => {
                if !self.feed.apply_history(ticket, result) {
                    debug!("Dropping stale history result");
                }
            }
            ViewEvent::Change { ticket, event } => {
                // fresh active id, never the one captured at subscribe time
                let active = self.directory.active_id();
                if self.feed.apply_change(ticket, active, &event) == Merge::Ignored {
                    debug!("Ignored {:?} event on {}", event.kind, event.table);
                }
            }
            ViewEvent::ChannelCreated { result, reply } => {
                match &result {
                    Ok(()) => {
                        self.directory.form_mut().clear();
                        self.refresh_channels();
                    }
                    Err(e) => error!("Failed to create channel: {}", e),
                }
                let _ = reply.send(result.map_err(ClientError::from));
            }
        }
    }

    fn after_session_change(&mut self, before: Option<Uuid>) {
        let after = self.gate.user_id();
        if before == after {
            return;
        }
        if before.is_some() {
            self.unmount_chat();
        }
        if after.is_some() {
            self.mount_chat();
        }
    }

    fn mount_chat(&mut self) {
        self.chat_mounted = true;
        info!("Entering chat");
        self.refresh_channels();
        self.refresh_users();
    }

    fn unmount_chat(&mut self) {
        self.chat_mounted = false;
        self.release_feed();
        self.directory.reset();
        info!("Leaving chat");
    }

    fn release_feed(&mut self) {
        if let Some(handle) = self.feed.reset() {
            self.backend.unsubscribe(handle);
            debug!("Message subscription {} released", handle.id());
        }
    }

    fn refresh_channels(&self) {
        if !self.chat_mounted {
            debug!("Not signed in, skipping channel refresh");
            return;
        }
        self.spawn_io(|backend| async move {
            ViewEvent::ChannelsLoaded(directory::list_channels(backend.as_ref()).await)
        });
    }

    fn refresh_users(&self) {
        if !self.chat_mounted {
            return;
        }
        self.spawn_io(|backend| async move {
            ViewEvent::UsersLoaded(directory::list_users(backend.as_ref()).await)
        });
    }

    /// Make `channel_id` active, release the previous subscription, then
    /// subscribe and load history for the new selection.
    fn select_channel(&mut self, channel_id: Uuid) -> Result<(), ClientError> {
        let channel = self.directory.select(channel_id)?;
        info!("Selected channel #{}", channel.name);

        if let Some(previous) = self.feed.detach() {
            self.backend.unsubscribe(previous);
            debug!("Message subscription {} released", previous.id());
        }
        let ticket = self.feed.begin();

        let tx = self.events_tx.clone();
        let handler: ChangeHandler = Arc::new(move |event: ChangeEvent| {
            let _ = tx.send(ViewEvent::Change { ticket, event });
        });
        match self
            .backend
            .subscribe_to_changes(Table::Messages, EventFilter::All, handler)
        {
            Ok(handle) => {
                debug!("Message subscription {} registered", handle.id());
                self.feed.attach(handle);
            }
            Err(e) => error!("Live updates unavailable for channel {}: {}", channel_id, e),
        }

        self.spawn_io(move |backend| async move {
            ViewEvent::HistoryLoaded {
                ticket,
                result: feed::fetch_history(backend.as_ref(), channel_id).await,
            }
        });
        Ok(())
    }

    fn submit_channel_form(&mut self, reply: Reply<()>) {
        // validated before any backend call
        let channel = match NewChannel::from_form(self.directory.form()) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Channel not created: {}", e);
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        if !self.chat_mounted {
            let _ = reply.send(Err(BackendError::NotAuthenticated.into()));
            return;
        }

        let tx = self.events_tx.clone();
        let backend = self.backend.clone();
        tokio::spawn(async move {
            debug!("Creating channel #{}", channel.name());
            let result = directory::create_channel(backend.as_ref(), channel).await;
            // if the view is gone, the reply is dropped and the caller sees ViewClosed
            let _ = tx.send(ViewEvent::ChannelCreated { result, reply });
        });
    }
}

/// Answer a caller with the outcome of backend work done off the loop.
/// Auth outcomes reach the session gate through its subscription, not here.
fn answer(reply: Reply<()>, what: &str, result: Result<(), BackendError>) {
    if let Err(e) = &result {
        warn!("{} failed: {}", what, e);
    }
    let _ = reply.send(result.map_err(ClientError::from));
}

/// Cloneable front door to a running [`ChatView`].
#[derive(Clone)]
pub struct ViewHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ViewState>,
}

impl ViewHandle {
    /// Snapshot of the latest published state.
    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&ViewState) -> bool) -> Result<ViewState, ClientError> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(predicate).await.map_err(|_| ClientError::ViewClosed)?.clone();
        Ok(state)
    }

    pub async fn sign_up(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let (username, password) = (username.to_string(), password.to_string());
        self.request(|reply| Command::SignUp {
            username,
            password,
            reply,
        })
        .await
    }

    pub async fn sign_in(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let (username, password) = (username.to_string(), password.to_string());
        self.request(|reply| Command::SignIn {
            username,
            password,
            reply,
        })
        .await
    }

    pub async fn sign_out(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::SignOut { reply }).await
    }

    pub async fn refresh_channels(&self) -> Result<(), ClientError> {
        self.send(Command::RefreshChannels).await
    }

    pub async fn refresh_users(&self) -> Result<(), ClientError> {
        self.send(Command::RefreshUsers).await
    }

    pub async fn select_channel(&self, channel_id: Uuid) -> Result<(), ClientError> {
        self.request(|reply| Command::SelectChannel { channel_id, reply })
            .await
    }

    pub async fn show_channel_form(&self, visible: bool) -> Result<(), ClientError> {
        self.send(Command::ShowChannelForm(visible)).await
    }

    pub async fn edit_channel_form(&self, name: &str, description: &str) -> Result<(), ClientError> {
        self.send(Command::EditChannelForm {
            name: name.to_string(),
            description: description.to_string(),
        })
        .await
    }

    pub async fn submit_channel_form(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::SubmitChannelForm { reply }).await
    }

    /// Fill the form and submit it. On success the form is cleared and the
    /// channel list reloaded.
    pub async fn create_channel(&self, name: &str, description: &str) -> Result<(), ClientError> {
        self.edit_channel_form(name, description).await?;
        self.submit_channel_form().await
    }

    pub async fn send_message(&self, content: &str) -> Result<(), ClientError> {
        let content = content.to_string();
        self.request(|reply| Command::SendMessage { content, reply })
            .await
    }

    /// Tear the view down, releasing its subscriptions.
    pub async fn unmount(&self) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Unmount { done }).await?;
        rx.await.map_err(|_| ClientError::ViewClosed)
    }

    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::ViewClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| ClientError::ViewClosed)?
    }
}
