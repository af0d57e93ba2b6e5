//! Host-facing surface
//!
//! The host UI layer talks to the pipeline through three things:
//!
//! - a [`CommandChannel`] carrying `preloadModel` and `switchCamera`
//! - an [`EventStream`] with at most one landmark subscriber
//! - a [`SessionFactory`] creating one session per hosted camera view
//!
//! [`PoseHost`] wires them to a single shared engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::camera::{CameraProvider, SharedCamera};
use crate::config::PipelineConfig;
use crate::delivery::{Dispatcher, EventStream};
use crate::engine::{EngineManager, ModelLoader};
use crate::error::Result;
use crate::session::{SessionContext, SessionController};
use crate::tracing::prefix;

/// Method name that preloads the model and answers with the outcome.
pub const METHOD_PRELOAD_MODEL: &str = "preloadModel";
/// Method name that toggles the active session's camera facing.
pub const METHOD_SWITCH_CAMERA: &str = "switchCamera";

/// Inbound host command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PreloadModel,
    SwitchCamera,
}

impl Command {
    /// Map a host method name to a command. Unknown names yield `None`.
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            METHOD_PRELOAD_MODEL => Some(Command::PreloadModel),
            METHOD_SWITCH_CAMERA => Some(Command::SwitchCamera),
            _ => None,
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            Command::PreloadModel => METHOD_PRELOAD_MODEL,
            Command::SwitchCamera => METHOD_SWITCH_CAMERA,
        }
    }
}

/// Answer to a host method call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum CommandReply {
    Success(serde_json::Value),
    /// Unknown method
    NotImplemented,
    /// No session has registered a handler
    NoHandler,
}

pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: Command) -> CommandReply;
}

/// Identifies one `set_handler` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registered {
    id: HandlerId,
    handler: Arc<dyn CommandHandler>,
}

/// Method-call channel with a single registered handler.
///
/// A channel built with [`with_engine`](Self::with_engine) answers
/// `preloadModel` itself, so the model can be warmed up before any view
/// exists. `switchCamera` always needs a registered session.
#[derive(Clone, Default)]
pub struct CommandChannel {
    handler: Arc<RwLock<Option<Registered>>>,
    next_id: Arc<AtomicU64>,
    engine: Option<Arc<EngineManager>>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(engine: Arc<EngineManager>) -> Self {
        Self {
            engine: Some(engine),
            ..Self::default()
        }
    }

    /// Register `handler`, replacing any previous one.
    pub fn set_handler(&self, handler: impl CommandHandler + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        *self.handler.write() = Some(Registered {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove the handler only if `id` still owns the channel.
    pub fn clear_handler_if(&self, id: HandlerId) -> bool {
        let mut slot = self.handler.write();
        if slot.as_ref().is_some_and(|r| r.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Dispatch a method call. May block for as long as the command takes
    /// (`preloadModel` waits for the model).
    pub fn invoke(&self, method: &str) -> CommandReply {
        let Some(command) = Command::parse(method) else {
            debug!("{} Unknown method {}", prefix::SESSION, method);
            return CommandReply::NotImplemented;
        };
        if let (Command::PreloadModel, Some(engine)) = (command, &self.engine) {
            return CommandReply::Success(engine.preload_and_wait().into());
        }
        let handler = self.handler.read().as_ref().map(|r| r.handler.clone());
        match handler {
            Some(handler) => handler.handle(command),
            None => {
                debug!(
                    "{} No handler registered for {}",
                    prefix::SESSION,
                    command.method()
                );
                CommandReply::NoHandler
            }
        }
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("has_handler", &self.has_handler())
            .field("has_engine", &self.engine.is_some())
            .finish()
    }
}

/// Creates sessions for hosted views, all sharing one engine.
#[derive(Clone)]
pub struct SessionFactory {
    context: SessionContext,
}

impl SessionFactory {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    /// Start a session for the hosted view `view_id`.
    pub fn create(&self, view_id: i64) -> Result<SessionController> {
        debug!("{} Creating session for view {}", prefix::SESSION, view_id);
        SessionController::start(view_id, self.context.clone())
    }
}

/// Process-level wiring: one engine, one event stream, one command channel.
pub struct PoseHost {
    engine: Arc<EngineManager>,
    events: EventStream,
    commands: CommandChannel,
    factory: SessionFactory,
}

impl PoseHost {
    pub fn new(
        config: &PipelineConfig,
        loader: Arc<dyn ModelLoader>,
        camera: Arc<dyn CameraProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let engine = Arc::new(EngineManager::new(loader, config.engine_options())?);
        let events = EventStream::new();
        let dispatcher = Dispatcher::spawn(events.clone())?;
        let commands = CommandChannel::with_engine(engine.clone());

        let factory = SessionFactory::new(SessionContext {
            engine: engine.clone(),
            camera: SharedCamera::new(camera),
            dispatcher,
            commands: commands.clone(),
            capture: config.capture,
            landmark_count: config.landmark_count,
        });

        info!(
            "{} Host ready (model {}, delegates {:?})",
            prefix::SESSION,
            config.model_asset,
            config.delegates
        );

        Ok(Self {
            engine,
            events,
            commands,
            factory,
        })
    }

    pub fn engine(&self) -> &Arc<EngineManager> {
        &self.engine
    }

    pub fn events(&self) -> &EventStream {
        &self.events
    }

    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn sessions(&self) -> &SessionFactory {
        &self.factory
    }

    pub fn create_session(&self, view_id: i64) -> Result<SessionController> {
        self.factory.create(view_id)
    }
}
