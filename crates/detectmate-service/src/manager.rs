//! Request/reply command channel worker.
//!
//! The manager serves textual commands over a bound socket: one UTF-8
//! request, one UTF-8 reply. Verbs resolve against an explicit
//! [`CommandRegistry`] built by the owning service at construction; `ping`
//! is built in and anything else is reported as unknown. A handler failure
//! becomes an `error: ...` reply; the worker itself never dies on a command.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use detectmate_config::Settings;

use crate::lifecycle::{Completion, LifecycleLatch};
use crate::transport::{ManagerSocketFactory, MessageSocket, SocketError};

const MANAGER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::manager");

/// Grace period for an in-flight command before the socket closes.
const CLOSE_GRACE: Duration = Duration::from_millis(50);

/// Failure reported by a command handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CommandError {
    message: String,
}

impl CommandError {
    /// Builds an error from a display message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A registered handler in one of its two shapes.
///
/// Handlers either want the whole command string (verb plus payload) or no
/// argument at all; the enum replaces the original arity probing with an
/// explicit adapter.
pub enum CommandHandler {
    /// Receives the full command string.
    WithCommand(Box<dyn Fn(&str) -> Result<String, CommandError> + Send + Sync>),
    /// Receives nothing.
    NoArg(Box<dyn Fn() -> Result<String, CommandError> + Send + Sync>),
}

impl CommandHandler {
    fn invoke(&self, command: &str) -> Result<String, CommandError> {
        match self {
            Self::WithCommand(handler) => handler(command),
            Self::NoArg(handler) => handler(),
        }
    }
}

/// Verb → handler mapping served by the manager worker.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a verb; the verb is matched
    /// case-insensitively.
    pub fn register(&mut self, verb: &str, handler: CommandHandler) {
        self.handlers.insert(verb.to_ascii_lowercase(), handler);
    }

    /// Registers a handler that receives the full command string.
    pub fn register_with_command(
        &mut self,
        verb: &str,
        handler: impl Fn(&str) -> Result<String, CommandError> + Send + Sync + 'static,
    ) {
        self.register(verb, CommandHandler::WithCommand(Box::new(handler)));
    }

    /// Registers a handler that takes no argument.
    pub fn register_no_arg(
        &mut self,
        verb: &str,
        handler: impl Fn() -> Result<String, CommandError> + Send + Sync + 'static,
    ) {
        self.register(verb, CommandHandler::NoArg(Box::new(handler)));
    }

    /// Routes one command to a reply.
    ///
    /// Priority: registered handler, built-in `ping`, unknown.
    pub fn dispatch(&self, command: &str) -> String {
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        if let Some(handler) = self.handlers.get(&verb) {
            return match handler.invoke(command) {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(target: MANAGER_TARGET, verb = %verb, %error, "command handler failed");
                    format!("error: {error}")
                }
            };
        }
        if verb == "ping" {
            return "pong".to_owned();
        }
        format!("unknown command: {command}")
    }
}

/// The command channel worker of one service.
pub struct Manager {
    shared: Arc<ManagerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
}

struct ManagerShared {
    socket: Arc<dyn MessageSocket>,
    registry: CommandRegistry,
    latch: Arc<LifecycleLatch>,
    shutdown: AtomicBool,
    done: Completion,
}

impl Manager {
    /// Binds the command socket and starts the worker.
    pub fn start(
        settings: &Settings,
        registry: CommandRegistry,
        factory: &dyn ManagerSocketFactory,
        latch: Arc<LifecycleLatch>,
    ) -> Result<Self, SocketError> {
        let socket = factory.create(&settings.manager_addr)?;
        socket.set_recv_timeout(settings.manager_recv_timeout());
        info!(
            target: MANAGER_TARGET,
            addr = %settings.manager_addr,
            "manager listening"
        );

        let shared = Arc::new(ManagerShared {
            socket,
            registry,
            latch,
            shutdown: AtomicBool::new(false),
            done: Completion::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || run_command_loop(&worker_shared));

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
            join_timeout: settings.manager_join_timeout(),
        })
    }

    /// Tears the worker down: flags shutdown, lets an in-flight command
    /// finish, closes the socket, and joins with the configured budget.
    ///
    /// A join timeout is logged rather than raised.
    pub fn close(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        thread::sleep(CLOSE_GRACE);
        if let Err(error) = self.shared.socket.close() {
            warn!(target: MANAGER_TARGET, %error, "failed to close command socket");
        }
        if !self.shared.done.wait_for(self.join_timeout) {
            warn!(
                target: MANAGER_TARGET,
                timeout_ms = self.join_timeout.as_millis(),
                "manager worker did not exit within the join budget"
            );
            return;
        }
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = handle.join();
        }
    }
}

fn run_command_loop(shared: &ManagerShared) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        let raw = match shared.socket.recv() {
            Ok(raw) => raw,
            Err(SocketError::Timeout) => continue,
            Err(error) => {
                if !shared.shutdown.load(Ordering::SeqCst) {
                    debug!(target: MANAGER_TARGET, %error, "command socket receive failed, exiting");
                }
                break;
            }
        };

        let command = String::from_utf8_lossy(&raw).trim().to_owned();
        debug!(target: MANAGER_TARGET, command = %command, "received command");

        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if verb == "stop" && shared.latch.is_set() {
            debug!(target: MANAGER_TARGET, "ignoring stop command, already stopping");
            continue;
        }

        let reply = match catch_unwind(AssertUnwindSafe(|| shared.registry.dispatch(&command))) {
            Ok(reply) => reply,
            Err(_) => {
                error!(target: MANAGER_TARGET, command = %command, "command dispatch panicked");
                "error: internal error processing command".to_owned()
            }
        };

        if let Err(error) = shared.socket.send(reply.as_bytes()) {
            warn!(target: MANAGER_TARGET, %error, "failed to send reply, exiting");
            break;
        }
        debug!(target: MANAGER_TARGET, reply = %reply, "sent reply");
    }
    shared.done.mark();
}

#[cfg(test)]
mod tests {
    use detectmate_config::SettingsOverlay;
    use rstest::rstest;

    use crate::transport::test_utils::ChannelSocketFactory;

    use super::*;

    fn registry_with_echo() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry.register_with_command("echo", |command| Ok(format!("echoed: {command}")));
        registry.register_no_arg("version", || Ok("1.0".to_owned()));
        registry.register_no_arg("explode", || Err(CommandError::new("boom")));
        registry
    }

    #[rstest]
    #[case::with_command("echo hello", "echoed: echo hello")]
    #[case::no_arg("version", "1.0")]
    #[case::verb_upper("VERSION", "1.0")]
    #[case::verb_mixed("Echo hi", "echoed: Echo hi")]
    #[case::builtin_ping("ping", "pong")]
    #[case::builtin_ping_upper("PING", "pong")]
    #[case::unknown("bogus arg", "unknown command: bogus arg")]
    fn dispatch_routes_by_verb(#[case] command: &str, #[case] expected: &str) {
        let registry = registry_with_echo();
        assert_eq!(registry.dispatch(command), expected);
    }

    #[test]
    fn handler_errors_become_error_replies() {
        let registry = registry_with_echo();
        assert_eq!(registry.dispatch("explode"), "error: boom");
    }

    fn test_settings() -> Settings {
        Settings::resolve(SettingsOverlay {
            manager_addr: Some("inproc://manager-under-test".parse().expect("address")),
            ..SettingsOverlay::default()
        })
        .expect("resolve settings")
    }

    fn request(client: &crate::transport::test_utils::ChannelSocket, command: &str) -> String {
        client.send(command.as_bytes()).expect("send command");
        client.set_recv_timeout(Duration::from_secs(2));
        String::from_utf8(client.recv().expect("reply")).expect("utf8 reply")
    }

    #[test]
    fn worker_serves_commands_until_closed() {
        let settings = test_settings();
        let factory = ChannelSocketFactory::new();
        let client = factory.expect(&settings.manager_addr);
        let latch = Arc::new(LifecycleLatch::new());
        let manager = Manager::start(&settings, registry_with_echo(), &factory, latch)
            .expect("start manager");

        assert_eq!(request(&client, "ping"), "pong");
        assert_eq!(request(&client, "echo data"), "echoed: echo data");
        assert_eq!(request(&client, "nope"), "unknown command: nope");

        manager.close();
    }

    #[test]
    fn stop_commands_are_deduplicated_after_the_latch_fires() {
        let settings = test_settings();
        let factory = ChannelSocketFactory::new();
        let client = factory.expect(&settings.manager_addr);
        let latch = Arc::new(LifecycleLatch::new());
        let mut registry = CommandRegistry::new();
        {
            let latch = Arc::clone(&latch);
            registry.register_no_arg("stop", move || {
                latch.set();
                Ok("engine stopped".to_owned())
            });
        }
        let manager = Manager::start(&settings, registry, &factory, Arc::clone(&latch))
            .expect("start manager");

        assert_eq!(request(&client, "stop"), "engine stopped");
        assert!(latch.is_set());

        // The duplicate is ignored before dispatch; no reply is produced,
        // but the worker keeps serving other commands.
        client.send(b"stop").expect("send duplicate stop");
        client.set_recv_timeout(Duration::from_millis(200));
        assert!(matches!(client.recv(), Err(SocketError::Timeout)));
        assert_eq!(request(&client, "ping"), "pong");

        manager.close();
    }
}
