//! Receive → process → fan-out worker.
//!
//! The engine owns one input socket and zero or more output sockets. A
//! single background thread drains the input, applies the processor, and
//! forwards the result to every output in configuration order, or back over
//! the input socket when no outputs are configured. Steady-state errors are
//! logged and the loop continues; only shutdown breaks it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use detectmate_config::{Address, Settings};

use crate::lifecycle::Completion;
use crate::processor::Processor;
use crate::transport::{DialOptions, EngineSocketFactory, MessageSocket, SocketError};

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Budget for the worker to exit after the input socket closes.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

/// The receive/process/fan-out worker of one service.
pub struct Engine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct EngineShared {
    input: Arc<dyn MessageSocket>,
    outputs: Vec<EngineOutput>,
    processor: Arc<dyn Processor>,
    state: AtomicU8,
    done: Completion,
}

struct EngineOutput {
    addr: Address,
    socket: Arc<dyn MessageSocket>,
}

impl Engine {
    /// Builds the input and output sockets and, when configured, starts the
    /// worker immediately.
    ///
    /// A failure on one output address is logged and that output is skipped;
    /// the remaining outputs are still attempted.
    pub fn new(
        settings: &Settings,
        processor: Arc<dyn Processor>,
        factory: &dyn EngineSocketFactory,
    ) -> Result<Self, EngineError> {
        let input = factory
            .bind(&settings.engine_addr)
            .map_err(|source| EngineError::InputSetup { source })?;
        input.set_recv_timeout(settings.engine_recv_timeout());

        let outputs = match build_outputs(settings, factory) {
            Ok(outputs) => outputs,
            Err(source) => {
                if let Err(error) = input.close() {
                    warn!(target: ENGINE_TARGET, %error, "failed to close input after output setup error");
                }
                return Err(EngineError::OutputSetup { source });
            }
        };

        let engine = Self {
            shared: Arc::new(EngineShared {
                input,
                outputs,
                processor,
                state: AtomicU8::new(STOPPED),
                done: Completion::new(),
            }),
            worker: Mutex::new(None),
        };

        if settings.engine_autostart {
            debug!(target: ENGINE_TARGET, "{}", engine.start());
        }
        Ok(engine)
    }

    /// Starts the worker. Idempotent; a second call reports the running
    /// state instead of spawning another thread.
    pub fn start(&self) -> &'static str {
        if self
            .shared
            .state
            .compare_exchange(STOPPED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return "engine already running";
        }

        self.shared.done.reset();
        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || run_engine_loop(&shared));
        *lock_worker(&self.worker) = Some(handle);
        "engine started"
    }

    /// Whether the worker is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Stops the worker: closes the input socket (unblocking a pending
    /// receive), closes every output, and joins the worker thread.
    ///
    /// Idempotent; returns immediately when already stopped or stopping.
    pub fn stop(&self) -> Result<(), EngineError> {
        if self
            .shared
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        if let Err(source) = self.shared.input.close() {
            return Err(EngineError::CloseInput { source });
        }
        for output in &self.shared.outputs {
            if let Err(error) = output.socket.close() {
                warn!(
                    target: ENGINE_TARGET,
                    addr = %output.addr,
                    %error,
                    "failed to close output socket"
                );
            }
        }

        if !self.shared.done.wait_for(JOIN_TIMEOUT) {
            return Err(EngineError::JoinTimeout {
                timeout_ms: JOIN_TIMEOUT.as_millis(),
            });
        }
        if let Some(handle) = lock_worker(&self.worker).take() {
            let _ = handle.join();
        }
        self.shared.state.store(STOPPED, Ordering::SeqCst);
        info!(target: ENGINE_TARGET, "engine stopped");
        Ok(())
    }
}

fn lock_worker(
    worker: &Mutex<Option<JoinHandle<()>>>,
) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    worker.lock().unwrap_or_else(PoisonError::into_inner)
}

fn build_outputs(
    settings: &Settings,
    factory: &dyn EngineSocketFactory,
) -> Result<Vec<EngineOutput>, SocketError> {
    let options = DialOptions {
        dial_timeout: settings.out_dial_timeout(),
        buffer_size: settings.out_buffer_size,
    };
    let mut outputs = Vec::with_capacity(settings.out_addr.len());
    for addr in &settings.out_addr {
        match factory.connect(addr, options) {
            Ok(socket) => outputs.push(EngineOutput {
                addr: addr.clone(),
                socket,
            }),
            Err(error) => {
                warn!(
                    target: ENGINE_TARGET,
                    addr = %addr,
                    %error,
                    "failed to set up output socket, skipping"
                );
            }
        }
    }
    Ok(outputs)
}

impl EngineShared {
    /// Worker loop predicate; only [`Engine::stop`] moves the state away
    /// from running, so shutdown always flows through the close sequence.
    fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }
}

fn run_engine_loop(shared: &EngineShared) {
    'messages: while shared.is_running() {
        // Receive phase.
        let raw = match shared.input.recv() {
            Ok(raw) => raw,
            Err(SocketError::Timeout) => continue,
            Err(error) => {
                if !shared.is_running() {
                    break;
                }
                warn!(target: ENGINE_TARGET, %error, "engine receive failed");
                continue;
            }
        };
        if raw.is_empty() {
            debug!(target: ENGINE_TARGET, "dropping empty payload");
            continue;
        }

        // Process phase.
        let Some(payload) = apply_processor(shared.processor.as_ref(), &raw) else {
            continue;
        };

        // Send phase.
        if shared.outputs.is_empty() {
            if let Err(error) = shared.input.send(&payload) {
                warn!(target: ENGINE_TARGET, %error, "reply send failed");
            }
            continue;
        }
        for output in &shared.outputs {
            if let Err(error) = output.socket.send(&payload) {
                if !shared.is_running() && matches!(error, SocketError::Closed) {
                    break 'messages;
                }
                warn!(
                    target: ENGINE_TARGET,
                    addr = %output.addr,
                    %error,
                    "output send failed, skipping this output"
                );
            }
        }
    }
    shared.done.mark();
}

fn apply_processor(processor: &dyn Processor, raw: &[u8]) -> Option<Vec<u8>> {
    match catch_unwind(AssertUnwindSafe(|| processor.run(raw))) {
        Ok(Ok(output)) => output,
        Ok(Err(error)) => {
            error!(target: ENGINE_TARGET, %error, "processor failed, dropping message");
            None
        }
        Err(panic) => {
            error!(
                target: ENGINE_TARGET,
                reason = panic_message(panic.as_ref()),
                "processor panicked, dropping message"
            );
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Errors raised by engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input socket could not be bound.
    #[error("failed to bind engine input socket: {source}")]
    InputSetup {
        #[source]
        source: SocketError,
    },
    /// Output socket setup failed after the input socket was bound.
    #[error("failed to set up engine outputs: {source}")]
    OutputSetup {
        #[source]
        source: SocketError,
    },
    /// The input socket could not be closed during stop.
    #[error("failed to close engine input socket: {source}")]
    CloseInput {
        #[source]
        source: SocketError,
    },
    /// The worker did not exit within the join budget.
    #[error("engine worker did not exit within {timeout_ms} ms")]
    JoinTimeout { timeout_ms: u128 },
}

#[cfg(test)]
mod tests {
    use detectmate_config::SettingsOverlay;

    use crate::processor::{PassthroughProcessor, ProcessorError};
    use crate::transport::test_utils::ChannelSocketFactory;

    use super::*;

    struct UppercaseProcessor;

    impl Processor for UppercaseProcessor {
        fn run(&self, raw: &[u8]) -> Result<Option<Vec<u8>>, ProcessorError> {
            let mut payload = b"PROCESSED: ".to_vec();
            payload.extend(raw.iter().map(u8::to_ascii_uppercase));
            Ok(Some(payload))
        }
    }

    struct FailingProcessor;

    impl Processor for FailingProcessor {
        fn run(&self, _raw: &[u8]) -> Result<Option<Vec<u8>>, ProcessorError> {
            Err(ProcessorError::new("processor failure"))
        }
    }

    fn test_settings(out_addr: &[&str]) -> Settings {
        Settings::resolve(SettingsOverlay {
            engine_addr: Some("inproc://engine-under-test".parse().expect("address")),
            engine_autostart: Some(false),
            out_addr: Some(
                out_addr
                    .iter()
                    .map(|addr| addr.parse().expect("address"))
                    .collect(),
            ),
            ..SettingsOverlay::default()
        })
        .expect("resolve settings")
    }

    fn build_engine(
        settings: &Settings,
        processor: Arc<dyn Processor>,
        factory: &ChannelSocketFactory,
    ) -> Engine {
        Engine::new(settings, processor, factory).expect("build engine")
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let settings = test_settings(&[]);
        let factory = ChannelSocketFactory::new();
        let _client = factory.expect(&settings.engine_addr);
        let engine = build_engine(&settings, Arc::new(PassthroughProcessor), &factory);

        assert_eq!(engine.start(), "engine started");
        assert_eq!(engine.start(), "engine already running");
        assert!(engine.is_running());

        engine.stop().expect("first stop");
        engine.stop().expect("second stop is a no-op");
        assert!(!engine.is_running());
    }

    #[test]
    fn reply_mode_sends_back_over_the_input_socket() {
        let settings = test_settings(&[]);
        let factory = ChannelSocketFactory::new();
        let client = factory.expect(&settings.engine_addr);
        let engine = build_engine(&settings, Arc::new(UppercaseProcessor), &factory);
        engine.start();

        client.send(b"hello world").expect("send input");
        client.set_recv_timeout(Duration::from_secs(2));
        let reply = client.recv().expect("reply");
        assert_eq!(reply, b"PROCESSED: HELLO WORLD");

        engine.stop().expect("stop engine");
    }

    #[test]
    fn fan_out_reaches_every_output_in_order() {
        let settings = test_settings(&["inproc://out-a", "inproc://out-b", "inproc://out-c"]);
        let factory = ChannelSocketFactory::new();
        let input = factory.expect(&settings.engine_addr);
        let receivers: Vec<_> = settings
            .out_addr
            .iter()
            .map(|addr| factory.expect(addr))
            .collect();
        let engine = build_engine(&settings, Arc::new(UppercaseProcessor), &factory);
        engine.start();

        input.send(b"test message").expect("send input");
        for receiver in &receivers {
            receiver.set_recv_timeout(Duration::from_secs(2));
            assert_eq!(receiver.recv().expect("fan-out"), b"PROCESSED: TEST MESSAGE");
        }

        engine.stop().expect("stop engine");
    }

    #[test]
    fn empty_payloads_are_dropped() {
        let settings = test_settings(&[]);
        let factory = ChannelSocketFactory::new();
        let client = factory.expect(&settings.engine_addr);
        let engine = build_engine(&settings, Arc::new(UppercaseProcessor), &factory);
        engine.start();

        client.send(b"").expect("send empty");
        client.send(b"real").expect("send real");
        client.set_recv_timeout(Duration::from_secs(2));
        // Only the non-empty payload produces a reply.
        assert_eq!(client.recv().expect("reply"), b"PROCESSED: REAL");

        engine.stop().expect("stop engine");
    }

    #[test]
    fn processor_failure_drops_the_message_and_keeps_running() {
        let settings = test_settings(&[]);
        let factory = ChannelSocketFactory::new();
        let client = factory.expect(&settings.engine_addr);
        let engine = build_engine(&settings, Arc::new(FailingProcessor), &factory);
        engine.start();

        client.send(b"poison").expect("send input");
        std::thread::sleep(Duration::from_millis(100));
        assert!(engine.is_running());

        engine.stop().expect("stop engine");
    }

    #[test]
    fn stop_unblocks_a_worker_waiting_in_recv() {
        let settings = test_settings(&[]);
        let factory = ChannelSocketFactory::new();
        let _client = factory.expect(&settings.engine_addr);
        let engine = build_engine(&settings, Arc::new(PassthroughProcessor), &factory);
        engine.start();

        std::thread::sleep(Duration::from_millis(50));
        engine.stop().expect("stop while worker blocked in recv");
        assert!(!engine.is_running());
    }
}
