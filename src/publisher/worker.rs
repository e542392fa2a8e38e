//! Worker thread owning the connection and the publish buffer.
//!
//! All connection signals and write commands are serialized through this one
//! thread, so state changes, buffering and drains never race. Signals are
//! always handled before pending commands, which keeps the state a submit
//! observes as current as possible.

use std::{
    io, thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvError, Sender, TrySendError, bounded, select};
use log::warn;

use crate::{
    broker::{ConnectionSignal, SignalSink},
    connection::{ConnectionManager, Transition},
    rate_limited_warner::RateLimitedWarner,
};

use super::{
    buffered::{BufferedMessage, BufferedPublisher},
    stats::StreamStats,
};

/// Name given to the worker thread.
pub const WORKER_THREAD_NAME: &str = "amqp-log-stream";

/// Commands processed by the worker thread.
#[derive(Debug)]
pub enum StreamCommand {
    Publish(BufferedMessage),
    Flush(Sender<()>),
    Shutdown(Sender<()>),
}

/// Everything the worker takes ownership of.
pub struct WorkerParts {
    pub connection: ConnectionManager,
    pub publisher: BufferedPublisher,
    pub sink: SignalSink,
    pub signals: Receiver<ConnectionSignal>,
}

pub fn spawn_worker(
    parts: WorkerParts,
    capacity: usize,
) -> io::Result<(Sender<StreamCommand>, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded(capacity);
    let handle = thread::Builder::new()
        .name(WORKER_THREAD_NAME.into())
        .spawn(move || Worker::new(parts).run(rx))?;
    Ok((tx, handle))
}

enum Step {
    Signal(Result<ConnectionSignal, RecvError>),
    Command(Result<StreamCommand, RecvError>),
    RetryDue,
}

struct Worker {
    connection: ConnectionManager,
    publisher: BufferedPublisher,
    sink: SignalSink,
    signals: Receiver<ConnectionSignal>,
    retry_at: Option<Instant>,
}

impl Worker {
    fn new(parts: WorkerParts) -> Self {
        Self {
            connection: parts.connection,
            publisher: parts.publisher,
            sink: parts.sink,
            signals: parts.signals,
            retry_at: None,
        }
    }

    fn run(mut self, commands: Receiver<StreamCommand>) {
        let transition = self.connection.start(&self.sink);
        self.apply(transition);
        loop {
            self.pump_signals();
            match self.next_step(&commands) {
                Step::Signal(Ok(signal)) => self.on_signal(signal),
                // The worker holds a sink, so the signal channel never closes.
                Step::Signal(Err(_)) => {}
                Step::RetryDue => {
                    self.retry_at = None;
                    let transition = self.connection.retry(&self.sink);
                    self.apply(transition);
                }
                Step::Command(Ok(command)) => {
                    // A command may win the select against signals sent
                    // before it; apply those first.
                    self.pump_signals();
                    if !self.on_command(command) {
                        return;
                    }
                }
                Step::Command(Err(_)) => {
                    self.shutdown();
                    return;
                }
            }
        }
    }

    fn pump_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.on_signal(signal);
        }
    }

    /// Returns `false` once the worker should exit.
    fn on_command(&mut self, command: StreamCommand) -> bool {
        match command {
            StreamCommand::Publish(message) => {
                self.publisher.submit(self.connection.exchange(), message);
            }
            StreamCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            StreamCommand::Shutdown(ack) => {
                self.shutdown();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn next_step(&self, commands: &Receiver<StreamCommand>) -> Step {
        let Some(retry_at) = self.retry_at else {
            return select! {
                recv(self.signals) -> signal => Step::Signal(signal),
                recv(commands) -> command => Step::Command(command),
            };
        };
        let timeout = retry_at.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return Step::RetryDue;
        }
        select! {
            recv(self.signals) -> signal => Step::Signal(signal),
            recv(commands) -> command => Step::Command(command),
            default(timeout) => Step::RetryDue,
        }
    }

    fn on_signal(&mut self, signal: ConnectionSignal) {
        let transition = self.connection.handle_signal(signal);
        self.apply(transition);
    }

    fn apply(&mut self, transition: Option<Transition>) {
        match transition {
            Some(Transition::Connected) => {
                self.retry_at = None;
                self.publisher.drain(self.connection.exchange());
            }
            Some(Transition::RetryAfter(delay)) => {
                self.retry_at = Some(Instant::now() + delay);
            }
            None => {}
        }
    }

    fn shutdown(&mut self) {
        self.connection.shutdown();
        let lost = self.publisher.discard();
        if lost > 0 {
            warn!("AmqpStream closed with {lost} undelivered buffered records");
        }
    }
}

/// Queue a message for the worker without blocking the caller.
pub fn enqueue_message(
    tx: &Sender<StreamCommand>,
    message: BufferedMessage,
    warner: &RateLimitedWarner,
    stats: &StreamStats,
) {
    let reason = match tx.try_send(StreamCommand::Publish(message)) {
        Ok(()) => return,
        Err(TrySendError::Full(_)) => "queue full",
        Err(TrySendError::Disconnected(_)) => "worker stopped",
    };
    stats.record_queue_drop();
    warner.record_drop();
    warner.warn_if_due(|count| {
        warn!("AmqpStream {reason}; dropped {count} records");
    });
}

/// Wait until every command queued before this call has been processed.
pub fn flush_queue(tx: &Sender<StreamCommand>, timeout: Duration) -> bool {
    let (ack_tx, ack_rx) = bounded(1);
    if tx
        .send_timeout(StreamCommand::Flush(ack_tx), timeout)
        .is_err()
    {
        return false;
    }
    ack_rx.recv_timeout(timeout).is_ok()
}
