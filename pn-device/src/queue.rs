use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender};

use crate::args::{KernelArgs, KernelError};
use crate::handle::Device;
use crate::module::KernelFunction;

/// An in-order command queue.
///
/// Committed command buffers are executed one at a time on a dedicated device thread,
/// strictly in commit order. Completion handlers run on that same thread, after the buffer finished.
pub struct CommandQueue {
    device: Device,
    sender: Option<Sender<QueueMessage>>,
    thread: Option<JoinHandle<()>>,
    counters: Arc<QueueCounters>,
}

/// A list of kernel dispatches plus the handlers to call once they have all executed.
pub struct CommandBuffer {
    device: Device,
    label: Option<String>,
    dispatches: Vec<Dispatch>,
    handlers: Vec<CompletionHandler>,
}

type CompletionHandler = Box<dyn FnOnce(CommandStatus) + Send>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CommandStatus {
    Completed,
    /// Execution stopped at the first failing dispatch, later dispatches in the same buffer were skipped.
    Error(KernelError),
}

#[derive(Debug)]
struct Dispatch {
    function: KernelFunction,
    args: KernelArgs,
}

enum QueueMessage {
    Execute(CommandBuffer),
    Synchronize(Sender<()>),
}

#[derive(Debug, Default)]
struct QueueCounters {
    committed: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl CommandQueue {
    pub fn new(device: Device) -> Self {
        let (sender, receiver) = flume::unbounded();
        let counters = Arc::new(QueueCounters::default());

        let thread_counters = Arc::clone(&counters);
        let thread = std::thread::Builder::new()
            .name(format!("pn-queue-{}", device.inner()))
            .spawn(move || queue_thread_main(receiver, thread_counters))
            .unwrap_or_else(|e| panic!("Failed to spawn queue thread: {}", e));

        CommandQueue {
            device,
            sender: Some(sender),
            thread: Some(thread),
            counters,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn command_buffer(&self) -> CommandBuffer {
        CommandBuffer::new(self.device)
    }

    /// Submit `buffer` for execution after everything committed before it.
    pub fn commit(&self, buffer: CommandBuffer) {
        assert_eq!(
            buffer.device, self.device,
            "Command buffer for {:?} committed to queue of {:?}",
            buffer.device, self.device
        );
        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        self.send(QueueMessage::Execute(buffer));
    }

    /// Block until every command buffer committed so far has executed and its handlers have run.
    pub fn synchronize(&self) {
        let (sender, receiver) = flume::bounded(1);
        self.send(QueueMessage::Synchronize(sender));
        receiver
            .recv()
            .unwrap_or_else(|_| panic!("Queue thread of {:?} died before synchronizing", self.device));
    }

    pub fn committed_count(&self) -> u64 {
        self.counters.committed.load(Ordering::Relaxed)
    }

    pub fn executed_count(&self) -> u64 {
        self.counters.executed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    fn send(&self, message: QueueMessage) {
        let sender = self.sender.as_ref().expect("sender is only taken in drop");
        if sender.send(message).is_err() {
            panic!("Queue thread of {:?} died", self.device);
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // closing the channel lets the thread drain the remaining buffers and exit
        drop(self.sender.take());

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Queue thread of {:?} panicked", self.device);
            }
        }
    }
}

fn queue_thread_main(receiver: Receiver<QueueMessage>, counters: Arc<QueueCounters>) {
    for message in receiver {
        match message {
            QueueMessage::Execute(buffer) => {
                let CommandBuffer {
                    device: _,
                    label,
                    dispatches,
                    handlers,
                } = buffer;

                let status = execute_dispatches(&dispatches);
                counters.executed.fetch_add(1, Ordering::Relaxed);

                if let CommandStatus::Error(e) = &status {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Command buffer {:?} failed: {}", label, e);
                } else {
                    log::trace!("Command buffer {:?} completed", label);
                }

                for handler in handlers {
                    handler(status.clone());
                }
            }
            QueueMessage::Synchronize(sender) => {
                // the other side may have given up waiting, that's fine
                let _ = sender.send(());
            }
        }
    }
}

fn execute_dispatches(dispatches: &[Dispatch]) -> CommandStatus {
    for dispatch in dispatches {
        if let Err(e) = dispatch.function.launch(&dispatch.args) {
            return CommandStatus::Error(e);
        }
    }
    CommandStatus::Completed
}

impl CommandBuffer {
    pub fn new(device: Device) -> Self {
        CommandBuffer {
            device,
            label: None,
            dispatches: vec![],
            handlers: vec![],
        }
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn dispatch(&mut self, function: &KernelFunction, args: KernelArgs) {
        assert_eq!(
            function.device(),
            self.device,
            "Kernel {:?} dispatched on command buffer of another device",
            function
        );
        for arg in args.buffers() {
            assert_eq!(arg.ptr.device(), self.device, "Buffer {:?} belongs to another device", arg.ptr);
        }

        self.dispatches.push(Dispatch {
            function: function.clone(),
            args,
        });
    }

    /// Register `handler` to be called on the queue thread once this buffer has finished.
    pub fn on_completed(&mut self, handler: impl FnOnce(CommandStatus) + Send + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty()
    }
}

impl CommandStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, CommandStatus::Completed)
    }
}

impl Debug for CommandQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("device", &self.device)
            .field("committed", &self.committed_count())
            .field("executed", &self.executed_count())
            .finish()
    }
}

impl Debug for CommandBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("device", &self.device)
            .field("label", &self.label)
            .field("dispatches", &self.dispatches)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
