//! Thread-and-mailbox substrate shared by the flow controller, machine, and
//! registry actors.
//!
//! Each actor owns a `Receiver<Message>` and runs a blocking loop on its own
//! thread; collaborators get a `Sender<Message>` clone to talk to it.
//! Because `std::sync::mpsc` already lets arbitrarily many senders feed one
//! receiver, "dynamic endpoint addition" -- handing a new collaborator the
//! ability to reach this actor -- is just cloning the sender, with no
//! poll-array merge step required.

use crate::message::Message;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

pub type Mailbox = Sender<Message>;

/// A running actor: its inbound sender and the thread handle, joined on
/// drop-order teardown by whoever owns it (typically after sending
/// `Message::Shutdown`).
pub struct ActorHandle {
    pub mailbox: Mailbox,
    join: Option<JoinHandle<()>>,
}

impl ActorHandle {
    pub fn join(mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn a named thread that owns `state` exclusively and dispatches every
/// inbound `Message` to `on_message` until that callback signals shutdown by
/// returning `false`, or the mailbox's last sender is dropped.
pub fn spawn_actor<S, F>(name: &'static str, state: S, on_message: F) -> ActorHandle
where
    S: Send + 'static,
    F: FnMut(&mut S, Message) -> bool + Send + 'static,
{
    spawn_actor_with(name, move |_self_mailbox| state, on_message)
}

/// Like [`spawn_actor`], but `build_state` receives a clone of the actor's
/// own mailbox before the thread starts -- needed by collaborators (e.g. a
/// `Machine`'s serial reader thread) that must hand their *own* sender to a
/// child so the child can talk back, rather than only a parent's.
pub fn spawn_actor_with<S, B, F>(name: &'static str, build_state: B, mut on_message: F) -> ActorHandle
where
    S: Send + 'static,
    B: FnOnce(Mailbox) -> S + Send + 'static,
    F: FnMut(&mut S, Message) -> bool + Send + 'static,
{
    let (tx, rx): (Sender<Message>, Receiver<Message>) = mpsc::channel();
    let self_mailbox = tx.clone();
    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut state = build_state(self_mailbox);
            info!(actor = name, "actor started");
            while let Ok(message) = rx.recv() {
                let is_shutdown = matches!(message, Message::Shutdown);
                let keep_going = on_message(&mut state, message);
                if is_shutdown || !keep_going {
                    break;
                }
            }
            debug!(actor = name, "actor loop exiting");
        })
        .expect("failed to spawn actor thread");

    ActorHandle {
        mailbox: tx,
        join: Some(join),
    }
}
