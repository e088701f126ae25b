//! Matches reply lines to in-flight commands.
//!
//! Replies are assumed to come back in submission order, so a reply always
//! resolves the oldest (lowest id) pending command. The `#id` tag the device
//! echoes is stripped but not used for routing.

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::proto::format::{frame_command, strip_tag};

/// Correlation ids wrap at this value.
pub const ID_MODULUS: u16 = 10_000;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Pending commands older than this are reaped by [`CommandCorrelator::cleanup`].
pub const STALE_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct PendingCommand {
    pub id: u16,
    pub command: String,
    pub submitted_at: Instant,
    reply: Sender<String>,
}

#[derive(Debug, Default)]
struct Table {
    counter: u16,
    pending: BTreeMap<u16, PendingCommand>,
}

impl Table {
    fn next_id(&mut self) -> u16 {
        self.counter = (self.counter + 1) % ID_MODULUS;
        self.counter
    }
}

/// Table of commands awaiting a reply.
#[derive(Debug, Default)]
pub struct CommandCorrelator {
    table: Mutex<Table>,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `command` through `write` and, if a reply is expected, blocks
    /// until the reply arrives, `stop` is disconnected, or `timeout` passes.
    ///
    /// Fire-and-forget commands never enter the table and return an empty
    /// string. A pending entry reaped by cleanup surfaces as a timeout.
    pub fn send<W>(
        &self,
        command: &str,
        expect_response: bool,
        timeout: Duration,
        stop: &Receiver<()>,
        write: W,
    ) -> Result<String>
    where
        W: FnOnce(&[u8]) -> Result<()>,
    {
        if !expect_response {
            write(&frame_command(command, None))?;
            trace!(command, "sent, no reply expected");
            return Ok(String::new());
        }

        let (id, reply) = self.register(command);
        if let Err(e) = write(&frame_command(command, Some(id))) {
            self.remove(id);
            return Err(e);
        }
        trace!(command, id, "sent, awaiting reply");

        select! {
            recv(reply) -> msg => match msg {
                Ok(text) => {
                    debug!(command, id, "completed");
                    Ok(strip_tag(&text).to_string())
                }
                Err(_) if is_stopped(stop) => Err(disconnected()),
                Err(_) => Err(Error::Timeout(format!("command discarded as stale: {command}"))),
            },
            recv(stop) -> _ => {
                self.remove(id);
                Err(disconnected())
            }
            default(timeout) => {
                self.remove(id);
                Err(Error::Timeout(format!("command timed out: {command}")))
            }
        }
    }

    /// Allocates the next id and files a pending entry for `command`.
    pub fn register(&self, command: &str) -> (u16, Receiver<String>) {
        let (tx, rx) = bounded(1);
        let mut table = self.table.lock();
        let id = table.next_id();
        table.pending.insert(
            id,
            PendingCommand {
                id,
                command: command.to_string(),
                submitted_at: Instant::now(),
                reply: tx,
            },
        );
        (id, rx)
    }

    /// Hands a reply line to the oldest pending command. An exact echo of
    /// that command's text is ignored and the entry keeps waiting.
    pub fn route_response(&self, content: &str) {
        if content.is_empty() {
            return;
        }
        let mut table = self.table.lock();
        let Some(oldest) = table.pending.first_entry() else {
            return;
        };
        if oldest.get().command == content {
            trace!(id = oldest.get().id, "skipping echo");
            return;
        }
        let pending = oldest.remove();
        // Capacity is one and the entry is gone after this, so a full slot
        // only means the reply is dropped.
        let _ = pending.reply.try_send(content.to_string());
    }

    /// Drops entries older than `stale_after`. Returns how many were removed.
    pub fn cleanup(&self, now: Instant, stale_after: Duration) -> usize {
        let mut table = self.table.lock();
        let before = table.pending.len();
        table.pending.retain(|_, p| {
            let fresh = now.saturating_duration_since(p.submitted_at) <= stale_after;
            if !fresh {
                debug!(command = %p.command, id = p.id, "reaping stale command");
            }
            fresh
        });
        before - table.pending.len()
    }

    pub fn remove(&self, id: u16) -> Option<PendingCommand> {
        self.table.lock().pending.remove(&id)
    }

    /// Discards every pending entry without delivering anything.
    pub fn clear(&self) -> usize {
        let mut table = self.table.lock();
        let n = table.pending.len();
        table.pending.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.table.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_stopped(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Err(TryRecvError::Disconnected))
}

fn disconnected() -> Error {
    Error::Connection("disconnected while waiting for response".into())
}
