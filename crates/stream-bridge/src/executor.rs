//! Dedicated decode thread.
//!
//! The [`DecoderPipeline`] is moved onto one named worker thread and is only
//! reached through [`DecodeCmd`] messages, processed strictly in post order.

use std::io;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::packet::Packet;
use crate::pipeline::DecoderPipeline;

pub enum DecodeCmd {
    Packet(Packet),
    SurfaceChanged,
    /// Tear the decoder down and acknowledge on `ack`
    Release { ack: Sender<()> },
    Quit,
}

/// Cloneable posting side of the decode thread
#[derive(Clone)]
pub struct DecodeHandle {
    cmd_tx: Sender<DecodeCmd>,
}

impl DecodeHandle {
    /// Enqueue `cmd`; false once the decode thread is gone
    pub fn post(&self, cmd: DecodeCmd) -> bool {
        match self.cmd_tx.send(cmd) {
            Ok(()) => true,
            Err(_) => {
                trace!("decode executor: post after shutdown dropped");
                false
            }
        }
    }

    pub fn post_packet(&self, packet: Packet) -> bool {
        self.post(DecodeCmd::Packet(packet))
    }

    pub fn post_surface_changed(&self) -> bool {
        self.post(DecodeCmd::SurfaceChanged)
    }
}

pub struct DecodeExecutor {
    name: String,
    handle: DecodeHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl DecodeExecutor {
    /// Start the worker thread `name` owning `pipeline`
    pub fn spawn(name: &str, pipeline: DecoderPipeline) -> io::Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded::<DecodeCmd>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(pipeline, cmd_rx))?;
        info!(thread = name, "decode executor: started");
        Ok(Self {
            name: name.to_string(),
            handle: DecodeHandle { cmd_tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> DecodeHandle {
        self.handle.clone()
    }

    pub fn post(&self, cmd: DecodeCmd) -> bool {
        self.handle.post(cmd)
    }

    /// Post a final teardown, wait for it at most `timeout`, then stop the
    /// thread without joining it. Returns whether the teardown was observed.
    pub fn shutdown_safely(mut self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = bounded(1);
        let completed =
            self.handle.post(DecodeCmd::Release { ack: ack_tx }) && ack_rx.recv_timeout(timeout).is_ok();
        if completed {
            debug!(thread = %self.name, "decode executor: teardown acknowledged");
        } else {
            warn!(
                thread = %self.name,
                timeout_ms = timeout.as_millis() as u64,
                "decode executor: teardown not acknowledged in time, continuing"
            );
        }
        self.handle.post(DecodeCmd::Quit);
        // detached: a wedged decoder call must not block the caller
        self.thread.take();
        info!(thread = %self.name, "decode executor: shut down");
        completed
    }
}

impl Drop for DecodeExecutor {
    fn drop(&mut self) {
        if self.thread.take().is_some() {
            self.handle.post(DecodeCmd::Quit);
        }
    }
}

fn run(mut pipeline: DecoderPipeline, cmd_rx: Receiver<DecodeCmd>) {
    for cmd in cmd_rx.iter() {
        match cmd {
            DecodeCmd::Packet(packet) => pipeline.on_packet(packet),
            DecodeCmd::SurfaceChanged => pipeline.on_surface_possibly_changed(),
            DecodeCmd::Release { ack } => {
                pipeline.release();
                let _ = ack.send(());
            }
            DecodeCmd::Quit => break,
        }
    }
    pipeline.release();
    debug!("decode executor: worker exited");
}
