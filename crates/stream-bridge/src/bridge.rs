//! Host-facing entry points for one video channel.

use std::sync::Arc;

use native_decoder::{DecoderBackend, RenderTarget};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::client::{CameraStreamClient, ClientStats, PacketSink, StreamSource};
use crate::config::BridgeConfig;
use crate::executor::DecodeExecutor;
use crate::pipeline::DecoderPipeline;
use crate::surface::SurfaceState;

/// Looks up the stream source; `None` while the source is not ready
pub type SourceProvider = Box<dyn Fn() -> Option<Arc<dyn StreamSource>> + Send + Sync>;

struct Running {
    client: CameraStreamClient,
    executor: DecodeExecutor,
}

/// Wires stream source, decode thread and decoder together for one render target
pub struct BridgeController {
    config: BridgeConfig,
    provider: SourceProvider,
    backend: Arc<dyn DecoderBackend>,
    surface: Arc<SurfaceState>,
    running: Mutex<Option<Running>>,
}

impl BridgeController {
    pub fn new(
        config: BridgeConfig,
        provider: SourceProvider,
        backend: Arc<dyn DecoderBackend>,
    ) -> Self {
        Self {
            config,
            provider,
            backend,
            surface: Arc::new(SurfaceState::new()),
            running: Mutex::new(None),
        }
    }

    /// Start the channel, or point a running channel at `target`.
    ///
    /// Zero dimensions keep the previously declared size. Failures are logged.
    pub fn start_or_update(&self, target: Arc<dyn RenderTarget>, width: u32, height: u32) {
        let Some(source) = (self.provider)() else {
            error!("bridge: stream source unavailable (not ready?)");
            return;
        };

        let mut running = self.running.lock();
        self.surface.update(target, width, height);

        if let Some(running) = running.as_ref() {
            running.executor.handle().post_surface_changed();
            return;
        }

        let pipeline = DecoderPipeline::new(self.surface.clone(), self.backend.clone(), &self.config);
        let executor = match DecodeExecutor::spawn(&self.config.decode_thread_name, pipeline) {
            Ok(executor) => executor,
            Err(err) => {
                error!(error = %err, "bridge: failed to start decode thread");
                return;
            }
        };

        let handle = executor.handle();
        let sink: PacketSink = Arc::new(move |packet| {
            handle.post_packet(packet);
        });
        let mut client = CameraStreamClient::new(
            source,
            self.config.component,
            self.config.keep_alive_decoding,
            self.config.log.rx(),
            sink,
        );
        if let Err(err) = client.start() {
            error!(error = %err, "bridge: failed to subscribe to stream");
            executor.shutdown_safely(self.config.shutdown_timeout());
            return;
        }

        *running = Some(Running { client, executor });
        info!(
            component = ?self.config.component,
            "bridge: started, waiting for stream"
        );
    }

    /// Stop receiving, tear the decoder down on the decode thread and end it.
    /// No-op when not started.
    pub fn stop(&self) {
        let taken = {
            let mut running = self.running.lock();
            let taken = running.take();
            if taken.is_some() {
                self.surface.clear();
            }
            taken
        };
        let Some(Running {
            mut client,
            executor,
        }) = taken
        else {
            return;
        };

        client.stop();
        let stats = client.stats();
        let completed = executor.shutdown_safely(self.config.shutdown_timeout());
        info!(
            frames = stats.frames,
            bytes = stats.bytes,
            clean = completed,
            "bridge: stopped"
        );
    }

    pub fn is_started(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Receive counters of the running channel
    pub fn client_stats(&self) -> Option<ClientStats> {
        self.running.lock().as_ref().map(|r| r.client.stats())
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        self.stop();
    }
}
