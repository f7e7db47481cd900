use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, select};

use crate::audio::{OutputPort, SampleRing};
use crate::error::SyncError;
use crate::media::{AudioBackend, AudioBlockSource, FrameSlot, VideoBackend, VideoFrameSource, WavFile, open_video};
use crate::settings::{SessionConfig, TransportBackend};
use crate::sync::{
    BridgeMonitor, FrameProducer, RateConverter, Renderer, RendererRegistry, RendererState, Status, TransportBridge,
};
use crate::transport::free_run::FreeRunningTransport;
use crate::transport::output::CpalTransport;
use crate::transport::{TransportControl, TransportHooks, TransportProvider};

/// How often `run` checks whether every renderer has finished.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Interactive commands read from stdin.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Toggle,
    Seek(f64),
    /// Pause one renderer by name; it keeps stepping but re-presents its last frame.
    Hold(String),
    /// Resume a held renderer.
    Resume(String),
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            // bare Return quits
            return Ok(Command::Quit);
        };
        match word.to_ascii_lowercase().as_str() {
            "play" | "start" => Ok(Command::Play),
            "stop" => Ok(Command::Stop),
            "toggle" | "t" => Ok(Command::Toggle),
            "status" | "s" => Ok(Command::Status),
            "quit" | "q" | "exit" => Ok(Command::Quit),
            "seek" | "locate" => {
                let secs = words
                    .next()
                    .ok_or_else(|| "seek needs a position in seconds".to_string())?;
                match secs.parse::<f64>() {
                    Ok(s) if s.is_finite() && s >= 0.0 => Ok(Command::Seek(s)),
                    _ => Err(format!("invalid seek position '{secs}'")),
                }
            }
            verb @ ("hold" | "resume") => {
                let name = words
                    .next()
                    .ok_or_else(|| format!("{verb} needs a renderer name"))?
                    .to_string();
                Ok(if verb == "hold" {
                    Command::Hold(name)
                } else {
                    Command::Resume(name)
                })
            }
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

/// Why `run` returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Quit,
    /// Every renderer reached a terminal state, or a bounded run ended.
    Finished,
}

/// The audio renderer's side of the output ring, kept for status reports.
struct AudioOutput {
    ring: Arc<SampleRing>,
    drops: Arc<AtomicU64>,
}

/// One playback session: a transport provider, its renderers and the bridge between them.
pub struct Session {
    provider: Box<dyn TransportProvider>,
    control: TransportControl,
    registry: RendererRegistry,
    renderers: Vec<Renderer>,
    monitor: Arc<BridgeMonitor>,
    frames: Option<FrameSlot>,
    audio: Option<AudioOutput>,
    lost: Receiver<String>,
    xruns: Arc<AtomicU64>,
    bounded: bool,
    active: bool,
}

impl Session {
    /// Build the configured transport and open a session on it.
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let provider: Box<dyn TransportProvider> = match config.backend {
            TransportBackend::Device => Box::new(
                CpalTransport::open(config.device.as_deref(), config.cycle_size)
                    .context("opening audio output transport")?
                    .with_auto_connect(config.auto_connect),
            ),
            TransportBackend::FreeRunning => Box::new(
                FreeRunningTransport::new(config.sample_rate, config.cycle_size, config.physical_inputs)?
                    .with_auto_connect(config.auto_connect)
                    .with_max_cycles(config.max_cycles),
            ),
        };
        Self::with_provider(provider, config)
    }

    /// Open media, spawn renderers and activate `provider`.
    pub fn with_provider(provider: Box<dyn TransportProvider>, config: &SessionConfig) -> Result<Self> {
        if config.video.is_none() && config.audio.is_none() {
            bail!("nothing to play: configure a video and/or an audio file");
        }

        let registry = RendererRegistry::new();
        let bridge = TransportBridge::new(registry.clone(), config.pause_on_stop);
        let mut session = Self {
            control: provider.control(),
            provider,
            registry,
            renderers: Vec::new(),
            monitor: bridge.monitor(),
            frames: None,
            audio: None,
            lost: crossbeam_channel::never(),
            xruns: Arc::new(AtomicU64::new(0)),
            bounded: config.backend == TransportBackend::FreeRunning && config.max_cycles.is_some(),
            active: false,
        };

        if let Some(path) = &config.video {
            session.add_video(path)?;
        }
        if let Some(path) = &config.audio {
            session.add_audio(path, config)?;
        }
        session.activate(bridge)?;
        if config.autoplay {
            session.control.start();
        }
        Ok(session)
    }

    fn transport_rate(&self) -> f64 {
        f64::from(self.provider.sample_rate())
    }

    fn add_video(&mut self, path: &Path) -> Result<()> {
        let store = open_video(path).with_context(|| format!("opening video {}", path.display()))?;
        let meta = store.meta().clone();
        let state = Arc::new(RendererState::new(
            "video",
            RateConverter::new(meta.fps, self.transport_rate())?,
            self.provider.cycle_size(),
            meta.frame_count,
        )?);
        let slot = FrameSlot::new();
        self.add_renderer(state, VideoFrameSource::new(store, slot.clone()))?;
        self.frames = Some(slot);
        log::info!(
            "Video renderer: {}x{} at {:.3} fps, {} frames",
            meta.width,
            meta.height,
            meta.fps,
            meta.frame_count
        );
        Ok(())
    }

    fn add_audio(&mut self, path: &Path, config: &SessionConfig) -> Result<()> {
        let rate = self.provider.sample_rate();
        let wav = WavFile::open(path, config.block_size)
            .with_context(|| format!("opening audio {}", path.display()))?;
        let meta = *wav.meta();
        if meta.sample_rate != rate {
            return Err(SyncError::config(format!(
                "{} is {} Hz but the transport runs at {} Hz",
                path.display(),
                meta.sample_rate,
                rate
            ))
            .into());
        }
        let channels = usize::from(meta.channels);
        let transport_rate = self.transport_rate();
        let state = Arc::new(RendererState::new(
            "audio",
            RateConverter::new(transport_rate / f64::from(config.block_size), transport_rate)?,
            self.provider.cycle_size(),
            meta.block_count(config.block_size),
        )?);
        let ring = Arc::new(SampleRing::new(config.ring_capacity(channels)));
        self.provider
            .connect_output(OutputPort::new("audio", ring.clone(), channels));
        let source = AudioBlockSource::new(wav, ring.clone());
        let drops = source.drop_counter();
        self.add_renderer(state, source)?;
        self.audio = Some(AudioOutput { ring, drops });
        Ok(())
    }

    /// Spawn a renderer for `producer` and include it in the transport fan-out.
    /// A renderer added while the transport rolls joins at the current position.
    pub fn add_renderer<P: FrameProducer>(&mut self, state: Arc<RendererState>, producer: P) -> Result<()> {
        if self.renderers.iter().any(|r| r.name() == state.name()) {
            bail!("a renderer named '{}' already exists", state.name());
        }
        let renderer = Renderer::spawn(state, producer)?;
        let state = renderer.state().clone();
        self.registry.register(state.clone());
        if self.control.is_rolling() {
            state.request_seek(state.rate().to_native(self.control.position()));
        }
        self.renderers.push(renderer);
        Ok(())
    }

    fn activate(&mut self, mut bridge: TransportBridge) -> Result<()> {
        let rate = self.provider.sample_rate();
        let (lost_tx, lost) = crossbeam_channel::bounded(1);
        let xrun_count = self.xruns.clone();

        let hooks = TransportHooks::new(move |cycle| bridge.on_cycle(cycle))
            .on_shutdown(move |reason| {
                let _ = lost_tx.try_send(reason);
            })
            .on_blocksize(|size| log::info!("Transport cycle size is {size} samples"))
            .on_samplerate(move |now| {
                if now != rate {
                    log::warn!("Transport sample rate changed to {now} Hz (renderers assume {rate} Hz)");
                }
            })
            .on_xrun(move |late| {
                xrun_count.fetch_add(1, Ordering::Relaxed);
                log::debug!("Transport cycle late by {:.2}ms", late.as_secs_f64() * 1000.0);
            });

        self.provider.activate(hooks).context("activating transport")?;
        self.lost = lost;
        self.active = true;
        log::info!(
            "Session open on {} with {} renderer(s)",
            self.provider.name(),
            self.renderers.len()
        );
        Ok(())
    }

    #[cfg(test)]
    pub fn control(&self) -> &TransportControl {
        &self.control
    }

    #[cfg(test)]
    pub fn monitor(&self) -> &Arc<BridgeMonitor> {
        &self.monitor
    }

    #[cfg(test)]
    pub fn renderers(&self) -> &[Renderer] {
        &self.renderers
    }

    /// Latest presented video frame, when a video renderer exists.
    #[cfg(test)]
    pub fn frames(&self) -> Option<&FrameSlot> {
        self.frames.as_ref()
    }

    pub fn apply(&self, command: Command) {
        match command {
            Command::Play => self.control.start(),
            Command::Stop => self.control.stop(),
            Command::Toggle => {
                let rolling = self.control.toggle();
                log::info!("Transport {}", if rolling { "starting" } else { "stopping" });
            }
            Command::Seek(secs) => {
                self.control.locate_seconds(secs);
                log::info!("Locate to {secs:.3}s");
            }
            Command::Hold(name) => match self.renderer(&name) {
                Some(renderer) => {
                    renderer.pause();
                    log::info!("{name}: held ({})", renderer.status().label());
                }
                None => log::warn!("no renderer named '{name}'"),
            },
            Command::Resume(name) => match self.renderer(&name) {
                Some(renderer) => {
                    renderer.play();
                    log::info!("{name}: resumed ({})", renderer.status().label());
                }
                None => log::warn!("no renderer named '{name}'"),
            },
            Command::Status => println!("{}", self.status_report()),
            Command::Quit => {}
        }
    }

    fn renderer(&self, name: &str) -> Option<&Renderer> {
        self.renderers.iter().find(|r| r.name() == name)
    }

    pub fn status_report(&self) -> String {
        let mut report = format!(
            "transport {} at {:.3}s, last cycle {} at sample {} ({} cycles, {} xruns)",
            self.control.state().label(),
            self.control.seconds(),
            self.monitor.state().label(),
            self.monitor.position(),
            self.monitor.cycles(),
            self.xruns.load(Ordering::Relaxed)
        );
        for renderer in &self.renderers {
            let info = renderer.info();
            report.push_str(&format!(
                "\n  {:<6} {:<8} frame {}/{} lag {} ({} steps, {} seeks)",
                info.name,
                info.status.label(),
                info.frame_index,
                info.total_frames,
                info.lag,
                info.steps,
                info.seeks
            ));
            if let Some(failure) = &info.failure {
                report.push_str(&format!("\n         {failure}"));
            }
        }
        if let Some(audio) = &self.audio {
            report.push_str(&format!(
                "\n  audio ring {}/{} samples queued, {} dropped",
                audio.ring.available(),
                audio.ring.capacity(),
                audio.drops.load(Ordering::Relaxed)
            ));
        }
        if let Some(slot) = &self.frames {
            if let Some((index, frame)) = slot.latest() {
                report.push_str(&format!(
                    "\n  showing frame {index} ({}x{}), {} presentations",
                    frame.width,
                    frame.height,
                    slot.presented()
                ));
            }
        }
        report
    }

    fn all_stopped(&self) -> bool {
        self.renderers.iter().all(|r| r.status() == Status::Stopped)
    }

    /// Drive the session from stdin until quit, completion or transport loss.
    pub fn run(&mut self) -> Result<Exit> {
        let commands = spawn_stdin_reader()?;
        println!(
            "Commands: play, stop, toggle, seek <secs>, hold <renderer>, resume <renderer>, status, quit (Return quits)"
        );
        self.run_with(commands)
    }

    /// Drive the session from a command channel. A disconnected channel is ignored.
    pub fn run_with(&mut self, commands: Receiver<Command>) -> Result<Exit> {
        let lost = self.lost.clone();
        let closed = crossbeam_channel::never();
        let mut commands_open = true;
        loop {
            let input = if commands_open { &commands } else { &closed };
            select! {
                recv(input) -> msg => match msg {
                    Ok(Command::Quit) => return Ok(Exit::Quit),
                    Ok(command) => self.apply(command),
                    Err(_) => commands_open = false,
                },
                recv(lost) -> msg => {
                    let reason = msg.unwrap_or_else(|_| "transport hook dropped".into());
                    self.active = false;
                    if self.bounded {
                        log::info!("Session finished: {reason}");
                        return Ok(Exit::Finished);
                    }
                    log::error!("Transport lost: {reason}");
                    return Err(SyncError::TransportLost(reason).into());
                },
                default(IDLE_POLL) => {
                    if self.all_stopped() {
                        log::info!("All renderers finished");
                        return Ok(Exit::Finished);
                    }
                },
            }
        }
    }

    /// Stop every renderer and release the transport. Idempotent.
    pub fn shutdown(&mut self) {
        self.provider.deactivate();
        for renderer in &mut self.renderers {
            renderer.stop();
            self.registry.deregister(renderer.name());
        }
        if self.active {
            log::info!("Session closed");
        }
        self.active = false;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_stdin_reader() -> Result<Receiver<Command>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("framelock-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.parse::<Command>() {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
        })
        .context("spawning stdin reader")?;
    Ok(rx)
}
