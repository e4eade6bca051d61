//! Scan session orchestration
//!
//! One session owns one transport and walks the fixed host call sequence:
//! negotiate → configure → start → read* → finish (or cancel). The device
//! is locked for the duration of a scan and released on every exit path —
//! success, error, or cancellation — with a drop guard as the last line of
//! defense.

use crate::error::{Error, Result};
use crate::protocol::capability::{self, ColorProfile, DeviceCapabilities, RetryPolicy};
use crate::protocol::codec::Command;
use crate::protocol::{ACK, NAK};
use crate::scan::plan::{self, ColorMode, ScanParameters, ScanRequest, Source};
use crate::scan::shuffle::{swap_red_blue, ColorShuffle, LineAssembler};
use crate::stream::{BlockOutcome, BlockSource, StreamingProtocol};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Focus position parameter: flatbed glass surface
const FOCUS_GLASS: u8 = 0x40;
/// Focus position parameter: film-holder plane above the glass
const FOCUS_FILM_PLANE: u8 = 0x59;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, nothing negotiated yet
    Idle,
    /// Capabilities negotiated
    Negotiated,
    /// Scan parameters programmed into the device
    ParametersSent,
    /// Start command issued
    Started,
    /// Blocks flowing
    Streaming,
    /// Final block received, post-processed bytes still buffered
    Draining,
    /// All bytes handed to the caller
    Done,
    /// Cancelled by the host; terminal
    Cancelled,
    /// Fatal error surfaced; terminal
    Failed,
}

/// Clonable handle for requesting cancellation from outside the read loop
/// (signal handlers, UI threads). Observed at the next block boundary.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// One scanning session over an exclusively owned transport
pub struct ScanSession<T: Transport> {
    transport: T,
    retry: RetryPolicy,
    state: SessionState,
    caps: Option<DeviceCapabilities>,
    params: Option<ScanParameters>,
    stream: Option<StreamingProtocol>,
    assembler: Option<LineAssembler>,
    shuffle: Option<ColorShuffle>,
    swap_channels: bool,
    profile: Option<ColorProfile>,
    /// Post-processed bytes not yet consumed by the caller
    pending: Vec<u8>,
    pending_pos: usize,
    cancel_flag: Arc<AtomicBool>,
    lock_held: bool,
}

impl<T: Transport> ScanSession<T> {
    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        ScanSession {
            transport,
            retry,
            state: SessionState::Idle,
            caps: None,
            params: None,
            stream: None,
            assembler: None,
            shuffle: None,
            swap_channels: false,
            profile: None,
            pending: Vec::new(),
            pending_pos: 0,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            lock_held: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.caps.as_ref()
    }

    pub fn parameters(&self) -> Option<&ScanParameters> {
        self.params.as_ref()
    }

    /// Handle for requesting cancellation asynchronously
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel_flag))
    }

    /// Query the device and build the immutable capability record
    pub fn negotiate(&mut self, model_override: Option<&str>) -> Result<&DeviceCapabilities> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState("negotiate after session began"));
        }
        let caps = capability::negotiate(&mut self.transport, &self.retry, model_override)?;
        self.state = SessionState::Negotiated;
        Ok(self.caps.insert(caps))
    }

    /// Plan the scan and program the parameters into the device.
    ///
    /// May be called again whenever the host changes a setting, as long as
    /// no transfer is in flight.
    pub fn configure(&mut self, request: &ScanRequest) -> Result<&ScanParameters> {
        match self.state {
            SessionState::Negotiated
            | SessionState::ParametersSent
            | SessionState::Done
            | SessionState::Cancelled => {}
            _ => return Err(Error::InvalidState("configure while transfer in flight")),
        }
        let caps = self.caps.as_ref().ok_or(Error::InvalidState("configure before negotiate"))?;
        let params = plan::plan(request, caps)?;
        let extended = caps.level.is_extended();
        let focus = caps.focus.then(|| match params.source {
            Source::TpuPrimary | Source::TpuSecondary => FOCUS_FILM_PLANE,
            _ => FOCUS_GLASS,
        });

        self.program_device(&params, extended, focus)?;

        log::info!(
            "Configured scan: {}x{} px at {} dpi, {} bytes/line, {} lines, line distance {}",
            params.rect.width,
            params.rect.height,
            params.resolution,
            params.bytes_per_line,
            params.lines,
            params.line_distance
        );
        self.state = SessionState::ParametersSent;
        Ok(self.params.insert(params))
    }

    fn program_device(
        &mut self,
        params: &ScanParameters,
        extended: bool,
        focus: Option<u8>,
    ) -> Result<()> {
        let rect = params.rect;
        let mut commands = vec![
            Command::SetColorMode(params.mode.wire_byte()),
            Command::SetDataFormat(params.depth),
        ];
        if extended {
            commands.push(Command::SetResolutionExt {
                x: params.resolution,
                y: params.resolution,
            });
            commands.push(Command::SetScanAreaExt {
                left: rect.left,
                top: rect.top,
                width: rect.width,
                height: rect.height,
            });
        } else {
            commands.push(Command::SetResolution {
                x: params.resolution as u16,
                y: params.resolution as u16,
            });
            commands.push(Command::SetScanArea {
                left: rect.left as u16,
                top: rect.top as u16,
                width: rect.width as u16,
                height: rect.height as u16,
            });
        }
        commands.push(Command::SetSource(params.source.wire_byte()));
        if let Some(position) = focus {
            commands.push(Command::SetFocus(position));
        }

        for command in commands {
            self.transport.send(&command.encode())?;
            match self.transport.recv_byte()? {
                ACK => {}
                NAK => return Err(Error::CommandRejected),
                other => return Err(Error::UnexpectedMarker(other)),
            }
        }
        Ok(())
    }

    /// Lock the device and issue the start handshake
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::ParametersSent {
            return Err(Error::InvalidState("start before configure"));
        }
        let caps = self.caps.as_ref().ok_or(Error::InvalidState("start before negotiate"))?;
        let params = self.params.as_ref().ok_or(Error::InvalidState("start before configure"))?;

        self.cancel_flag.store(false, Ordering::Relaxed);
        self.transport.lock_device()?;
        self.lock_held = true;

        self.swap_channels = caps.swap_channels && params.mode == ColorMode::Color;
        // The correction matrix only makes sense on 8-bit RGB triples
        self.profile = (params.mode == ColorMode::Color
            && params.depth == 8
            && !caps.color_profile.is_identity())
        .then(|| caps.color_profile.clone());
        self.shuffle = (params.line_distance > 0)
            .then(|| ColorShuffle::new(params.line_distance as usize, params.bytes_per_line));
        self.assembler = (self.swap_channels || self.profile.is_some() || self.shuffle.is_some())
            .then(|| LineAssembler::new(params.bytes_per_line));
        self.pending.clear();
        self.pending_pos = 0;

        let mut stream = StreamingProtocol::select(caps, params, self.retry.clone());
        if let Err(e) = stream.start(&mut self.transport) {
            return Err(self.fail(e));
        }
        self.stream = Some(stream);
        self.state = SessionState::Started;
        Ok(())
    }

    /// Pull scan bytes into `buf`; returns `(bytes_written, is_final)`.
    ///
    /// Cancellation is honored at block boundaries: the cancel command goes
    /// out once and the session ends in `Cancelled`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(usize, bool)> {
        loop {
            match self.state {
                SessionState::Started | SessionState::Streaming | SessionState::Draining => {}
                SessionState::Done => return Ok((0, true)),
                SessionState::Cancelled => return Err(Error::Cancelled),
                _ => return Err(Error::InvalidState("read outside a scan")),
            }

            // Hand out buffered bytes first
            if self.pending_pos < self.pending.len() {
                let n = buf.len().min(self.pending.len() - self.pending_pos);
                buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                let drained = self.pending_pos == self.pending.len();
                if drained {
                    self.pending.clear();
                    self.pending_pos = 0;
                    if self.state == SessionState::Draining {
                        self.release_lock();
                        self.state = SessionState::Done;
                        return Ok((n, true));
                    }
                }
                return Ok((n, false));
            }

            if self.state == SessionState::Draining {
                self.release_lock();
                self.state = SessionState::Done;
                return Ok((0, true));
            }

            if self.cancel_flag.load(Ordering::Relaxed) {
                self.teardown_cancelled()?;
                return Err(Error::Cancelled);
            }

            let mut stream = self.stream.take().ok_or(Error::InvalidState("no active stream"))?;
            let mut chunk = Vec::new();
            let outcome = stream.read_block(&mut self.transport, &mut chunk);
            self.stream = Some(stream);
            match outcome {
                Ok(BlockOutcome::More) => {
                    self.post_process(&chunk);
                    self.state = SessionState::Streaming;
                }
                Ok(BlockOutcome::Final) => {
                    self.post_process(&chunk);
                    self.state = SessionState::Draining;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Run channel correction and the shuffle window over raw block bytes
    fn post_process(&mut self, chunk: &[u8]) {
        let swap = self.swap_channels;
        match &mut self.assembler {
            Some(assembler) => {
                let profile = &self.profile;
                let shuffle = &mut self.shuffle;
                let pending = &mut self.pending;
                assembler.push(chunk, |line| {
                    if swap {
                        swap_red_blue(line);
                    }
                    if let Some(p) = profile {
                        p.correct_line(line);
                    }
                    match shuffle {
                        Some(s) => s.push_line(line, pending),
                        None => pending.extend_from_slice(line),
                    }
                });
            }
            None => self.pending.extend_from_slice(chunk),
        }
    }

    /// Request cancellation. Mid-stream this tears the transfer down at the
    /// current block boundary; otherwise it marks the flag for the next one.
    pub fn cancel(&mut self) -> Result<()> {
        self.cancel_flag.store(true, Ordering::Relaxed);
        match self.state {
            SessionState::Started | SessionState::Streaming | SessionState::Draining => {
                self.teardown_cancelled()
            }
            _ => Ok(()),
        }
    }

    fn teardown_cancelled(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.cancel(&mut self.transport)?;
        }
        self.release_lock();
        self.shuffle = None;
        self.assembler = None;
        self.profile = None;
        self.pending.clear();
        self.pending_pos = 0;
        self.state = SessionState::Cancelled;
        log::info!("Scan cancelled");
        Ok(())
    }

    /// Close out a finished or cancelled scan, keeping the negotiated
    /// capabilities for the next one
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            SessionState::Done | SessionState::Cancelled => {}
            SessionState::Negotiated | SessionState::ParametersSent => {}
            _ => return Err(Error::InvalidState("finish while transfer in flight")),
        }
        self.release_lock();
        self.stream = None;
        self.shuffle = None;
        self.assembler = None;
        self.profile = None;
        self.pending.clear();
        self.pending_pos = 0;
        self.state = if self.caps.is_some() {
            SessionState::Negotiated
        } else {
            SessionState::Idle
        };
        Ok(())
    }

    /// Fatal path: best-effort unlock, then surface the error
    fn fail(&mut self, err: Error) -> Error {
        self.release_lock();
        self.stream = None;
        self.state = SessionState::Failed;
        err
    }

    fn release_lock(&mut self) {
        if self.lock_held {
            if let Err(e) = self.transport.unlock_device() {
                log::warn!("Device unlock failed: {}", e);
            }
            self.lock_held = false;
        }
    }
}

impl<T: Transport> Drop for ScanSession<T> {
    fn drop(&mut self) {
        // Last line of defense; every normal path has already released
        self.release_lock();
    }
}
