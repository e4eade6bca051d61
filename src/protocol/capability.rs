//! Capability negotiation
//!
//! Two queries build the immutable `DeviceCapabilities` record: the identity
//! query (command level, resolutions, flatbed extent, depths) and the
//! extended status query (option units, error bits, model name). The command
//! level decides which opcodes and which streaming protocol are legal for
//! the rest of the session.
//!
//! The identity payload is a tagged-field scan, not a fixed struct: after
//! the two level bytes, fields arrive as `[tag][len][payload]` triples until
//! the declared payload length is exhausted. Unknown tags are skipped using
//! their declared length.

use super::codec::Command;
use super::info::{read_response, HeaderKind};
use super::quirks;
use super::STATUS_FATAL_ERROR;
use crate::error::{Error, FaultKind, Result};
use crate::transport::Transport;
use std::time::Duration;

/// Bounded sleep-and-retry policy for warm-up recovery
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts before failing with a busy error
    pub max_attempts: u32,
    /// Sleep between attempts
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            wait: Duration::from_secs(5),
        }
    }
}

/// Command-set level, parsed from two ASCII bytes in the identity payload
///
/// The leading letter selects the streaming protocol: `B` levels use the
/// per-block handshake, `D` levels use the length-prefixed bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLevel {
    /// `B`-class: simple opcodes, standard block protocol
    Standard(u8),
    /// `D`-class: extended opcodes, length-prefixed block protocol
    Extended(u8),
}

impl CommandLevel {
    fn parse(bytes: [u8; 2]) -> Result<Self> {
        let revision = bytes[1].wrapping_sub(b'0');
        match bytes[0] {
            b'B' => Ok(CommandLevel::Standard(revision)),
            b'D' => Ok(CommandLevel::Extended(revision)),
            _ => Err(Error::UnknownCommandLevel(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
        }
    }

    /// True when the extended (length-prefixed bulk) streaming protocol and
    /// the `FS` opcode namespace are legal
    pub fn is_extended(&self) -> bool {
        matches!(self, CommandLevel::Extended(_))
    }
}

impl std::fmt::Display for CommandLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandLevel::Standard(r) => write!(f, "B{}", r),
            CommandLevel::Extended(r) => write!(f, "D{}", r),
        }
    }
}

/// Scan-area extent in device pixels at the optical resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

/// Document feeder capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdfCapabilities {
    pub extent: Extent,
    pub duplex: bool,
}

/// Transparency-unit capabilities (film scanning)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpuCapabilities {
    pub extent: Extent,
}

/// 3x3 color-correction coefficient profile, row-major
///
/// Identity unless the device reports its own profile; consumers multiply
/// RGB triples through it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorProfile(pub [f32; 9]);

impl Default for ColorProfile {
    fn default() -> Self {
        ColorProfile([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}

impl ColorProfile {
    pub fn is_identity(&self) -> bool {
        *self == ColorProfile::default()
    }

    /// Multiply every 8-bit RGB triple in `line` through the matrix,
    /// clamping to the sample range. Deeper samples pass through uncorrected;
    /// callers gate on depth.
    pub fn correct_line(&self, line: &mut [u8]) {
        let m = &self.0;
        for px in line.chunks_exact_mut(3) {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            px[0] = (m[0] * r + m[1] * g + m[2] * b).round().clamp(0.0, 255.0) as u8;
            px[1] = (m[3] * r + m[4] * g + m[5] * b).round().clamp(0.0, 255.0) as u8;
            px[2] = (m[6] * r + m[7] * g + m[8] * b).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Immutable capability record, built once per device open
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub model: String,
    pub level: CommandLevel,
    /// Discrete resolution list, ascending DPI
    pub resolutions: Vec<u32>,
    pub min_resolution: u32,
    pub max_resolution: u32,
    /// Optical resolution of the sensor, DPI
    pub optical_resolution: u32,
    /// Bit depths the device accepts
    pub depths: Vec<u8>,
    pub max_depth: u8,
    pub flatbed: Extent,
    pub adf: Option<AdfCapabilities>,
    pub tpu: Option<TpuCapabilities>,
    /// Focus positioning supported (film holders sit above the glass)
    pub focus: bool,
    /// Vertical offset between color sensor rows at optical resolution
    pub max_line_distance: u32,
    /// Color planes arrive offset and must be realigned
    pub needs_color_reorder: bool,
    /// Reported vertical extent was doubled by the firmware-bug heuristic
    pub double_vertical: bool,
    /// Red/blue channels arrive swapped on this model
    pub swap_channels: bool,
    pub color_profile: ColorProfile,
}

// Identity payload field tags
const TAG_RESOLUTION: u8 = b'R';
const TAG_AREA: u8 = b'A';
const TAG_DEPTHS: u8 = b'D';
const TAG_LINE_DISTANCE: u8 = b'L';
const TAG_OPTICAL: u8 = b'O';
const TAG_FOCUS: u8 = b'F';

// Extended status payload layout
const EXT_STATUS_LEN: usize = 28;
const EXT_DEVICE_WARMING_UP: u8 = 0x02;
const EXT_ADF_INSTALLED: u8 = 0x80;
const EXT_ADF_PAPER_JAM: u8 = 0x40;
const EXT_ADF_NO_PAPER: u8 = 0x20;
const EXT_ADF_COVER_OPEN: u8 = 0x10;
const EXT_ADF_DUPLEX: u8 = 0x08;
const EXT_ADF_ENABLED: u8 = 0x01;
const EXT_TPU_INSTALLED: u8 = 0x80;
const EXT_TPU_ENABLED: u8 = 0x01;

/// Parsed extended status record
#[derive(Debug, Clone)]
pub struct ExtendedStatus {
    pub device_status: u8,
    pub adf_status: u8,
    pub tpu_status: u8,
    pub adf_extent: Extent,
    pub tpu_extent: Extent,
    pub model: String,
}

impl ExtendedStatus {
    pub fn warming_up(&self) -> bool {
        self.device_status & EXT_DEVICE_WARMING_UP != 0
    }

    pub fn adf_installed(&self) -> bool {
        self.adf_status & EXT_ADF_INSTALLED != 0
    }

    pub fn adf_enabled(&self) -> bool {
        self.adf_status & EXT_ADF_ENABLED != 0
    }

    pub fn adf_duplex(&self) -> bool {
        self.adf_status & EXT_ADF_DUPLEX != 0
    }

    pub fn tpu_installed(&self) -> bool {
        self.tpu_status & EXT_TPU_INSTALLED != 0
    }

    pub fn tpu_enabled(&self) -> bool {
        self.tpu_status & EXT_TPU_ENABLED != 0
    }

    /// Map error bits to a specific fault, worst first
    pub fn check_faults(&self) -> Result<()> {
        if self.adf_status & EXT_ADF_PAPER_JAM != 0 {
            return Err(Error::Fault(FaultKind::PaperJam));
        }
        if self.adf_status & EXT_ADF_COVER_OPEN != 0 {
            return Err(Error::Fault(FaultKind::CoverOpen));
        }
        if self.adf_installed() && self.adf_status & EXT_ADF_NO_PAPER != 0 {
            return Err(Error::Fault(FaultKind::NoPaper));
        }
        if self.device_status & STATUS_FATAL_ERROR != 0 && !self.warming_up() {
            return Err(Error::Fault(FaultKind::Hardware));
        }
        Ok(())
    }
}

/// Issue the extended status query and parse the reply
pub fn query_extended_status(transport: &mut dyn Transport) -> Result<ExtendedStatus> {
    transport.send(&Command::ExtendedStatus.encode())?;
    let (_, payload) = read_response(transport, HeaderKind::Basic)?;
    parse_extended_status(&payload)
}

fn parse_extended_status(payload: &[u8]) -> Result<ExtendedStatus> {
    if payload.len() < EXT_STATUS_LEN {
        return Err(Error::LengthMismatch {
            declared: EXT_STATUS_LEN,
            actual: payload.len(),
        });
    }
    let extent_at = |offset: usize| Extent {
        width: u16::from_le_bytes([payload[offset], payload[offset + 1]]) as u32,
        height: u16::from_le_bytes([payload[offset + 2], payload[offset + 3]]) as u32,
    };
    let model = String::from_utf8_lossy(&payload[12..28])
        .trim_end_matches([' ', '\0'])
        .to_string();
    Ok(ExtendedStatus {
        device_status: payload[0],
        adf_status: payload[1],
        tpu_status: payload[2],
        adf_extent: extent_at(4),
        tpu_extent: extent_at(8),
        model,
    })
}

/// Raw identity record before heuristics and quirks
#[derive(Debug, Clone, Default)]
struct Identity {
    level_bytes: [u8; 2],
    resolutions: Vec<u32>,
    area: Option<Extent>,
    depths: Vec<u8>,
    line_distance: u32,
    optical: Option<u32>,
    focus: bool,
}

fn parse_identity(payload: &[u8]) -> Result<Identity> {
    if payload.len() < 2 {
        return Err(Error::LengthMismatch {
            declared: 2,
            actual: payload.len(),
        });
    }
    let mut identity = Identity {
        level_bytes: [payload[0], payload[1]],
        ..Identity::default()
    };

    let mut pos = 2;
    while pos + 2 <= payload.len() {
        let tag = payload[pos];
        let len = payload[pos + 1] as usize;
        if pos + 2 + len > payload.len() {
            return Err(Error::LengthMismatch {
                declared: len,
                actual: payload.len() - pos - 2,
            });
        }
        let field = &payload[pos + 2..pos + 2 + len];
        match (tag, len) {
            (TAG_RESOLUTION, 2) => {
                identity
                    .resolutions
                    .push(u16::from_le_bytes([field[0], field[1]]) as u32);
            }
            (TAG_AREA, 4) => {
                identity.area = Some(Extent {
                    width: u16::from_le_bytes([field[0], field[1]]) as u32,
                    height: u16::from_le_bytes([field[2], field[3]]) as u32,
                });
            }
            (TAG_DEPTHS, _) => identity.depths = field.to_vec(),
            (TAG_LINE_DISTANCE, 1) => identity.line_distance = field[0] as u32,
            (TAG_OPTICAL, 2) => {
                identity.optical = Some(u16::from_le_bytes([field[0], field[1]]) as u32)
            }
            (TAG_FOCUS, 1) => identity.focus = field[0] != 0,
            _ => {
                log::debug!(
                    "Skipping unknown identity field: tag {:#04x}, {} bytes",
                    tag,
                    len
                );
            }
        }
        pos += 2 + len;
    }

    Ok(identity)
}

/// Run the full negotiation: identity, extended status, heuristics, quirks.
///
/// Any step failing aborts the attach; no partial capability record is ever
/// returned. A device still warming up is retried within `retry` bounds.
pub fn negotiate(
    transport: &mut dyn Transport,
    retry: &RetryPolicy,
    model_override: Option<&str>,
) -> Result<DeviceCapabilities> {
    transport.send(&Command::Identity.encode())?;
    let (_, payload) = read_response(transport, HeaderKind::Basic)?;
    let identity = parse_identity(&payload)?;
    let level = CommandLevel::parse(identity.level_bytes)?;

    let status = wait_until_ready(transport, retry)?;
    status.check_faults()?;

    let mut resolutions = identity.resolutions;
    resolutions.sort_unstable();
    resolutions.dedup();
    if resolutions.is_empty() {
        return Err(Error::NotSupported(
            "identity reported no resolutions".to_string(),
        ));
    }
    let min_resolution = resolutions[0];
    let max_resolution = *resolutions.last().unwrap_or(&min_resolution);
    let optical_resolution = identity.optical.unwrap_or(max_resolution);

    let mut flatbed = identity.area.ok_or_else(|| {
        Error::NotSupported("identity reported no scan area".to_string())
    })?;

    // Firmware on this device class undercounts vertical lines by half; the
    // only observable symptom is a scan area reported wider than tall.
    // Known approximation: a genuinely landscape flatbed would trip this too.
    let mut double_vertical = false;
    let mut needs_color_reorder = identity.line_distance > 0;
    if flatbed.height < flatbed.width {
        log::warn!(
            "Reported extent {}x{} is wider than tall; assuming halved vertical count",
            flatbed.width,
            flatbed.height
        );
        flatbed.height *= 2;
        double_vertical = true;
        needs_color_reorder = true;
    }

    let mut depths = identity.depths;
    if depths.is_empty() {
        depths.push(8);
    }
    depths.sort_unstable();
    depths.dedup();
    let max_depth = *depths.last().unwrap_or(&8);

    let model = match model_override {
        Some(name) => name.to_string(),
        None => status.model.clone(),
    };

    let mut caps = DeviceCapabilities {
        model,
        level,
        resolutions,
        min_resolution,
        max_resolution,
        optical_resolution,
        depths,
        max_depth,
        flatbed,
        adf: status.adf_installed().then_some(AdfCapabilities {
            extent: status.adf_extent,
            duplex: status.adf_duplex(),
        }),
        tpu: status.tpu_installed().then_some(TpuCapabilities {
            extent: status.tpu_extent,
        }),
        focus: identity.focus,
        max_line_distance: identity.line_distance,
        needs_color_reorder,
        double_vertical,
        swap_channels: false,
        color_profile: ColorProfile::default(),
    };

    quirks::apply(&mut caps);

    log::info!(
        "Negotiated {}: level {}, {}-{} dpi, max depth {}, line distance {}{}",
        caps.model,
        caps.level,
        caps.min_resolution,
        caps.max_resolution,
        caps.max_depth,
        caps.max_line_distance,
        if caps.adf.is_some() { ", ADF" } else { "" }
    );

    Ok(caps)
}

/// Poll extended status until the device stops reporting warm-up, within
/// the retry bounds
fn wait_until_ready(transport: &mut dyn Transport, retry: &RetryPolicy) -> Result<ExtendedStatus> {
    let mut attempts = 0;
    loop {
        let status = query_extended_status(transport)?;
        if !status.warming_up() {
            return Ok(status);
        }
        attempts += 1;
        if attempts > retry.max_attempts {
            return Err(Error::Busy);
        }
        log::info!(
            "Device warming up, retry {}/{}",
            attempts,
            retry.max_attempts
        );
        std::thread::sleep(retry.wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ESC, FS, STX};
    use crate::transport::MockTransport;

    fn identity_payload(level: &[u8; 2], fields: &[(u8, &[u8])]) -> Vec<u8> {
        let mut p = level.to_vec();
        for (tag, body) in fields {
            p.push(*tag);
            p.push(body.len() as u8);
            p.extend_from_slice(body);
        }
        p
    }

    fn inject_response(mock: &MockTransport, status: u8, payload: &[u8]) {
        let len = payload.len() as u16;
        mock.inject_read(&[STX, status, len as u8, (len >> 8) as u8]);
        mock.inject_read(payload);
    }

    fn ext_status_payload(device: u8, adf: u8, tpu: u8, model: &str) -> Vec<u8> {
        let mut p = vec![device, adf, tpu, 0];
        p.extend_from_slice(&2550u16.to_le_bytes());
        p.extend_from_slice(&3600u16.to_le_bytes());
        p.extend_from_slice(&1200u16.to_le_bytes());
        p.extend_from_slice(&1600u16.to_le_bytes());
        let mut name = model.as_bytes().to_vec();
        name.resize(16, b' ');
        p.extend_from_slice(&name);
        p
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            wait: Duration::from_millis(0),
        }
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(
            CommandLevel::parse([b'B', b'4']).unwrap(),
            CommandLevel::Standard(4)
        );
        assert_eq!(
            CommandLevel::parse([b'D', b'1']).unwrap(),
            CommandLevel::Extended(1)
        );
        assert!(CommandLevel::parse([b'Z', b'9']).is_err());
    }

    #[test]
    fn test_parse_identity_tagged_fields() {
        let payload = identity_payload(
            b"B4",
            &[
                (TAG_RESOLUTION, &300u16.to_le_bytes()),
                (TAG_RESOLUTION, &600u16.to_le_bytes()),
                (TAG_AREA, &[0xF6, 0x09, 0x10, 0x0E]), // 2550 x 3600
                (TAG_DEPTHS, &[1, 8]),
                (TAG_LINE_DISTANCE, &[8]),
            ],
        );
        let id = parse_identity(&payload).unwrap();
        assert_eq!(id.level_bytes, *b"B4");
        assert_eq!(id.resolutions, vec![300, 600]);
        assert_eq!(
            id.area,
            Some(Extent {
                width: 2550,
                height: 3600
            })
        );
        assert_eq!(id.depths, vec![1, 8]);
        assert_eq!(id.line_distance, 8);
    }

    #[test]
    fn test_parse_identity_skips_unknown_tags() {
        let payload = identity_payload(
            b"D1",
            &[
                (b'Z', &[0xDE, 0xAD, 0xBE]),
                (TAG_RESOLUTION, &1200u16.to_le_bytes()),
            ],
        );
        let id = parse_identity(&payload).unwrap();
        assert_eq!(id.resolutions, vec![1200]);
    }

    #[test]
    fn test_parse_identity_truncated_field() {
        // Tag declares 4 bytes but only 2 remain
        let payload = vec![b'B', b'4', TAG_AREA, 4, 0x01, 0x02];
        assert!(matches!(
            parse_identity(&payload),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_extended_status_flags_and_model() {
        let payload = ext_status_payload(
            0,
            EXT_ADF_INSTALLED | EXT_ADF_ENABLED | EXT_ADF_DUPLEX,
            EXT_TPU_INSTALLED,
            "CS-8400F",
        );
        let status = parse_extended_status(&payload).unwrap();
        assert!(status.adf_installed());
        assert!(status.adf_enabled());
        assert!(status.adf_duplex());
        assert!(status.tpu_installed());
        assert!(!status.tpu_enabled());
        assert!(!status.warming_up());
        assert_eq!(status.model, "CS-8400F");
        assert_eq!(status.adf_extent.width, 2550);
        assert!(status.check_faults().is_ok());
    }

    #[test]
    fn test_color_profile_correction() {
        assert!(ColorProfile::default().is_identity());

        let profile = ColorProfile([0.5, 0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0]);
        assert!(!profile.is_identity());

        let mut line = vec![100u8, 200, 180];
        profile.correct_line(&mut line);
        // Blue doubles past the sample range and clamps
        assert_eq!(line, vec![150, 200, 255]);

        let mut untouched = vec![10u8, 20, 30];
        ColorProfile::default().correct_line(&mut untouched);
        assert_eq!(untouched, vec![10, 20, 30]);
    }

    #[test]
    fn test_fault_mapping() {
        let jam = parse_extended_status(&ext_status_payload(
            0,
            EXT_ADF_INSTALLED | EXT_ADF_PAPER_JAM,
            0,
            "X",
        ))
        .unwrap();
        assert!(matches!(
            jam.check_faults(),
            Err(Error::Fault(FaultKind::PaperJam))
        ));

        let empty = parse_extended_status(&ext_status_payload(
            0,
            EXT_ADF_INSTALLED | EXT_ADF_NO_PAPER,
            0,
            "X",
        ))
        .unwrap();
        assert!(matches!(
            empty.check_faults(),
            Err(Error::Fault(FaultKind::NoPaper))
        ));
    }

    #[test]
    fn test_negotiate_full_round() {
        let mock = MockTransport::new();
        let identity = identity_payload(
            b"B4",
            &[
                (TAG_RESOLUTION, &300u16.to_le_bytes()),
                (TAG_RESOLUTION, &600u16.to_le_bytes()),
                (TAG_AREA, &[0xF6, 0x09, 0x10, 0x0E]),
                (TAG_LINE_DISTANCE, &[8]),
                (TAG_OPTICAL, &600u16.to_le_bytes()),
            ],
        );
        inject_response(&mock, 0, &identity);
        inject_response(&mock, 0, &ext_status_payload(0, 0, 0, "CS-3000"));

        let mut t = mock.clone();
        let caps = negotiate(&mut t, &fast_retry(), None).unwrap();
        assert_eq!(caps.level, CommandLevel::Standard(4));
        assert_eq!(caps.model, "CS-3000");
        assert_eq!(caps.max_resolution, 600);
        assert_eq!(caps.optical_resolution, 600);
        assert!(caps.needs_color_reorder);
        assert!(!caps.double_vertical);
        assert_eq!(caps.flatbed.height, 3600);

        // Both queries went out: ESC I then FS F
        let written = mock.written();
        assert_eq!(&written[0..2], &[ESC, b'I']);
        assert_eq!(&written[2..4], &[FS, b'F']);
    }

    #[test]
    fn test_vertical_extent_heuristic() {
        let mock = MockTransport::new();
        // 3600 wide, 1275 tall: firmware bug signature
        let identity = identity_payload(
            b"B4",
            &[
                (TAG_RESOLUTION, &300u16.to_le_bytes()),
                (TAG_AREA, &[0x10, 0x0E, 0xFB, 0x04]),
            ],
        );
        inject_response(&mock, 0, &identity);
        inject_response(&mock, 0, &ext_status_payload(0, 0, 0, "CS-3000"));

        let mut t = mock.clone();
        let caps = negotiate(&mut t, &fast_retry(), None).unwrap();
        assert!(caps.double_vertical);
        assert!(caps.needs_color_reorder);
        assert_eq!(caps.flatbed.height, 2550);
    }

    #[test]
    fn test_negotiate_warmup_retry_then_busy() {
        let mock = MockTransport::new();
        let identity = identity_payload(
            b"B4",
            &[
                (TAG_RESOLUTION, &300u16.to_le_bytes()),
                (TAG_AREA, &[0xF6, 0x09, 0x10, 0x0E]),
            ],
        );
        inject_response(&mock, 0, &identity);
        // Warming up on every poll: initial + 3 retries
        for _ in 0..4 {
            inject_response(
                &mock,
                0,
                &ext_status_payload(EXT_DEVICE_WARMING_UP, 0, 0, "CS-3000"),
            );
        }

        let mut t = mock.clone();
        assert!(matches!(
            negotiate(&mut t, &fast_retry(), None),
            Err(Error::Busy)
        ));
    }

    #[test]
    fn test_negotiate_aborts_on_nak() {
        let mock = MockTransport::new();
        mock.inject_read(&[crate::protocol::NAK, 0, 0, 0]);
        let mut t = mock.clone();
        assert!(matches!(
            negotiate(&mut t, &fast_retry(), None),
            Err(Error::CommandRejected)
        ));
    }
}
