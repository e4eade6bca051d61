//! Command codec for the ESC/FS command language
//!
//! Pure serialization: every command is one escape byte selecting the
//! opcode namespace, one opcode byte, then raw or little-endian parameter
//! bytes. No state, no error conditions.

use super::{ESC, FS};

/// Opcode namespace selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// `ESC`-prefixed simple commands
    Simple,
    /// `FS`-prefixed extended commands (gated on command level)
    Extended,
}

/// One ESC/FS command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Identity query: command level, resolutions, max area
    Identity,
    /// Extended status query: option units, error bits, model name
    ExtendedStatus,
    /// Set X/Y resolution in DPI (2-byte fields)
    SetResolution { x: u16, y: u16 },
    /// Set X/Y resolution in DPI (4-byte fields, extended namespace)
    SetResolutionExt { x: u32, y: u32 },
    /// Set scan area in device pixels (2-byte fields)
    SetScanArea {
        left: u16,
        top: u16,
        width: u16,
        height: u16,
    },
    /// Set scan area in device pixels (4-byte fields, extended namespace)
    SetScanAreaExt {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    },
    /// Set color mode byte
    SetColorMode(u8),
    /// Set data format / bit depth byte
    SetDataFormat(u8),
    /// Select input source (flatbed / feeder / transparency unit)
    SetSource(u8),
    /// Move the focus position (glass surface or film-holder plane)
    SetFocus(u8),
    /// Start a scan, per-block handshake protocol
    StartScan,
    /// Start a scan, length-prefixed bulk protocol (extended namespace)
    StartScanExt,
}

impl Command {
    /// Namespace this command's opcode lives in
    pub fn namespace(&self) -> Namespace {
        match self {
            Command::ExtendedStatus
            | Command::SetResolutionExt { .. }
            | Command::SetScanAreaExt { .. }
            | Command::StartScanExt => Namespace::Extended,
            _ => Namespace::Simple,
        }
    }

    /// Opcode byte
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Identity => b'I',
            Command::ExtendedStatus => b'F',
            Command::SetResolution { .. } | Command::SetResolutionExt { .. } => b'R',
            Command::SetScanArea { .. } | Command::SetScanAreaExt { .. } => b'A',
            Command::SetColorMode(_) => b'C',
            Command::SetDataFormat(_) => b'D',
            Command::SetSource(_) => b'e',
            Command::SetFocus(_) => b'p',
            Command::StartScan | Command::StartScanExt => b'G',
        }
    }

    /// Serialize to a wire frame
    pub fn encode(&self) -> Vec<u8> {
        let escape = match self.namespace() {
            Namespace::Simple => ESC,
            Namespace::Extended => FS,
        };
        let mut frame = vec![escape, self.opcode()];
        match self {
            Command::Identity | Command::ExtendedStatus | Command::StartScan | Command::StartScanExt => {}
            Command::SetResolution { x, y } => {
                push_u16le(&mut frame, *x);
                push_u16le(&mut frame, *y);
            }
            Command::SetResolutionExt { x, y } => {
                push_u32le(&mut frame, *x);
                push_u32le(&mut frame, *y);
            }
            Command::SetScanArea {
                left,
                top,
                width,
                height,
            } => {
                push_u16le(&mut frame, *left);
                push_u16le(&mut frame, *top);
                push_u16le(&mut frame, *width);
                push_u16le(&mut frame, *height);
            }
            Command::SetScanAreaExt {
                left,
                top,
                width,
                height,
            } => {
                push_u32le(&mut frame, *left);
                push_u32le(&mut frame, *top);
                push_u32le(&mut frame, *width);
                push_u32le(&mut frame, *height);
            }
            Command::SetColorMode(v)
            | Command::SetDataFormat(v)
            | Command::SetSource(v)
            | Command::SetFocus(v) => frame.push(*v),
        }
        frame
    }
}

fn push_u16le(frame: &mut Vec<u8>, value: u16) {
    frame.extend_from_slice(&value.to_le_bytes());
}

fn push_u32le(frame: &mut Vec<u8>, value: u32) {
    frame.extend_from_slice(&value.to_le_bytes());
}
