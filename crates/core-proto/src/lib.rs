//! core-proto: framed packet codecs for the supported device families.
//!
//! Two framings are implemented:
//! * [`vario`] — byte-stuffed frames (`ESC type payload…`, payload `ESC`
//!   doubled), lengths keyed off the type byte;
//! * [`terminal`] — length-prefixed frames (`STX … ETX`), in two protocol
//!   revisions (binary and nibble-encoded).
//!
//! Codecs are state machines over single bytes pulled from a
//! [`core_transport::Transport`]; they never allocate per byte and keep a
//! fixed packet buffer. A frame interrupted by line idle is dropped (and
//! logged) rather than resumed on the next call — the inter-byte timeout
//! of the transport makes genuine intra-frame gaps pathological, and
//! restarting cleanly is what keeps resynchronisation simple.

pub mod terminal;
pub mod vario;

/// Control bytes shared by the framings.
pub mod ascii {
    pub const STX: u8 = 0x02;
    pub const ETX: u8 = 0x03;
    pub const ESC: u8 = 0x1B;
}
