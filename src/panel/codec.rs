//! Bit-level transforms for the front panel shift registers
//!
//! The switch register delivers a 3-byte frame: the command switches in the
//! top byte and the 16 address switches below it. The address switches are
//! wired to the register in a scrambled order (every nibble bit-reversed,
//! nibble pairs crossed over) and are active-low, so the raw value has to be
//! unscrambled and complemented before it means anything.
//!
//! The LED register takes a plain 32-bit word. No scrambling is applied on
//! that path; the LED board is wired straight.
//!
//! Everything in here is pure so it can be checked without hardware.

/// Number of bytes in a switch frame
pub const SWITCH_FRAME_LEN: usize = 3;

/// Number of bytes in a status LED word
pub const STATUS_WORD_LEN: usize = 4;

/// Maps every 4-bit value to its bit-reversed form
const REVERSE_NIBBLE: [u8; 16] = [
    0x0, 0x8, 0x4, 0xc, 0x2, 0xa, 0x6, 0xe, 0x1, 0x9, 0x5, 0xd, 0x3, 0xb, 0x7, 0xf,
];

#[inline]
fn reverse_nibble(value: u16) -> u16 {
    REVERSE_NIBBLE[(value & 0xf) as usize] as u16
}

/// Raw capture from the switch shift register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchFrame {
    pub cmd: u8,
    pub raw_address: u16,
}

impl SwitchFrame {
    /// Assembles a frame from exactly [`SWITCH_FRAME_LEN`] bytes.
    ///
    /// Returns `None` for any other length; a partial frame is never decoded.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SWITCH_FRAME_LEN {
            return None;
        }

        // 24-bit little-endian word
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);

        Some(Self {
            cmd: ((word >> 16) & 0xff) as u8,
            raw_address: (word & 0xffff) as u16,
        })
    }

    /// Address as set on the panel (up = 0 before inversion)
    pub fn address(&self) -> u16 {
        decode_address(self.raw_address)
    }
}

/// Undoes the switch wiring: reverses each nibble, crosses the nibble pairs
/// and complements the result.
///
/// ```text
/// raw bits 12-15 -> out bits  8-11
/// raw bits  8-11 -> out bits 12-15
/// raw bits  4-7  -> out bits  0-3
/// raw bits  0-3  -> out bits  4-7
/// ```
pub fn decode_address(raw: u16) -> u16 {
    !unscramble(raw)
}

/// Applies the switch wiring to a panel address, producing what the shift
/// register would report for it.
///
/// The wiring is a bit permutation that is its own inverse, so this is the
/// same operation as [`decode_address`]; it exists to make call sites read
/// in the right direction.
pub fn encode_address(address: u16) -> u16 {
    !unscramble(address)
}

fn unscramble(raw: u16) -> u16 {
    (reverse_nibble(raw >> 12) << 8)
        | (reverse_nibble(raw >> 8) << 12)
        | reverse_nibble(raw >> 4)
        | (reverse_nibble(raw) << 4)
}

/// Status lights shown on the panel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelStatus {
    pub status: u8,
    pub data: u8,
    pub bus: u16,
}

impl PanelStatus {
    pub fn new(status: u8, data: u8, bus: u16) -> Self {
        Self { status, data, bus }
    }

    /// `status << 24 | data << 16 | bus`
    pub fn word(&self) -> u32 {
        ((self.status as u32) << 24) | ((self.data as u32) << 16) | self.bus as u32
    }

    /// Word as it goes over the wire, least significant byte first
    pub fn to_bytes(&self) -> [u8; STATUS_WORD_LEN] {
        self.word().to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_switches_up_decodes_to_ffff() {
        let frame = SwitchFrame::from_bytes(&[0x00, 0x00, 0x00]).unwrap();
        assert_eq!(frame.cmd, 0);
        assert_eq!(frame.address(), 0xFFFF);
    }

    #[test]
    fn single_low_nibble_lands_in_bits_4_to_7() {
        // 0xA reversed is 0x5, moved from bits 0-3 to bits 4-7
        assert_eq!(unscramble(0x000A), 0x0050);
        assert_eq!(decode_address(0x000A), 0xFFAF);
    }

    #[test]
    fn nibble_positions_cross_over() {
        assert_eq!(unscramble(0x1000), 0x0800);
        assert_eq!(unscramble(0x0100), 0x8000);
        assert_eq!(unscramble(0x0010), 0x0008);
        assert_eq!(unscramble(0x0001), 0x0080);
    }

    #[test]
    fn transform_is_an_involution() {
        for v in 0..=u16::MAX {
            assert_eq!(encode_address(decode_address(v)), v, "value {:#06x}", v);
        }
    }

    #[test]
    fn frame_is_little_endian_with_cmd_on_top() {
        let frame = SwitchFrame::from_bytes(&[0x34, 0x12, 0x7f]).unwrap();
        assert_eq!(frame.cmd, 0x7f);
        assert_eq!(frame.raw_address, 0x1234);
    }

    #[test]
    fn partial_frames_are_rejected() {
        assert!(SwitchFrame::from_bytes(&[]).is_none());
        assert!(SwitchFrame::from_bytes(&[0x00, 0x00]).is_none());
        assert!(SwitchFrame::from_bytes(&[0x00, 0x00, 0x00, 0x00]).is_none());
    }

    #[test]
    fn status_word_is_packed_without_scrambling() {
        let status = PanelStatus::new(0x12, 0x34, 0x5678);
        assert_eq!(status.word(), 0x1234_5678);
        assert_eq!(status.to_bytes(), [0x78, 0x56, 0x34, 0x12]);
    }
}
