//! Board presets.
//!
//! Matrix sizes, expander addresses and tuning follow the boards as built:
//! a right-hand protoboard on a single expander, and the right half of the
//! full keyboard whose matrix spans two expanders with a detachable numpad
//! on a third address.

use crate::config::{ExpanderAddress, KeyboardConfig, MatrixTopology, PeripheralConfig, PinRef};

const PROTO: u8 = 0x25;

/// 4×5 protoboard, rows on B0-B3, columns on A0-A4.
pub const PROTOBOARD_RIGHT: KeyboardConfig = KeyboardConfig {
    name: "protoboard-right",
    main: MatrixTopology {
        rows: &[
            PinRef::b(PROTO, 0),
            PinRef::b(PROTO, 1),
            PinRef::b(PROTO, 2),
            PinRef::b(PROTO, 3),
        ],
        cols: &[
            PinRef::a(PROTO, 0),
            PinRef::a(PROTO, 1),
            PinRef::a(PROTO, 2),
            PinRef::a(PROTO, 3),
            PinRef::a(PROTO, 4),
        ],
        row_offset: 0,
    },
    peripherals: &[],
    debounce: 10,
    settle_us: 30,
};

const USK_0: u8 = 0x20;
const USK_1: u8 = 0x21;
const NUMPAD: u8 = 0x23;

/// 5×4 numpad, probed at boot and stacked below the right half's rows.
pub const USK_NUMPAD: PeripheralConfig = PeripheralConfig {
    name: "numpad",
    address: ExpanderAddress::new(NUMPAD),
    topology: MatrixTopology {
        rows: &[
            PinRef::b(NUMPAD, 0),
            PinRef::b(NUMPAD, 1),
            PinRef::b(NUMPAD, 2),
            PinRef::b(NUMPAD, 3),
            PinRef::b(NUMPAD, 4),
        ],
        cols: &[
            PinRef::a(NUMPAD, 0),
            PinRef::a(NUMPAD, 1),
            PinRef::a(NUMPAD, 2),
            PinRef::a(NUMPAD, 3),
        ],
        row_offset: 6,
    },
};

/// 6×9 right half. Port A of the first expander carries eight columns, so
/// the ninth lives on the second one.
pub const USK_RIGHT: KeyboardConfig = KeyboardConfig {
    name: "usk-right",
    main: MatrixTopology {
        rows: &[
            PinRef::b(USK_0, 0),
            PinRef::b(USK_0, 1),
            PinRef::b(USK_0, 2),
            PinRef::b(USK_0, 3),
            PinRef::b(USK_0, 4),
            PinRef::b(USK_0, 5),
        ],
        cols: &[
            PinRef::a(USK_0, 0),
            PinRef::a(USK_0, 1),
            PinRef::a(USK_0, 2),
            PinRef::a(USK_0, 3),
            PinRef::a(USK_0, 4),
            PinRef::a(USK_0, 5),
            PinRef::a(USK_0, 6),
            PinRef::a(USK_0, 7),
            PinRef::a(USK_1, 0),
        ],
        row_offset: 0,
    },
    peripherals: &[USK_NUMPAD],
    debounce: 10,
    settle_us: 30,
};

pub const ALL: &[&KeyboardConfig] = &[&PROTOBOARD_RIGHT, &USK_RIGHT];

/// Look a preset up by name.
pub fn find(name: &str) -> Option<&'static KeyboardConfig> {
    ALL.iter().copied().find(|config| config.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for config in ALL {
            assert_eq!(config.validate(), Ok(()), "{}", config.name);
        }
    }

    #[test]
    fn test_numpad_follows_main_rows() {
        assert_eq!(
            USK_NUMPAD.topology.row_offset as usize,
            USK_RIGHT.main.row_count()
        );
        assert_eq!(USK_RIGHT.total_rows(), 11);
    }

    #[test]
    fn test_find() {
        assert_eq!(find("usk-right").map(|c| c.name), Some("usk-right"));
        assert!(find("ergodox").is_none());
    }
}
