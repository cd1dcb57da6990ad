//! Key state: bitsets and the pressed/active latch.
//!
//! A driver keeps two snapshots of the keys currently down. `pressed` is
//! live; `active` latches `pressed` on every transition that *adds* a key,
//! and clears when everything is released. Commands are only ever derived
//! from `active`, which is what makes a chord's meaning depend on the
//! largest key set seen during the press→release cycle and not on the
//! order the packets happened to arrive in.

/// Upper bound on cells, and therefore routing keys, across supported
/// devices.
pub const MAX_CELLS: usize = 85;

/// Non-routing keys as a fixed-width bitset plus one routing bit per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Keys {
    pub keys: u32,
    /// Routing keys, bit N = cell N. 128 bits covers every device.
    pub routing: u128,
}

impl Keys {
    pub const EMPTY: Keys = Keys { keys: 0, routing: 0 };

    pub fn is_empty(&self) -> bool {
        self.keys == 0 && self.routing == 0
    }

    pub fn clear(&mut self) {
        *self = Keys::EMPTY;
    }

    pub fn set_routing(&mut self, index: usize, down: bool) {
        let bit = 1u128 << index;
        if down {
            self.routing |= bit;
        } else {
            self.routing &= !bit;
        }
    }

    pub fn routing_down(&self, index: usize) -> bool {
        self.routing & (1u128 << index) != 0
    }

    pub fn routing_count(&self) -> usize {
        self.routing.count_ones() as usize
    }

    /// Indices of pressed routing keys, ascending.
    pub fn routing_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CELLS).filter(|&i| self.routing_down(i))
    }
}

/// The two-snapshot latch.
#[derive(Debug, Clone, Default)]
pub struct KeyLatch {
    pub pressed: Keys,
    pub active: Keys,
}

impl KeyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live non-routing key set. Returns whether any key was
    /// newly pressed (which re-latches `active`).
    pub fn update_keys(&mut self, keys: u32) -> bool {
        let newly = keys & !self.pressed.keys != 0;
        self.pressed.keys = keys;
        if newly {
            self.active = self.pressed;
        }
        newly
    }

    /// Replace the live routing bitmap. Returns whether any routing key
    /// was newly pressed.
    pub fn update_routing(&mut self, routing: u128) -> bool {
        let newly = routing & !self.pressed.routing != 0;
        self.pressed.routing = routing;
        if newly {
            self.active = self.pressed;
        }
        newly
    }

    /// Called after a command was derived for a poll that pressed
    /// nothing new; clears the latch once everything is up.
    pub fn settle(&mut self) {
        if self.pressed.is_empty() {
            self.active.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chord_meaning_uses_maximum_set() {
        let mut latch = KeyLatch::new();

        // Keys arrive one at a time; the latch tracks the growing chord.
        assert!(latch.update_keys(0b001));
        assert_eq!(latch.active.keys, 0b001);
        assert!(latch.update_keys(0b011));
        assert_eq!(latch.active.keys, 0b011);

        // Partial release does not relatch.
        assert!(!latch.update_keys(0b010));
        assert_eq!(latch.active.keys, 0b011);

        // Full release keeps the latch until settle().
        assert!(!latch.update_keys(0));
        assert_eq!(latch.active.keys, 0b011);
        latch.settle();
        assert!(latch.active.is_empty());
    }

    #[test]
    fn routing_latches_with_keys() {
        let mut latch = KeyLatch::new();
        assert!(latch.update_keys(0b100));
        let mut routing = 0u128;
        routing |= 1 << 17;
        assert!(latch.update_routing(routing));
        assert_eq!(latch.active.keys, 0b100);
        assert!(latch.active.routing_down(17));
        assert_eq!(latch.active.routing_count(), 1);

        // Release order is irrelevant to what was latched.
        assert!(!latch.update_routing(0));
        assert!(!latch.update_keys(0));
        assert!(latch.active.routing_down(17));
        latch.settle();
        assert!(latch.active.is_empty());
    }

    #[test]
    fn routing_indices_are_sorted() {
        let mut keys = Keys::EMPTY;
        keys.set_routing(40, true);
        keys.set_routing(3, true);
        keys.set_routing(84, true);
        let indices: Vec<_> = keys.routing_indices().collect();
        assert_eq!(indices, vec![3, 40, 84]);
        keys.set_routing(40, false);
        assert_eq!(keys.routing_count(), 2);
    }
}
