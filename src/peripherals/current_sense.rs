//! Current measurement circuitry
//!
//! The circuitry on the charge chip is shared between the periodic charge
//! sampler and on-demand reads, so it is reference counted. Only the
//! transitions 0 -> 1 and 1 -> 0 touch the hardware.

use super::{
    regs::charge::{self, ChargeControl},
    ChipRegisters,
};

/// Reference count of current measurement users.
#[derive(Debug, Default)]
pub struct CurrentSense {
    users: u32,
}

/// `disable` without a matching `enable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Unbalanced;

impl CurrentSense {
    pub const fn new() -> Self {
        Self { users: 0 }
    }

    /// Number of active users.
    pub fn users(&self) -> u32 {
        self.users
    }

    pub fn is_enabled(&self) -> bool {
        self.users > 0
    }

    pub fn enable<C: ChipRegisters>(&mut self, chip: &mut C) {
        if self.users == 0 {
            let curmeas = ChargeControl::CURMEAS.bits();
            chip.set_clear_bits(charge::CHGCTL, curmeas, curmeas);
            debug!("Current measurement circuitry enabled");
        }
        self.users += 1;
    }

    pub fn disable<C: ChipRegisters>(&mut self, chip: &mut C) -> Result<(), Unbalanced> {
        if self.users == 0 {
            error!("Current measurement disabled more often than enabled");
            return Err(Unbalanced);
        }
        self.users -= 1;
        if self.users == 0 {
            chip.set_clear_bits(charge::CHGCTL, 0, ChargeControl::CURMEAS.bits());
            debug!("Current measurement circuitry disabled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct Chgctl {
        value: u16,
        writes: Vec<u16>,
    }

    impl ChipRegisters for Chgctl {
        fn read_reg(&mut self, _addr: u8) -> u16 {
            self.value
        }
        fn write_reg(&mut self, _addr: u8, value: u16) {
            self.value = value;
            self.writes.push(value);
        }
        fn set_clear_bits(&mut self, _addr: u8, set_mask: u16, clear_mask: u16) {
            self.value = (self.value & !clear_mask) | set_mask;
            self.writes.push(self.value);
        }
    }

    #[test]
    fn balanced_pairs_restore_circuitry() {
        let mut chip = Chgctl {
            value: ChargeControl::EN.bits(),
            ..Default::default()
        };
        let mut sense = CurrentSense::new();

        for _ in 0..4 {
            sense.enable(&mut chip);
            assert!(ChargeControl::from_bits_retain(chip.value).contains(ChargeControl::CURMEAS));
        }
        assert_eq!(sense.users(), 4);
        for _ in 0..4 {
            sense.disable(&mut chip).unwrap();
        }

        assert_eq!(sense.users(), 0);
        assert_eq!(chip.value, ChargeControl::EN.bits());
        // Only the outermost enable/disable reach the hardware.
        assert_eq!(chip.writes.len(), 2);
    }

    #[test]
    fn disable_without_enable_is_rejected() {
        let mut chip = Chgctl::default();
        let mut sense = CurrentSense::new();

        assert_eq!(sense.disable(&mut chip), Err(Unbalanced));
        assert_eq!(sense.users(), 0);
        assert!(chip.writes.is_empty());
    }
}
