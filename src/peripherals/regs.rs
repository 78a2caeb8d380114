//! Register map of the two power chips.
//!
//! Only the registers and bits the battery manager touches are listed.

/// Sense chip: ADC, presence status.
pub mod sense {
    use bitflags::bitflags;

    /// ADC sample control
    pub const ADCSCR: u8 = 0x09;
    /// Combined presence/status register
    pub const STATUS: u8 = 0x16;

    bitflags! {
        /// Contents of the [`STATUS`] register
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct Status: u16 {
            /// A main battery is inserted
            const BATAVAIL = 0x0100;
            /// A charger is plugged in
            const CHGPLUG = 0x1000;
        }
    }

    /// ADC multiplexer inputs.
    pub mod adc {
        /// Battery size indicator (BSI resistor)
        pub const BSI: u8 = 0x01;
        /// Battery temperature
        pub const BATTEMP: u8 = 0x02;
        /// Charger voltage
        pub const CHGVOLT: u8 = 0x03;
        /// Main battery voltage
        pub const BATTVOLT: u8 = 0x08;
        /// Ground reference, 0 V
        pub const GND2: u8 = 0x09;
        /// Backup battery voltage
        pub const BKUPVOLT: u8 = 0x0C;
    }
}

/// Charge chip: PWM charger, current measurement.
pub mod charge {
    use bitflags::bitflags;

    /// Charge current PWM duty cycle (8 bit)
    pub const CHGCURR: u8 = 0x04;
    /// Charge control
    pub const CHGCTL: u8 = 0x08;
    /// Battery current, signed 16 bit
    pub const BATCURR: u8 = 0x0D;

    bitflags! {
        /// Contents of the [`CHGCTL`] register
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct ChargeControl: u16 {
            /// Global charge enable
            const EN = 0x0001;
            /// PWM override
            const PWMOVR = 0x0004;
            /// PWM override forces zero duty instead of full duty
            const PWMOVRZERO = 0x0008;
            /// Current measurement circuitry enable
            const CURMEAS = 0x0040;

            /// Every bit touched by the charge enable / PWM override sequences
            const PWM = Self::EN.bits() | Self::PWMOVR.bits() | Self::PWMOVRZERO.bits();
            /// Both override bits
            const OVERRIDE = Self::PWMOVR.bits() | Self::PWMOVRZERO.bits();
        }
    }
}
