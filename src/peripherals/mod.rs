//! Hardware capabilities consumed by the battery manager.
//!
//! The register primitives of both chips, the IRQ controller, the settle
//! delay and the emergency halt live on the board side. The manager only
//! sees them through the traits below, bundled by a [`Board`].

pub mod current_sense;
pub mod regs;

use embedded_hal_async::delay::DelayNs;

/// Hardware read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IoError;

/// The IRQ line could not be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqError;

/// Firmware request outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FirmwareError {
    NotFound,
}

/// IRQ lines used by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Irq {
    /// Current measurement timer elapsed (charge chip line 7)
    CurrentTimer = 7,
}

/// 16 bit register access of one chip.
pub trait ChipRegisters {
    fn read_reg(&mut self, addr: u8) -> u16;
    fn write_reg(&mut self, addr: u8, value: u16);
    /// Clear `clear_mask`, then set `set_mask`.
    fn set_clear_bits(&mut self, addr: u8, set_mask: u16, clear_mask: u16);

    /// Replace the bits selected by `mask` with those of `value`.
    fn mask_set(&mut self, addr: u8, mask: u16, value: u16) {
        self.set_clear_bits(addr, value & mask, mask);
    }
}

/// Chip carrying the ADC and the presence status register.
pub trait SenseChip: ChipRegisters {
    /// Single conversion on one multiplexer input.
    fn read_adc(&mut self, channel: u8) -> Result<i32, IoError>;
}

/// Interrupt lines and the hardware current measurement timer.
pub trait IrqControl {
    fn request_irq(&mut self, irq: Irq) -> Result<(), IrqError>;
    fn free_irq(&mut self, irq: Irq);
    fn enable_irq(&mut self, irq: Irq);
    fn disable_irq(&mut self, irq: Irq);
    fn ack_irq(&mut self, irq: Irq);
    /// Program the periodic current timer. Zero stops it.
    fn set_current_timer(&mut self, interval_ms: u16);
}

/// Unrecoverable power-domain shutdown.
pub trait EmergencyHalt {
    fn halt(&mut self, message: &str) -> !;
}

/// Source of the calibration firmware image.
#[allow(async_fn_in_trait)]
pub trait FirmwareLoader {
    async fn request(&mut self, name: &str) -> Result<&[u8], FirmwareError>;
}

/// Concrete hardware of one device pairing.
pub trait Board {
    type Sense: SenseChip;
    type Charge: ChipRegisters;
    type Irq: IrqControl;
    type Delay: DelayNs;
    type Halt: EmergencyHalt;
}

/// API for accessing peripherals
pub struct Peripherals<B: Board> {
    /// ADC and status chip
    pub sense: B::Sense,
    /// Charger PWM and current measurement chip
    pub charge: B::Charge,
    /// Interrupt controller
    pub irq: B::Irq,
    /// PWM settle delay provider
    pub delay: B::Delay,
    /// Emergency shutdown primitive
    pub halt: B::Halt,
}

impl<B: Board> Peripherals<B> {
    pub fn new(
        sense: B::Sense,
        charge: B::Charge,
        irq: B::Irq,
        delay: B::Delay,
        halt: B::Halt,
    ) -> Self {
        Self {
            sense,
            charge,
            irq,
            delay,
            halt,
        }
    }
}

/// Log the fatal fault and hand over to the halt primitive.
pub(crate) fn emergency<H: EmergencyHalt>(halt: &mut H, message: &str) -> ! {
    error!("battery management fatal fault: {}", message);
    halt.halt(message)
}
