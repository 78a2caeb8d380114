//! Charger control
//!
//! The charge algorithm itself is a [`ChargeProfile`] supplied by the
//! application. This module owns the hardware side of it: global charge
//! enable, the PWM duty cycle, the current measurement timer and the
//! Idle/Charging transitions.

use crate::battery::{self, BatteryState};
use crate::driver::Inner;
use crate::peripherals::{
    emergency,
    regs::charge::{self, ChargeControl},
    Board, ChipRegisters, EmergencyHalt, Irq, IrqControl,
};
use crate::system::{
    config::{ChargeParams, CURRENT_SAMPLE_PERIOD_MS},
    notify::Notifications,
};

/// Highest duty cycle the PWM register accepts
pub const DUTY_CYCLE_MAX: u16 = 0xFF;

/// Charge profile failure. Always ends the charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fault;

/// Rejected duty cycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DutyCycleError {
    /// Above [`DUTY_CYCLE_MAX`]
    OutOfRange(u16),
    /// Charging is disabled by policy
    PolicyDisabled,
    /// Battery or charger not inserted
    NotPresent,
    /// No charge in progress
    NotCharging,
}

/// Outcome of one profile update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeProgress {
    Charging,
    /// Battery is full
    Done,
}

/// One charge sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Snapshot {
    /// Battery voltage in mV, measured with the PWM forced off
    pub mv: u32,
    /// Battery current, positive while charging
    pub ma: i32,
    /// Battery temperature
    pub temp_k: u32,
}

/// Hardware sink the profile drives during an update.
pub trait ChargeOutput {
    /// Request a new PWM duty cycle.
    fn set_duty_cycle(&mut self, duty_cycle: u16) -> Result<(), DutyCycleError>;
    /// Unrecoverable charger fault.
    fn emergency(&mut self) -> !;
}

/// Charge algorithm, for example a Li-Ion CC/CV profile.
pub trait ChargeProfile {
    /// Set the charge parameters. Called once at attach.
    fn configure(&mut self, params: &ChargeParams);
    /// Begin a charge of a battery with the given capacity.
    fn start(&mut self, capacity_mah: u16) -> Result<(), Fault>;
    fn stop(&mut self);
    fn is_charging(&self) -> bool;
    /// Feed one sample and let the profile adjust the output.
    fn update_state<O: ChargeOutput>(&mut self, snapshot: Snapshot, output: &mut O) -> Result<ChargeProgress, Fault>;
}

/// Externally visible charge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeStatus {
    Idle = 0,
    Charging = 1,
}

/// Charger as last seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargerState {
    pub present: bool,
    /// Charging allowed by policy
    pub enabled: bool,
    /// A charge is in progress
    pub charging: bool,
    /// Active PWM duty cycle, 0 while idle
    pub duty_cycle: u16,
}

/// Replace the `mask` bits of the charge control register.
pub(crate) fn set_charge_control<C: ChipRegisters>(chip: &mut C, mask: ChargeControl, value: ChargeControl) {
    chip.mask_set(charge::CHGCTL, mask.bits(), value.bits());
}

/// Validate and apply a duty cycle.
fn write_duty_cycle<C: ChipRegisters>(
    chip: &mut C,
    charger: &mut ChargerState,
    battery: &BatteryState,
    pending: &mut Notifications,
    duty_cycle: u16,
) -> Result<(), DutyCycleError> {
    if duty_cycle > DUTY_CYCLE_MAX {
        error!("Duty cycle {} out of range", duty_cycle);
        return Err(DutyCycleError::OutOfRange(duty_cycle));
    }
    if !charger.enabled {
        error!("Duty cycle change while charging is disabled");
        return Err(DutyCycleError::PolicyDisabled);
    }
    if !battery.present || !charger.present {
        error!("Duty cycle change without battery or charger");
        return Err(DutyCycleError::NotPresent);
    }
    if !charger.charging {
        error!("Duty cycle change while not charging");
        return Err(DutyCycleError::NotCharging);
    }

    if duty_cycle != charger.duty_cycle {
        charger.duty_cycle = duty_cycle;
        chip.write_reg(charge::CHGCURR, duty_cycle);
        pending.insert(Notifications::CHARGER_PWM);
    }
    Ok(())
}

/// [`ChargeOutput`] over the borrowed instance state.
struct DutyCycleWriter<'a, C, H> {
    chip: &'a mut C,
    halt: &'a mut H,
    charger: &'a mut ChargerState,
    battery: &'a BatteryState,
    pending: &'a mut Notifications,
}

impl<C: ChipRegisters, H: EmergencyHalt> ChargeOutput for DutyCycleWriter<'_, C, H> {
    fn set_duty_cycle(&mut self, duty_cycle: u16) -> Result<(), DutyCycleError> {
        write_duty_cycle(&mut *self.chip, &mut *self.charger, self.battery, &mut *self.pending, duty_cycle)
    }

    fn emergency(&mut self) -> ! {
        emergency(&mut *self.halt, "Battery charger fault")
    }
}

impl<B: Board, P: ChargeProfile> Inner<B, P> {
    pub(crate) fn charge_status(&self) -> ChargeStatus {
        if self.charger.charging {
            ChargeStatus::Charging
        } else {
            ChargeStatus::Idle
        }
    }

    /// Idle -> Charging. The caller checked battery, charger and policy.
    pub(crate) fn start_charge(&mut self, capacity_mah: u16) -> Result<(), Fault> {
        if !self.battery.present || !self.charger.present {
            warn!("Starting charge without battery or charger");
        }

        self.charger.duty_cycle = 0;
        self.hw.charge.write_reg(charge::CHGCURR, 0);
        set_charge_control(&mut self.hw.charge, ChargeControl::PWM, ChargeControl::EN);

        if let Err(fault) = self.profile.start(capacity_mah) {
            error!("Charge profile refused to start");
            set_charge_control(&mut self.hw.charge, ChargeControl::PWM, ChargeControl::empty());
            return Err(fault);
        }
        self.charger.charging = true;

        self.current_sense.enable(&mut self.hw.charge);
        self.hw.irq.set_current_timer(CURRENT_SAMPLE_PERIOD_MS);
        self.hw.irq.enable_irq(Irq::CurrentTimer);

        info!("Charging battery");
        self.pending
            .insert(Notifications::CHARGER_STATE | Notifications::CHARGER_PWM);
        Ok(())
    }

    /// Anything -> Idle. Safe to call while idle.
    ///
    /// The exit work follows the manager's own state, the profile may
    /// already consider itself stopped.
    pub(crate) fn stop_charge(&mut self) {
        if self.charger.charging {
            self.hw.irq.set_current_timer(0);
            self.hw.irq.disable_irq(Irq::CurrentTimer);
            // Unbalanced use is logged by the counter itself
            let _ = self.current_sense.disable(&mut self.hw.charge);
        }
        self.charger.charging = false;
        self.profile.stop();

        self.charger.duty_cycle = 0;
        self.hw.charge.write_reg(charge::CHGCURR, 0);
        set_charge_control(&mut self.hw.charge, ChargeControl::PWM, ChargeControl::empty());

        info!("Not charging battery");
        self.pending
            .insert(Notifications::CHARGER_STATE | Notifications::CHARGER_PWM);
    }

    pub(crate) fn set_duty_cycle(&mut self, duty_cycle: u16) -> Result<(), DutyCycleError> {
        write_duty_cycle(
            &mut self.hw.charge,
            &mut self.charger,
            &self.battery,
            &mut self.pending,
            duty_cycle,
        )
    }

    /// Hand a sample to the profile, with the PWM as its output.
    pub(crate) fn update_profile(&mut self, snapshot: Snapshot) -> Result<ChargeProgress, Fault> {
        let mut output = DutyCycleWriter {
            chip: &mut self.hw.charge,
            halt: &mut self.hw.halt,
            charger: &mut self.charger,
            battery: &self.battery,
            pending: &mut self.pending,
        };
        self.profile.update_state(snapshot, &mut output)
    }

    /// Measure the battery current outside of the charge sampler.
    ///
    /// The PWM is overridden to full duty while charging and to zero
    /// otherwise. The previous charge control bits are restored afterwards.
    pub(crate) fn measure_current_now(&mut self) -> i32 {
        if !self.battery.present {
            return 0;
        }
        let charging = self.charger.charging;
        if !charging && self.charger.duty_cycle != 0 {
            warn!("Duty cycle {} while not charging", self.charger.duty_cycle);
        }

        let prior = ChargeControl::from_bits_retain(self.hw.charge.read_reg(charge::CHGCTL)) & ChargeControl::PWM;
        self.current_sense.enable(&mut self.hw.charge);

        let overridden = if charging {
            ChargeControl::EN | ChargeControl::PWMOVR
        } else {
            ChargeControl::PWM
        };
        set_charge_control(&mut self.hw.charge, ChargeControl::PWM, overridden);
        let ma = battery::measure_current(&mut self.hw.charge, &self.current_sense);
        set_charge_control(&mut self.hw.charge, ChargeControl::PWM, prior);

        let _ = self.current_sense.disable(&mut self.hw.charge);
        ma
    }
}
