//! Battery monitor and charge sampler
//!
//! Both run as async loops on the shared manager. Firmware spawns each one
//! from an `#[embassy_executor::task]`, for example:
//!
//! ```ignore
//! #[embassy_executor::task]
//! async fn battery_monitor(bms: &'static Manager) {
//!     bms.run_monitor().await
//! }
//! ```

use core::sync::atomic::Ordering;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant, Timer, TICK_HZ};
use embedded_hal_async::delay::DelayNs;

use crate::battery;
use crate::charger::{set_charge_control, ChargeProfile, ChargeProgress, Snapshot};
use crate::driver::BatteryManager;
use crate::peripherals::{
    emergency,
    regs::{
        charge::ChargeControl,
        sense::{self, Status},
    },
    Board, ChipRegisters, Irq, IrqControl,
};
use crate::system::{
    config::{MIN_VOLTAGE_MV, SETTLE_TIME_MS},
    notify::Notifications,
};

/// Next check time, `interval` from `now` rounded up to a whole second.
pub fn next_check_deadline(now: Instant, interval: Duration) -> Instant {
    let target = (now + interval).as_ticks();
    Instant::from_ticks(target.div_ceil(TICK_HZ) * TICK_HZ)
}

impl<M: RawMutex, B: Board, P: ChargeProfile> BatteryManager<M, B, P> {
    /// One pass of the battery and charger monitor.
    pub async fn periodic_check(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if !inner.initialized {
            self.release(guard);
            return;
        }

        let status = Status::from_bits_truncate(inner.hw.sense.read_reg(sense::STATUS));
        let battery_was_present = inner.battery.present;
        let charger_was_present = inner.charger.present;
        inner.battery.present = status.contains(Status::BATAVAIL);
        inner.charger.present = status.contains(Status::CHGPLUG);

        if inner.battery.present != battery_was_present {
            if inner.battery.present {
                let capacity = battery::detect_capacity(&mut inner.hw.sense);
                match capacity.mah() {
                    Some(mah) => info!("Detected {} mAh battery", mah),
                    None => error!("Unknown battery detected"),
                }
                inner.battery.capacity = capacity;
            } else {
                inner.battery.capacity = battery::Capacity::None;
                info!("The main battery was removed");
            }
        }

        if inner.charger.present != charger_was_present {
            info!(
                "The charger was {}",
                if inner.charger.present { "plugged in" } else { "removed" }
            );
            inner.pending.insert(Notifications::CHARGER_PRESENT);
        }

        // Running from the battery, or from an unknown one
        if (inner.battery.present && !inner.charger.present) || !inner.battery.known_present() {
            match battery::measure_voltage(&mut inner.hw.sense) {
                Err(_) => emergency(&mut inner.hw.halt, "check: Failed to measure voltage"),
                Ok(mv) if mv < MIN_VOLTAGE_MV => {
                    emergency(&mut inner.hw.halt, "check: Minimum voltage threshold reached")
                }
                Ok(_) => {}
            }
        }

        if inner.charger.charging {
            if !inner.charger.present || !inner.battery.present || !inner.charger.enabled {
                inner.stop_charge();
            }
        } else if inner.charger.present && inner.charger.enabled {
            if let Some(mah) = inner.battery.capacity.mah().filter(|_| inner.battery.present) {
                if inner.start_charge(mah).is_err() {
                    inner.stop_charge();
                }
            }
        }

        self.release(guard);
    }

    /// Run [`periodic_check`](Self::periodic_check) until detached.
    pub async fn run_monitor(&self) {
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                break;
            }
            self.periodic_check().await;

            let deadline = next_check_deadline(Instant::now(), self.config.check_interval);
            if let Either::Second(()) = select(Timer::at(deadline), self.stop_monitor.wait()).await {
                break;
            }
        }
        debug!("Battery monitor stopped");
    }

    /// Take one charge sample and feed it to the profile.
    ///
    /// Current is read with the PWM forced on, voltage with the PWM forced
    /// off after a settle time. Does nothing while not charging.
    pub async fn sample_charge_state(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        // The line is released on detach
        if !inner.initialized {
            self.release(guard);
            return;
        }
        inner.hw.irq.ack_irq(Irq::CurrentTimer);
        if !inner.charger.charging {
            self.release(guard);
            return;
        }

        set_charge_control(&mut inner.hw.charge, ChargeControl::OVERRIDE, ChargeControl::PWMOVR);
        let ma = battery::measure_current(&mut inner.hw.charge, &inner.current_sense);

        set_charge_control(&mut inner.hw.charge, ChargeControl::OVERRIDE, ChargeControl::OVERRIDE);
        inner.hw.delay.delay_ms(SETTLE_TIME_MS).await;
        let mv = battery::measure_voltage(&mut inner.hw.sense);

        set_charge_control(&mut inner.hw.charge, ChargeControl::OVERRIDE, ChargeControl::empty());
        let temp_k = battery::measure_temperature(&mut inner.hw.sense);

        let (mv, temp_k) = match (mv, temp_k) {
            (Ok(mv), Ok(temp_k)) => (mv, temp_k),
            (mv, temp_k) => {
                error!("Dropping charge sample, voltage {:?} temperature {:?}", mv, temp_k);
                self.release(guard);
                return;
            }
        };

        if inner.verbose {
            info!(
                "Battery charge state: {} mV, {} mA ({})",
                mv,
                ma,
                if ma <= 0 { "discharging" } else { "charging" }
            );
        }

        match inner.update_profile(Snapshot { mv, ma, temp_k }) {
            Ok(ChargeProgress::Charging) if inner.profile.is_charging() => {}
            Ok(ChargeProgress::Charging) => {
                warn!("Charge profile stopped on its own");
                inner.stop_charge();
            }
            Ok(ChargeProgress::Done) => {
                info!("Battery fully charged");
                inner.stop_charge();
            }
            Err(_) => {
                error!("Charge profile fault");
                inner.stop_charge();
            }
        }
        self.release(guard);
    }

    /// Sample on every current timer event until detached.
    pub async fn run_current_sampler(&self) {
        loop {
            match select(self.current_timer.wait(), self.stop_sampler.wait()).await {
                Either::First(()) => self.sample_charge_state().await,
                Either::Second(()) => break,
            }
        }
        debug!("Charge sampler stopped");
    }
}
