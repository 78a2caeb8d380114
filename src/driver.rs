//! Battery manager instance
//!
//! All mutable state lives in [`Inner`] behind one async mutex. The monitor,
//! the charge sampler, attribute access and the policy setters all take it.
//! Change notifications collected while the lock is held are published after
//! it is released.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    mutex::{Mutex, MutexGuard},
    signal::Signal,
};

use crate::battery::{self, BatteryState};
use crate::calibration::{self, CalibError, CalibrationStore};
use crate::charger::{ChargeProfile, ChargeStatus, ChargerState, DutyCycleError};
use crate::peripherals::{
    current_sense::CurrentSense, regs::sense, Board, ChipRegisters, FirmwareError, FirmwareLoader, Irq, IrqControl,
    IrqError, Peripherals,
};
use crate::system::{
    config::{CalibrationFallback, DriverConfig},
    notify::{Notifications, Notifier},
};

/// Attach failure. The instance stays uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachError {
    /// Calibration image could not be loaded
    Firmware(FirmwareError),
    /// Calibration image rejected
    Calibration(CalibError),
    /// Ground reference could not be read
    Measurement(battery::Error),
    /// Current timer IRQ could not be claimed
    Irq(IrqError),
    AlreadyAttached,
}

/// State shared by all entry points.
pub(crate) struct Inner<B: Board, P: ChargeProfile> {
    pub(crate) hw: Peripherals<B>,
    pub(crate) profile: P,
    pub(crate) battery: BatteryState,
    pub(crate) charger: ChargerState,
    pub(crate) current_sense: CurrentSense,
    pub(crate) calibration: CalibrationStore,
    pub(crate) verbose: bool,
    pub(crate) initialized: bool,
    /// A probe is in progress
    pub(crate) attaching: bool,
    /// Notifications to publish on release
    pub(crate) pending: Notifications,
}

/// Point in time view of the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub battery: BatteryState,
    pub charger: ChargerState,
    pub charge: ChargeStatus,
    pub initialized: bool,
}

/// Battery and charger manager of one device.
pub struct BatteryManager<M: RawMutex, B: Board, P: ChargeProfile> {
    pub(crate) inner: Mutex<M, Inner<B, P>>,
    pub(crate) config: DriverConfig,
    notifier: Notifier<M>,
    /// Current measurement timer elapsed
    pub(crate) current_timer: Signal<M, ()>,
    pub(crate) stop_monitor: Signal<M, ()>,
    pub(crate) stop_sampler: Signal<M, ()>,
    pub(crate) shutting_down: AtomicBool,
}

impl<M: RawMutex, B: Board, P: ChargeProfile> BatteryManager<M, B, P> {
    pub fn new(hw: Peripherals<B>, profile: P, config: DriverConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                hw,
                profile,
                battery: BatteryState::default(),
                charger: ChargerState {
                    enabled: config.charger_enabled,
                    ..Default::default()
                },
                current_sense: CurrentSense::new(),
                calibration: CalibrationStore::defaults(),
                verbose: config.verbose_charge_log,
                initialized: false,
                attaching: false,
                pending: Notifications::empty(),
            }),
            config,
            notifier: Notifier::new(),
            current_timer: Signal::new(),
            stop_monitor: Signal::new(),
            stop_sampler: Signal::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Change notifications for the presentation layer.
    pub fn notifier(&self) -> &Notifier<M> {
        &self.notifier
    }

    /// Release the lock, then publish what was collected under it.
    pub(crate) fn release(&self, mut inner: MutexGuard<'_, M, Inner<B, P>>) {
        let pending = core::mem::take(&mut inner.pending);
        drop(inner);
        self.notifier.raise(pending);
    }

    async fn load_calibration<L: FirmwareLoader>(&self, loader: &mut L) -> Result<CalibrationStore, AttachError> {
        let image = loader.request(self.config.firmware).await.map_err(|e| {
            error!("Could not request calibration image {}", self.config.firmware);
            AttachError::Firmware(e)
        })?;
        calibration::parse(image).map_err(|e| {
            error!("Calibration image rejected: {:?}", e);
            AttachError::Calibration(e)
        })
    }

    /// Load the calibration and bring up the hardware.
    ///
    /// Leaves charging off and the current timer IRQ claimed but disabled.
    /// Any failure leaves the instance uninitialized. A probe racing an
    /// attached or attaching instance fails with
    /// [`AttachError::AlreadyAttached`].
    pub async fn probe<L: FirmwareLoader>(&self, loader: &mut L) -> Result<(), AttachError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.initialized || inner.attaching {
                return Err(AttachError::AlreadyAttached);
            }
            inner.attaching = true;
        }

        let result = self.attach(loader).await;
        self.inner.lock().await.attaching = false;
        result
    }

    async fn attach<L: FirmwareLoader>(&self, loader: &mut L) -> Result<(), AttachError> {
        let calibration = match self.load_calibration(loader).await {
            Ok(store) => store,
            Err(e) => match self.config.calibration_fallback {
                CalibrationFallback::UseDefaults => {
                    warn!("Using default calibration");
                    CalibrationStore::defaults()
                }
                CalibrationFallback::Abort => return Err(e),
            },
        };

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.calibration = calibration;
        inner.profile.configure(&self.config.charge);

        if let Err(e) = battery::check_ground(&mut inner.hw.sense, &mut inner.hw.halt) {
            self.release(guard);
            return Err(AttachError::Measurement(e));
        }
        inner.stop_charge();

        if let Err(e) = inner.hw.irq.request_irq(Irq::CurrentTimer) {
            error!("Could not claim the current timer IRQ");
            inner.stop_charge();
            inner.hw.sense.write_reg(sense::ADCSCR, 0);
            self.release(guard);
            return Err(AttachError::Irq(e));
        }
        inner.hw.irq.disable_irq(Irq::CurrentTimer);

        self.shutting_down.store(false, Ordering::Release);
        self.stop_monitor.reset();
        self.stop_sampler.reset();
        self.current_timer.reset();

        inner.initialized = true;
        info!("Battery management initialized");
        self.release(guard);
        Ok(())
    }

    /// Stop the run loops, wait for in-flight work and shut the hardware down.
    pub async fn detach(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.stop_monitor.signal(());
        self.stop_sampler.signal(());

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.initialized {
            inner.stop_charge();
            inner.hw.sense.write_reg(sense::ADCSCR, 0);
            inner.hw.irq.free_irq(Irq::CurrentTimer);
            inner.initialized = false;
            info!("Battery management stopped");
        }
        self.release(guard);
    }

    pub async fn status(&self) -> Status {
        let inner = self.inner.lock().await;
        Status {
            battery: inner.battery,
            charger: inner.charger,
            charge: inner.charge_status(),
            initialized: inner.initialized,
        }
    }

    /// Copy of the active calibration.
    pub async fn calibration(&self) -> CalibrationStore {
        self.inner.lock().await.calibration.clone()
    }

    /// Set the charging policy. Disabling ends an active charge.
    pub async fn set_charging_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock().await;
        inner.charger.enabled = enabled;
        if !enabled && inner.charger.charging {
            inner.stop_charge();
        }
        self.release(inner);
    }

    pub async fn set_verbose(&self, verbose: bool) {
        self.inner.lock().await.verbose = verbose;
    }

    /// Request a PWM duty cycle, as the charge profile would.
    pub async fn set_duty_cycle(&self, duty_cycle: u16) -> Result<(), DutyCycleError> {
        let mut inner = self.inner.lock().await;
        let result = inner.set_duty_cycle(duty_cycle);
        self.release(inner);
        result
    }

    /// Battery current in raw units, 0 without a battery.
    pub async fn measure_current(&self) -> i32 {
        let mut inner = self.inner.lock().await;
        let ma = inner.measure_current_now();
        self.release(inner);
        ma
    }

    /// Current measurement timer IRQ handler.
    ///
    /// Only wakes the sampler, the IRQ is acknowledged there.
    pub fn current_timer_fired(&self) {
        self.current_timer.signal(());
    }
}
