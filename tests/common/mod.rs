//! Mock hardware shared by the integration tests
#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    rc::Rc,
};

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal_async::delay::DelayNs;

use pocket_bms::{
    calibration::parser::{BLOCK_SIZE, ELEMENT_SIZE, GROUP_SIZE, MAGIC},
    charger::{ChargeOutput, ChargeProfile, ChargeProgress, DutyCycleError, Fault, Snapshot},
    peripherals::{
        regs::{
            charge::{self, ChargeControl},
            sense::{self, Status},
        },
        Board, ChipRegisters, EmergencyHalt, FirmwareError, FirmwareLoader, IoError, Irq, IrqControl, IrqError,
        Peripherals, SenseChip,
    },
    system::config::{ChargeParams, DriverConfig},
    AttachError, BatteryManager,
};

/// ADC reading of a 3800 mV battery
pub const RAW_3800MV: i32 = 420;
/// ADC reading of a 2923 mV battery
pub const RAW_LOW: i32 = 100;
/// BSI reading of the 1500 mAh battery
pub const RAW_BSI_1500: i32 = 0x3B5;

#[derive(Debug, Default)]
pub struct IrqLog {
    pub requested: bool,
    pub requests: u32,
    pub freed: bool,
    pub enabled: bool,
    pub acks: u32,
    pub timer_ms: u16,
    pub fail_request: bool,
}

/// Everything the mock chips see and do.
#[derive(Debug)]
pub struct HwState {
    pub status: u16,
    /// Steady conversion result per ADC input
    pub adc: HashMap<u8, i32>,
    /// Inputs whose conversions fail
    pub adc_failing: HashSet<u8>,
    pub adc_reads: Vec<u8>,
    pub sense_writes: Vec<(u8, u16)>,
    pub charge_regs: HashMap<u8, u16>,
    pub charge_writes: Vec<(u8, u16)>,
    pub batcurr: i16,
    pub irq: IrqLog,
    pub halts: Vec<String>,
    pub delay_ns: u64,
}

impl Default for HwState {
    fn default() -> Self {
        let adc = HashMap::from([
            (sense::adc::GND2, 0),
            (sense::adc::BATTVOLT, RAW_3800MV),
            (sense::adc::BSI, RAW_BSI_1500),
            (sense::adc::BATTEMP, 300),
            (sense::adc::CHGVOLT, 500),
            (sense::adc::BKUPVOLT, 200),
        ]);
        Self {
            status: 0,
            adc,
            adc_failing: HashSet::new(),
            adc_reads: Vec::new(),
            sense_writes: Vec::new(),
            charge_regs: HashMap::new(),
            charge_writes: Vec::new(),
            batcurr: 0,
            irq: IrqLog::default(),
            halts: Vec::new(),
            delay_ns: 0,
        }
    }
}

impl HwState {
    pub fn chgctl(&self) -> ChargeControl {
        ChargeControl::from_bits_retain(self.charge_regs.get(&charge::CHGCTL).copied().unwrap_or(0))
    }

    pub fn chgcurr(&self) -> u16 {
        self.charge_regs.get(&charge::CHGCURR).copied().unwrap_or(0)
    }
}

pub type Shared = Rc<RefCell<HwState>>;

pub struct MockSense(pub Shared);
pub struct MockCharge(pub Shared);
pub struct MockIrq(pub Shared);
pub struct MockDelay(pub Shared);
pub struct MockHalt(pub Shared);

impl ChipRegisters for MockSense {
    fn read_reg(&mut self, addr: u8) -> u16 {
        match addr {
            sense::STATUS => self.0.borrow().status,
            _ => 0,
        }
    }
    fn write_reg(&mut self, addr: u8, value: u16) {
        self.0.borrow_mut().sense_writes.push((addr, value));
    }
    fn set_clear_bits(&mut self, addr: u8, set_mask: u16, clear_mask: u16) {
        self.0.borrow_mut().sense_writes.push((addr, set_mask & !clear_mask));
    }
}

impl SenseChip for MockSense {
    fn read_adc(&mut self, channel: u8) -> Result<i32, IoError> {
        let mut hw = self.0.borrow_mut();
        hw.adc_reads.push(channel);
        if hw.adc_failing.contains(&channel) {
            return Err(IoError);
        }
        Ok(hw.adc.get(&channel).copied().unwrap_or(0))
    }
}

impl ChipRegisters for MockCharge {
    fn read_reg(&mut self, addr: u8) -> u16 {
        let hw = self.0.borrow();
        match addr {
            charge::BATCURR => hw.batcurr as u16,
            _ => hw.charge_regs.get(&addr).copied().unwrap_or(0),
        }
    }
    fn write_reg(&mut self, addr: u8, value: u16) {
        let mut hw = self.0.borrow_mut();
        hw.charge_regs.insert(addr, value);
        hw.charge_writes.push((addr, value));
    }
    fn set_clear_bits(&mut self, addr: u8, set_mask: u16, clear_mask: u16) {
        let mut hw = self.0.borrow_mut();
        let reg = hw.charge_regs.entry(addr).or_insert(0);
        *reg = (*reg & !clear_mask) | set_mask;
        let value = *reg;
        hw.charge_writes.push((addr, value));
    }
}

impl IrqControl for MockIrq {
    fn request_irq(&mut self, irq: Irq) -> Result<(), IrqError> {
        assert_eq!(irq, Irq::CurrentTimer);
        let mut hw = self.0.borrow_mut();
        // A claimed line cannot be claimed again
        if hw.irq.fail_request || (hw.irq.requested && !hw.irq.freed) {
            return Err(IrqError);
        }
        hw.irq.requested = true;
        hw.irq.requests += 1;
        hw.irq.freed = false;
        hw.irq.enabled = true;
        Ok(())
    }
    fn free_irq(&mut self, _irq: Irq) {
        self.0.borrow_mut().irq.freed = true;
    }
    fn enable_irq(&mut self, _irq: Irq) {
        self.0.borrow_mut().irq.enabled = true;
    }
    fn disable_irq(&mut self, _irq: Irq) {
        self.0.borrow_mut().irq.enabled = false;
    }
    fn ack_irq(&mut self, _irq: Irq) {
        self.0.borrow_mut().irq.acks += 1;
    }
    fn set_current_timer(&mut self, interval_ms: u16) {
        self.0.borrow_mut().irq.timer_ms = interval_ms;
    }
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().delay_ns += ns as u64;
    }
}

impl EmergencyHalt for MockHalt {
    fn halt(&mut self, message: &str) -> ! {
        self.0.borrow_mut().halts.push(message.to_string());
        panic!("emergency halt: {}", message);
    }
}

pub struct MockBoard;

impl Board for MockBoard {
    type Sense = MockSense;
    type Charge = MockCharge;
    type Irq = MockIrq;
    type Delay = MockDelay;
    type Halt = MockHalt;
}

/// What the scripted profile was asked to do.
#[derive(Debug, Default)]
pub struct ProfileState {
    pub params: Option<ChargeParams>,
    pub charging: bool,
    pub starts: Vec<u16>,
    pub stops: u32,
    pub snapshots: Vec<Snapshot>,
    /// Duty cycle requested on the next update
    pub duty_request: Option<u16>,
    pub duty_results: Vec<Result<(), DutyCycleError>>,
    /// Outcomes of the next updates, `Charging` once exhausted
    pub outcomes: VecDeque<Result<ChargeProgress, Fault>>,
    pub refuse_start: bool,
    /// Clear the charging flag when finishing or failing
    pub self_terminating: bool,
}

pub struct ScriptedProfile(pub Rc<RefCell<ProfileState>>);

impl ChargeProfile for ScriptedProfile {
    fn configure(&mut self, params: &ChargeParams) {
        self.0.borrow_mut().params = Some(*params);
    }

    fn start(&mut self, capacity_mah: u16) -> Result<(), Fault> {
        let mut state = self.0.borrow_mut();
        state.starts.push(capacity_mah);
        if state.refuse_start {
            return Err(Fault);
        }
        state.charging = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.0.borrow_mut();
        state.charging = false;
        state.stops += 1;
    }

    fn is_charging(&self) -> bool {
        self.0.borrow().charging
    }

    fn update_state<O: ChargeOutput>(&mut self, snapshot: Snapshot, output: &mut O) -> Result<ChargeProgress, Fault> {
        let duty_request = {
            let mut state = self.0.borrow_mut();
            state.snapshots.push(snapshot);
            state.duty_request.take()
        };
        if let Some(duty_cycle) = duty_request {
            let result = output.set_duty_cycle(duty_cycle);
            self.0.borrow_mut().duty_results.push(result);
        }
        let mut state = self.0.borrow_mut();
        let outcome = state.outcomes.pop_front().unwrap_or(Ok(ChargeProgress::Charging));
        if state.self_terminating && outcome != Ok(ChargeProgress::Charging) {
            state.charging = false;
        }
        outcome
    }
}

/// Serves one calibration image, or nothing.
pub struct Firmware(pub Option<Vec<u8>>);

impl FirmwareLoader for Firmware {
    async fn request(&mut self, name: &str) -> Result<&[u8], FirmwareError> {
        assert_eq!(name, "n810-cal-bme-pmm.fw");
        self.0.as_deref().ok_or(FirmwareError::NotFound)
    }
}

/// Serves a calibration image after yielding to the executor once.
pub struct SlowFirmware(pub Vec<u8>);

impl FirmwareLoader for SlowFirmware {
    async fn request(&mut self, _name: &str) -> Result<&[u8], FirmwareError> {
        embassy_futures::yield_now().await;
        Ok(&self.0)
    }
}

pub fn put_group1_element(image: &mut [u8], element: usize, id: u8, flags: u8, field1: u32, field2: u32) {
    let start = GROUP_SIZE + element * ELEMENT_SIZE;
    image[start..start + 4].copy_from_slice(&[id, flags, 1, 0]);
    image[start + 4..start + 8].copy_from_slice(&field1.to_le_bytes());
    image[start + 8..start + 12].copy_from_slice(&field2.to_le_bytes());
}

/// Calibration image with plausible values for every group 1 channel.
pub fn calibration_image() -> Vec<u8> {
    let mut image = vec![0u8; BLOCK_SIZE];
    image[..MAGIC.len()].copy_from_slice(MAGIC);
    // groups 0 and 1 active
    image[16] = 0b011;
    image[GROUP_SIZE] = 0x01;
    image[GROUP_SIZE + ELEMENT_SIZE] = 0x01;

    put_group1_element(&mut image, 2, 0xFE, 0x05, (-4i32) as u32, 13100);
    put_group1_element(&mut image, 0x01 + 3, 0x01, 0x01, 2500, 21500);
    put_group1_element(&mut image, 0x02 + 3, 0x02, 0x01, 0, 128000);
    put_group1_element(&mut image, 0x13 + 3, 0x13, 0x01, 0, 19000);
    put_group1_element(&mut image, 0x0E + 3, 0x0E, 0x06, 0, 9500);
    put_group1_element(&mut image, 0x04 + 3, 0x04, 0x02, 1180, 0);
    put_group1_element(&mut image, 0x05 + 3, 0x05, 0x03, 265000000, 300);
    image
}

pub type Manager = BatteryManager<NoopRawMutex, MockBoard, ScriptedProfile>;

/// A manager wired to fresh mocks.
pub struct Rig {
    pub hw: Shared,
    pub profile: Rc<RefCell<ProfileState>>,
    pub bms: Manager,
}

impl Rig {
    pub fn new(config: DriverConfig) -> Self {
        let hw: Shared = Rc::new(RefCell::new(HwState::default()));
        let profile = Rc::new(RefCell::new(ProfileState::default()));
        let peripherals = Peripherals::<MockBoard>::new(
            MockSense(hw.clone()),
            MockCharge(hw.clone()),
            MockIrq(hw.clone()),
            MockDelay(hw.clone()),
            MockHalt(hw.clone()),
        );
        let bms = BatteryManager::new(peripherals, ScriptedProfile(profile.clone()), config);
        Self { hw, profile, bms }
    }

    /// Charging allowed, attached with a valid calibration image.
    pub fn attached() -> Self {
        let rig = Self::new(DriverConfig {
            charger_enabled: true,
            ..Default::default()
        });
        rig.probe().expect("attach");
        rig
    }

    pub fn probe(&self) -> Result<(), AttachError> {
        block_on(self.bms.probe(&mut Firmware(Some(calibration_image()))))
    }

    pub fn set_status(&self, status: Status) {
        self.hw.borrow_mut().status = status.bits();
    }

    pub fn check(&self) {
        block_on(self.bms.periodic_check());
    }

    pub fn sample(&self) {
        block_on(self.bms.sample_charge_state());
    }

    /// Battery and charger inserted, one monitor pass.
    pub fn start_charging(&self) {
        self.set_status(Status::BATAVAIL | Status::CHGPLUG);
        self.check();
    }
}
