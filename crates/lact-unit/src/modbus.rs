//! Modbus TCP adapter for the skid's I/O rack.
//!
//! A background runtime polls the register map into a shared state struct;
//! the scan thread's `IoPort` calls copy in and out of it without ever
//! waiting on the network. Register layout: discrete inputs 0–12, coils
//! 100–107, input registers 200–206, the 32-bit pulse counter across
//! 300/301 (low word first), holding registers 400–401.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::time::interval;
use tokio_modbus::prelude::*;
use tracing::{error, info, warn};

use lact_core::{scale_analog, unscale_analog, CoreError, IoPort, Quality, TagId, TagStore};

const DI_COUNT: usize = 13;
const AI_COUNT: usize = 7;
const COIL_BASE: u16 = 100;
const AI_BASE: u16 = 200;
const PULSE_BASE: u16 = 300;
const AO_BASE: u16 = 400;
const POLL_MS: u64 = 50;

const DI_TAGS: [TagId; DI_COUNT] = [
    TagId::DiInletVlvOpen,
    TagId::DiInletVlvClosed,
    TagId::DiStrainerHiDp,
    TagId::DiPumpRunning,
    TagId::DiPumpOverload,
    TagId::DiDivertSales,
    TagId::DiDivertDivert,
    TagId::DiSamplePotHi,
    TagId::DiSamplePotLo,
    TagId::DiProverVlvOpen,
    TagId::DiAirElimFloat,
    TagId::DiOutletVlvOpen,
    TagId::DiEstop,
];

const AI_TAGS: [TagId; AI_COUNT] = [
    TagId::AiInletPress,
    TagId::AiLoopHiPress,
    TagId::AiStrainerDp,
    TagId::AiBswProbe,
    TagId::AiMeterTemp,
    TagId::AiTestThermo,
    TagId::AiOutletPress,
];

const DO_TAGS: [TagId; 8] = [
    TagId::DoPumpStart,
    TagId::DoDivertCmd,
    TagId::DoSampleSol,
    TagId::DoSampleMixPump,
    TagId::DoProverVlvCmd,
    TagId::DoAlarmBeacon,
    TagId::DoAlarmHorn,
    TagId::DoStatusGreen,
];

#[derive(Debug, Clone, Default)]
struct Shared {
    connected: bool,
    discretes: [bool; DI_COUNT],
    analogs: [u16; AI_COUNT],
    pulse: u32,
    coils: [bool; 8],
    holdings: [u16; 2],
}

pub struct ModbusPort {
    state: Arc<Mutex<Shared>>,
    _runtime: Arc<Runtime>,
}

impl ModbusPort {
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let state = Arc::new(Mutex::new(Shared::default()));
        let poll_state = Arc::clone(&state);
        let addr = addr.to_string();

        let runtime = Arc::new(Runtime::new()?);
        runtime.spawn(async move {
            let socket_addr = match addr.parse() {
                Ok(parsed) => parsed,
                Err(err) => {
                    error!(%addr, %err, "invalid modbus address");
                    return;
                }
            };

            let mut ctx = match tcp::connect(socket_addr).await {
                Ok(ctx) => {
                    info!(%addr, "modbus connected");
                    ctx
                }
                Err(err) => {
                    error!(%addr, %err, "modbus connect failed");
                    return;
                }
            };

            let mut ticker = interval(Duration::from_millis(POLL_MS));
            loop {
                ticker.tick().await;

                let inputs = async {
                    let discretes = ctx.read_discrete_inputs(0, DI_COUNT as u16).await?;
                    let analogs = ctx.read_input_registers(AI_BASE, AI_COUNT as u16).await?;
                    let pulse = ctx.read_input_registers(PULSE_BASE, 2).await?;
                    Ok::<_, std::io::Error>((discretes, analogs, pulse))
                }
                .await;

                let (coils, holdings) = {
                    let shared = poll_state.lock().unwrap();
                    (shared.coils, shared.holdings)
                };

                match inputs {
                    Ok((discretes, analogs, pulse)) => {
                        let mut shared = poll_state.lock().unwrap();
                        shared.connected = true;
                        for (slot, value) in shared.discretes.iter_mut().zip(discretes) {
                            *slot = value;
                        }
                        for (slot, value) in shared.analogs.iter_mut().zip(analogs) {
                            *slot = value;
                        }
                        if pulse.len() >= 2 {
                            shared.pulse = u32::from(pulse[0]) | (u32::from(pulse[1]) << 16);
                        }
                    }
                    Err(err) => {
                        warn!(%err, "modbus read failed");
                        poll_state.lock().unwrap().connected = false;
                        continue;
                    }
                }

                if let Err(err) = ctx.write_multiple_coils(COIL_BASE, &coils).await {
                    warn!(%err, "modbus coil write failed");
                    poll_state.lock().unwrap().connected = false;
                }
                for (i, value) in holdings.iter().enumerate() {
                    if let Err(err) = ctx.write_single_register(AO_BASE + i as u16, *value).await {
                        warn!(%err, "modbus holding write failed");
                    }
                }
            }
        });

        Ok(Self {
            state,
            _runtime: runtime,
        })
    }
}

impl IoPort for ModbusPort {
    fn read_inputs(&mut self, store: &TagStore) -> Result<(), CoreError> {
        let shared = self.state.lock().unwrap().clone();

        if !shared.connected {
            // Degrade every field input; the NC e-stop rule turns this
            // into a trip if it persists.
            for tag in DI_TAGS.iter().chain(AI_TAGS.iter()) {
                store.set_quality(*tag, Quality::NotConnected);
            }
            store.set_quality(TagId::PiMeterPulse, Quality::NotConnected);
            return Ok(());
        }

        for (tag, raw) in DI_TAGS.iter().zip(shared.discretes) {
            // NC e-stop contact: energized means healthy.
            let value = if *tag == TagId::DiEstop { !raw } else { raw };
            store.write_bool(*tag, value)?;
        }
        for (tag, raw) in AI_TAGS.iter().zip(shared.analogs) {
            let (lo, hi) = tag.range();
            store.write_f32(*tag, scale_analog(raw, lo, hi))?;
        }
        store.write_count(TagId::PiMeterPulse, u64::from(shared.pulse))?;
        Ok(())
    }

    fn write_outputs(&mut self, store: &TagStore) -> Result<(), CoreError> {
        let mut coils = [false; 8];
        for (slot, tag) in coils.iter_mut().zip(DO_TAGS) {
            *slot = store.read_bool(tag)?;
        }
        let sales = store.read_f32(TagId::AoBpSalesSp)?;
        let divert = store.read_f32(TagId::AoBpDivertSp)?;
        let (lo, hi) = TagId::AoBpSalesSp.range();

        let mut shared = self.state.lock().unwrap();
        shared.coils = coils;
        shared.holdings = [
            unscale_analog(sales, lo, hi),
            unscale_analog(divert, lo, hi),
        ];
        Ok(())
    }
}
