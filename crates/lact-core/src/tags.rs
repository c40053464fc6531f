//! Static tag namespace for the LACT process image.
//!
//! Tag names are compiled into the [`TagId`] enum; the store is a fixed
//! array indexed by it. The string forms exist for the operator console and
//! diagnostics only.

/// Semantic kind of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Di,
    Do,
    Ai,
    Ao,
    Pi,
    Virtual,
}

/// Tag value. Discretes are booleans, analogs are 32-bit floats, the meter
/// pulse counter is an unsigned count, virtual tags may hold any variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Float(f32),
    Count(u64),
    Text(&'static str),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Float(_) => "float",
            Value::Count(_) => "count",
            Value::Text(_) => "text",
        }
    }
}

/// Sample quality, OPC-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
    NotConnected,
}

/// Every tag the engine reads or writes. Declared here once; an unknown
/// string name is a typed error, never a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TagId {
    // Digital inputs
    DiInletVlvOpen,
    DiInletVlvClosed,
    DiStrainerHiDp,
    DiPumpRunning,
    DiPumpOverload,
    DiDivertSales,
    DiDivertDivert,
    DiSamplePotHi,
    DiSamplePotLo,
    DiProverVlvOpen,
    DiAirElimFloat,
    DiOutletVlvOpen,
    DiEstop,
    // Digital outputs
    DoPumpStart,
    DoDivertCmd,
    DoSampleSol,
    DoSampleMixPump,
    DoProverVlvCmd,
    DoAlarmBeacon,
    DoAlarmHorn,
    DoStatusGreen,
    // Analog inputs (engineering units)
    AiInletPress,
    AiLoopHiPress,
    AiStrainerDp,
    AiBswProbe,
    AiMeterTemp,
    AiTestThermo,
    AiOutletPress,
    // Pulse inputs
    PiMeterPulse,
    // Analog outputs
    AoBpSalesSp,
    AoBpDivertSp,
    // Computed / derived
    FlowRateBph,
    BatchGrossBbl,
    BatchNetBbl,
    BatchDivertedBbl,
    BatchElapsedSec,
    BswPct,
    CtlFactor,
    MeterFactor,
    SampleGrabs,
    SampleTotalMl,
    LactStateTag,
    PrevStateTag,
    DivertReason,
    AlarmActiveCount,
    AlarmUnackCount,
    PumpDemand,
    PumpLockout,
    ScanTimeMs,
    ScanCount,
}

pub struct TagDef {
    pub id: TagId,
    pub name: &'static str,
    pub kind: TagKind,
    /// Engineering range for Ai/Ao tags; zeroed otherwise.
    pub lo: f32,
    pub hi: f32,
    pub init: Value,
}

const B0: Value = Value::Bool(false);

/// Canonical tag table, in `TagId` declaration order.
pub const TAG_TABLE: &[TagDef] = &[
    TagDef { id: TagId::DiInletVlvOpen, name: "DI_INLET_VLV_OPEN", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiInletVlvClosed, name: "DI_INLET_VLV_CLOSED", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiStrainerHiDp, name: "DI_STRAINER_HI_DP", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiPumpRunning, name: "DI_PUMP_RUNNING", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiPumpOverload, name: "DI_PUMP_OVERLOAD", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiDivertSales, name: "DI_DIVERT_SALES", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiDivertDivert, name: "DI_DIVERT_DIVERT", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiSamplePotHi, name: "DI_SAMPLE_POT_HI", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiSamplePotLo, name: "DI_SAMPLE_POT_LO", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiProverVlvOpen, name: "DI_PROVER_VLV_OPEN", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiAirElimFloat, name: "DI_AIR_ELIM_FLOAT", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiOutletVlvOpen, name: "DI_OUTLET_VLV_OPEN", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DiEstop, name: "DI_ESTOP", kind: TagKind::Di, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DoPumpStart, name: "DO_PUMP_START", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: B0 },
    // Divert command fail-position: true = DIVERT.
    TagDef { id: TagId::DoDivertCmd, name: "DO_DIVERT_CMD", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: Value::Bool(true) },
    TagDef { id: TagId::DoSampleSol, name: "DO_SAMPLE_SOL", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DoSampleMixPump, name: "DO_SAMPLE_MIX_PUMP", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DoProverVlvCmd, name: "DO_PROVER_VLV_CMD", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DoAlarmBeacon, name: "DO_ALARM_BEACON", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DoAlarmHorn, name: "DO_ALARM_HORN", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::DoStatusGreen, name: "DO_STATUS_GREEN", kind: TagKind::Do, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::AiInletPress, name: "AI_INLET_PRESS", kind: TagKind::Ai, lo: 0.0, hi: 300.0, init: Value::Float(0.0) },
    TagDef { id: TagId::AiLoopHiPress, name: "AI_LOOP_HI_PRESS", kind: TagKind::Ai, lo: 0.0, hi: 300.0, init: Value::Float(0.0) },
    TagDef { id: TagId::AiStrainerDp, name: "AI_STRAINER_DP", kind: TagKind::Ai, lo: 0.0, hi: 50.0, init: Value::Float(0.0) },
    TagDef { id: TagId::AiBswProbe, name: "AI_BSW_PROBE", kind: TagKind::Ai, lo: 0.0, hi: 5.0, init: Value::Float(0.0) },
    TagDef { id: TagId::AiMeterTemp, name: "AI_METER_TEMP", kind: TagKind::Ai, lo: -20.0, hi: 200.0, init: Value::Float(60.0) },
    TagDef { id: TagId::AiTestThermo, name: "AI_TEST_THERMO", kind: TagKind::Ai, lo: -20.0, hi: 200.0, init: Value::Float(60.0) },
    TagDef { id: TagId::AiOutletPress, name: "AI_OUTLET_PRESS", kind: TagKind::Ai, lo: 0.0, hi: 300.0, init: Value::Float(0.0) },
    TagDef { id: TagId::PiMeterPulse, name: "PI_METER_PULSE", kind: TagKind::Pi, lo: 0.0, hi: 0.0, init: Value::Count(0) },
    TagDef { id: TagId::AoBpSalesSp, name: "AO_BP_SALES_SP", kind: TagKind::Ao, lo: 0.0, hi: 150.0, init: Value::Float(50.0) },
    TagDef { id: TagId::AoBpDivertSp, name: "AO_BP_DIVERT_SP", kind: TagKind::Ao, lo: 0.0, hi: 150.0, init: Value::Float(50.0) },
    TagDef { id: TagId::FlowRateBph, name: "FLOW_RATE_BPH", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::BatchGrossBbl, name: "BATCH_GROSS_BBL", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::BatchNetBbl, name: "BATCH_NET_BBL", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::BatchDivertedBbl, name: "BATCH_DIVERTED_BBL", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::BatchElapsedSec, name: "BATCH_ELAPSED_SEC", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::BswPct, name: "BSW_PCT", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::CtlFactor, name: "CTL_FACTOR", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(1.0) },
    TagDef { id: TagId::MeterFactor, name: "METER_FACTOR", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(1.0) },
    TagDef { id: TagId::SampleGrabs, name: "SAMPLE_TOTAL_GRABS", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Count(0) },
    TagDef { id: TagId::SampleTotalMl, name: "SAMPLE_TOTAL_ML", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::LactStateTag, name: "LACT_STATE", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Text("IDLE") },
    TagDef { id: TagId::PrevStateTag, name: "PREV_STATE", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Text("IDLE") },
    TagDef { id: TagId::DivertReason, name: "DIVERT_REASON", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Text("") },
    TagDef { id: TagId::AlarmActiveCount, name: "ALARM_ACTIVE_COUNT", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Count(0) },
    TagDef { id: TagId::AlarmUnackCount, name: "ALARM_UNACK_COUNT", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Count(0) },
    TagDef { id: TagId::PumpDemand, name: "PUMP_DEMAND", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::PumpLockout, name: "PUMP_LOCKOUT", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: B0 },
    TagDef { id: TagId::ScanTimeMs, name: "SCAN_TIME_MS", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Float(0.0) },
    TagDef { id: TagId::ScanCount, name: "SCAN_COUNT", kind: TagKind::Virtual, lo: 0.0, hi: 0.0, init: Value::Count(0) },
];

impl TagId {
    pub const COUNT: usize = TAG_TABLE.len();

    pub fn def(self) -> &'static TagDef {
        &TAG_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }

    pub fn kind(self) -> TagKind {
        self.def().kind
    }

    /// Declared engineering range, for Ai/Ao tags.
    pub fn range(self) -> (f32, f32) {
        let def = self.def();
        (def.lo, def.hi)
    }

    pub fn parse(name: &str) -> Option<TagId> {
        TAG_TABLE.iter().find(|d| d.name == name).map(|d| d.id)
    }

    pub fn all() -> impl Iterator<Item = TagId> {
        TAG_TABLE.iter().map(|d| d.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_in_enum_order() {
        for (i, def) in TAG_TABLE.iter().enumerate() {
            assert_eq!(def.id as usize, i, "table out of order at {}", def.name);
        }
    }

    #[test]
    fn parse_round_trips() {
        for id in TagId::all() {
            assert_eq!(TagId::parse(id.name()), Some(id));
        }
        assert_eq!(TagId::parse("NOT_A_TAG"), None);
    }

    #[test]
    fn analog_ranges_declared() {
        assert_eq!(TagId::AiBswProbe.range(), (0.0, 5.0));
        assert_eq!(TagId::AiMeterTemp.range(), (-20.0, 200.0));
        assert_eq!(TagId::AoBpSalesSp.range(), (0.0, 150.0));
    }
}
