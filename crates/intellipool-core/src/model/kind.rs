// ── Equipment kinds ──
//
// Every object on the controller carries an `OBJTYP`/`SUBTYP` tag. The
// tag decides which keys are worth subscribing to; kinds that share a
// key set share a row in `KEY_SETS`.

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Closed set of equipment kinds this client knows how to subscribe to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum EquipmentKind {
    Pump,
    Body,
    Sense,
    Circuit,
    Generic,
    Circgrp,
    Chem,
    Heater,
    // Lighting family
    Intelli,
    Glow,
    Magic2,
    Clrcasc,
    Dimmer,
    Glowt,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySet {
    Pump,
    Body,
    Sensor,
    Circuit,
    Chemistry,
    Heater,
    Light,
}

const KEY_SETS: &[(KeySet, &[&str])] = &[
    (KeySet::Pump, &["STATUS", "RPM", "GPM", "PWR", "SNAME", "SUBTYP"]),
    (
        KeySet::Body,
        &[
            "STATUS", "TEMP", "HTMODE", "HTSRC", "LOTMP", "HITMP", "SNAME", "SUBTYP", "LSTTMP",
        ],
    ),
    (KeySet::Sensor, &["STATUS", "PROBE", "SUBTYP", "SNAME", "SOURCE"]),
    (
        KeySet::Circuit,
        &["STATUS", "SNAME", "SUBTYP", "ACT", "USE", "FREEZE", "FEATR"],
    ),
    (
        KeySet::Chemistry,
        &[
            "STATUS", "SNAME", "SUBTYP", "PHVAL", "ORPVAL", "SALT", "ALK", "CALC", "CYACID",
            "PHSET", "ORPSET", "PHTNK", "ORPTNK", "QUALTY",
        ],
    ),
    (
        KeySet::Heater,
        &[
            "STATUS", "SUBTYP", "PERMIT", "TIMOUT", "READY", "HTMODE", "SHOMNU", "COOL",
            "COMUART", "BODY", "HNAME", "START", "STOP", "HEATING", "BOOST", "TIME", "DLY",
        ],
    ),
    (KeySet::Light, &["ACT", "USE"]),
];

impl EquipmentKind {
    /// Resolve a kind tag as it appears on the wire (`"HEATER"`,
    /// `"intelli"`, ...). Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        tag.trim().parse().ok()
    }

    /// The tag as the controller spells it.
    pub fn tag(self) -> &'static str {
        self.into()
    }

    /// Whether this kind belongs to the lighting family.
    pub fn is_light(self) -> bool {
        self.key_set() == KeySet::Light
    }

    fn key_set(self) -> KeySet {
        match self {
            Self::Pump => KeySet::Pump,
            Self::Body => KeySet::Body,
            Self::Sense => KeySet::Sensor,
            Self::Circuit | Self::Generic | Self::Circgrp => KeySet::Circuit,
            Self::Chem => KeySet::Chemistry,
            Self::Heater => KeySet::Heater,
            Self::Intelli
            | Self::Glow
            | Self::Magic2
            | Self::Clrcasc
            | Self::Dimmer
            | Self::Glowt
            | Self::Light => KeySet::Light,
        }
    }

    /// The protocol keys a subscriber of this kind cares about.
    pub fn keys(self) -> &'static [&'static str] {
        let set = self.key_set();
        KEY_SETS
            .iter()
            .find(|(s, _)| *s == set)
            .map(|(_, keys)| *keys)
            .unwrap_or_default()
    }
}

// ── Schedules ────────────────────────────────────────────────────────

/// `condition` that selects every schedule object.
pub const SCHEDULE_OBJTYP_CONDITION: &str = "OBJTYP=SCHED";

/// Keys read when fetching schedules.
pub const SCHEDULE_KEYS: &[&str] = &[
    "OBJNAM", "OBJTYP", "LISTORD", "CIRCUIT", "SNAME", "DAY", "SINGLE", "START", "TIME", "STOP",
    "TIMOUT", "GROUP", "HEATER", "COOLING", "LOTMP", "SMTSRT", "VACFLO", "STATUS", "DNTSTP",
    "ACT", "MODE",
];

/// Schedule keys in the single-string form the controller expects for
/// an `ALL` fetch.
pub fn schedule_key_list() -> String {
    SCHEDULE_KEYS.join(" : ")
}
