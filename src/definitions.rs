use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use crate::board::PinDefinition;
use crate::error::NetlistError;
use crate::geometry::GridPosition;
use crate::netlist::ElementType;

/// Closed set of component kinds known to the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Resistor,
    Capacitor,
    Inductor,
    VoltageSource,
    CurrentSource,
    Diode,
    Led,
    ZenerDiode,
    NpnTransistor,
    PnpTransistor,
    NChannelMosfet,
    PChannelMosfet,
    Ground,
    Probe,
}

impl ComponentKind {
    /// Element type in the compiled netlist; `None` for kinds that only
    /// contribute node names.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            ComponentKind::Resistor => Some(ElementType::Resistor),
            ComponentKind::Capacitor => Some(ElementType::Capacitor),
            ComponentKind::Inductor => Some(ElementType::Inductor),
            ComponentKind::VoltageSource => Some(ElementType::VoltageSource),
            ComponentKind::CurrentSource => Some(ElementType::CurrentSource),
            ComponentKind::Diode | ComponentKind::Led | ComponentKind::ZenerDiode => Some(ElementType::Diode),
            ComponentKind::NpnTransistor | ComponentKind::PnpTransistor => Some(ElementType::Bjt),
            ComponentKind::NChannelMosfet | ComponentKind::PChannelMosfet => Some(ElementType::Mosfet),
            ComponentKind::Ground | ComponentKind::Probe => None,
        }
    }

    /// Netlist element id prefix
    pub fn prefix(&self) -> Result<&'static str, NetlistError> {
        self.element_type()
            .map(|t| t.prefix())
            .ok_or_else(|| NetlistError::UnsupportedKind(self.to_string()))
    }

    pub fn is_simulatable(&self) -> bool {
        self.element_type().is_some()
    }

    /// Signed polarity for transistors: +1 for NPN / N-channel, -1 for PNP / P-channel
    pub fn polarity(&self) -> Option<f64> {
        match self {
            ComponentKind::NpnTransistor | ComponentKind::NChannelMosfet => Some(1.0),
            ComponentKind::PnpTransistor | ComponentKind::PChannelMosfet => Some(-1.0),
            _ => None,
        }
    }

    /// Number of board pins a component of this kind must expose
    pub fn terminal_count(&self) -> usize {
        match self {
            ComponentKind::Ground | ComponentKind::Probe => 1,
            ComponentKind::NpnTransistor
            | ComponentKind::PnpTransistor
            | ComponentKind::NChannelMosfet
            | ComponentKind::PChannelMosfet => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Resistor => "resistor",
            ComponentKind::Capacitor => "capacitor",
            ComponentKind::Inductor => "inductor",
            ComponentKind::VoltageSource => "voltage source",
            ComponentKind::CurrentSource => "current source",
            ComponentKind::Diode => "diode",
            ComponentKind::Led => "LED",
            ComponentKind::ZenerDiode => "zener diode",
            ComponentKind::NpnTransistor => "NPN transistor",
            ComponentKind::PnpTransistor => "PNP transistor",
            ComponentKind::NChannelMosfet => "N-channel MOSFET",
            ComponentKind::PChannelMosfet => "P-channel MOSFET",
            ComponentKind::Ground => "ground",
            ComponentKind::Probe => "probe",
        };
        write!(f, "{}", name)
    }
}

/// Shockley diode parameters; breakdown fields are only used by zeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiodeModel {
    pub saturation_current: f64,
    pub emission_coefficient: f64,
    #[serde(default)]
    pub breakdown_voltage: Option<f64>,
    #[serde(default)]
    pub breakdown_current: Option<f64>,
}

impl Default for DiodeModel {
    fn default() -> Self {
        DiodeModel {
            saturation_current: 1e-14,
            emission_coefficient: 1.0,
            breakdown_voltage: None,
            breakdown_current: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BjtModel {
    pub beta_forward: f64,
    pub early_voltage: f64,
}

impl Default for BjtModel {
    fn default() -> Self {
        BjtModel {
            beta_forward: 100.0,
            early_voltage: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetModel {
    pub threshold_voltage: f64,
    pub transconductance: f64,
}

impl Default for FetModel {
    fn default() -> Self {
        FetModel {
            threshold_voltage: 2.0,
            transconductance: 0.1,
        }
    }
}

/// External description of a placeable part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: String,
    pub name: String,
    pub kind: ComponentKind,
    pub pins: Vec<PinDefinition>,
    #[serde(default)]
    pub resistance: f64,
    #[serde(default)]
    pub capacitance: f64,
    #[serde(default)]
    pub inductance: f64,
    #[serde(default)]
    pub voltage: f64,
    #[serde(default)]
    pub current: f64,
    #[serde(default)]
    pub diode: Option<DiodeModel>,
    #[serde(default)]
    pub bjt: Option<BjtModel>,
    #[serde(default)]
    pub fet: Option<FetModel>,
}

impl ComponentDefinition {
    pub fn new(id: &str, name: &str, kind: ComponentKind, pins: Vec<PinDefinition>) -> Self {
        ComponentDefinition {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            pins,
            resistance: 0.0,
            capacitance: 0.0,
            inductance: 0.0,
            voltage: 0.0,
            current: 0.0,
            diode: None,
            bjt: None,
            fet: None,
        }
    }

    /// The value a placed instance uses when it carries no custom value
    pub fn nominal_value(&self) -> f64 {
        match self.kind {
            ComponentKind::Resistor => self.resistance,
            ComponentKind::Capacitor => self.capacitance,
            ComponentKind::Inductor => self.inductance,
            ComponentKind::VoltageSource => self.voltage,
            ComponentKind::CurrentSource => self.current,
            ComponentKind::NpnTransistor
            | ComponentKind::PnpTransistor
            | ComponentKind::NChannelMosfet
            | ComponentKind::PChannelMosfet => self.kind.polarity().unwrap_or(1.0),
            ComponentKind::Diode
            | ComponentKind::Led
            | ComponentKind::ZenerDiode
            | ComponentKind::Ground
            | ComponentKind::Probe => 0.0,
        }
    }

    pub fn pin_named(&self, name: &str) -> Option<&PinDefinition> {
        self.pins.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    fn with_resistance(mut self, ohms: f64) -> Self {
        self.resistance = ohms;
        self
    }

    fn with_capacitance(mut self, farads: f64) -> Self {
        self.capacitance = farads;
        self
    }

    fn with_inductance(mut self, henries: f64) -> Self {
        self.inductance = henries;
        self
    }

    fn with_voltage(mut self, volts: f64) -> Self {
        self.voltage = volts;
        self
    }

    fn with_current(mut self, amps: f64) -> Self {
        self.current = amps;
        self
    }

    fn with_diode(mut self, model: DiodeModel) -> Self {
        self.diode = Some(model);
        self
    }

    fn with_bjt(mut self, model: BjtModel) -> Self {
        self.bjt = Some(model);
        self
    }

    fn with_fet(mut self, model: FetModel) -> Self {
        self.fet = Some(model);
        self
    }
}

/// Resolves definition ids for the board compiler and commands
pub trait DefinitionProvider {
    fn get_definition(&self, id: &str) -> Option<&ComponentDefinition>;
}

/// In-memory definition catalogue
#[derive(Debug, Clone, Default)]
pub struct DefinitionLibrary {
    definitions: BTreeMap<String, ComponentDefinition>,
}

impl DefinitionProvider for DefinitionLibrary {
    fn get_definition(&self, id: &str) -> Option<&ComponentDefinition> {
        self.definitions.get(id)
    }
}

impl DefinitionLibrary {
    pub fn new() -> Self {
        DefinitionLibrary {
            definitions: BTreeMap::new(),
        }
    }

    /// Library preloaded with the stock parts
    pub fn builtin() -> Self {
        let mut library = DefinitionLibrary::new();

        let two = |a: &str, b: &str| {
            vec![
                PinDefinition::new(0, a, GridPosition::new(-1, 0)),
                PinDefinition::new(1, b, GridPosition::new(1, 0)),
            ]
        };
        let bjt = || {
            vec![
                PinDefinition::new(0, "C", GridPosition::new(1, -1)),
                PinDefinition::new(1, "B", GridPosition::new(-1, 0)),
                PinDefinition::new(2, "E", GridPosition::new(1, 1)),
            ]
        };
        let fet = || {
            vec![
                PinDefinition::new(0, "D", GridPosition::new(1, -1)),
                PinDefinition::new(1, "G", GridPosition::new(-1, 0)),
                PinDefinition::new(2, "S", GridPosition::new(1, 1)),
            ]
        };

        library.insert(ComponentDefinition::new("r1k", "Resistor 1k", ComponentKind::Resistor, two("1", "2")).with_resistance(1e3));
        library.insert(ComponentDefinition::new("r10k", "Resistor 10k", ComponentKind::Resistor, two("1", "2")).with_resistance(10e3));
        library.insert(ComponentDefinition::new("c100n", "Capacitor 100n", ComponentKind::Capacitor, two("1", "2")).with_capacitance(100e-9));
        library.insert(ComponentDefinition::new("l1m", "Inductor 1m", ComponentKind::Inductor, two("1", "2")).with_inductance(1e-3));
        library.insert(ComponentDefinition::new("v5", "Voltage Source 5V", ComponentKind::VoltageSource, two("+", "-")).with_voltage(5.0));
        library.insert(ComponentDefinition::new("i1m", "Current Source 1mA", ComponentKind::CurrentSource, two("+", "-")).with_current(1e-3));
        library.insert(
            ComponentDefinition::new("d1n4148", "1N4148", ComponentKind::Diode, two("A", "K")).with_diode(DiodeModel {
                saturation_current: 2.52e-9,
                emission_coefficient: 1.752,
                ..DiodeModel::default()
            }),
        );
        library.insert(
            ComponentDefinition::new("led_red", "Red LED", ComponentKind::Led, two("A", "K")).with_diode(DiodeModel {
                saturation_current: 1e-18,
                emission_coefficient: 1.9,
                ..DiodeModel::default()
            }),
        );
        library.insert(
            ComponentDefinition::new("z5v1", "Zener 5V1", ComponentKind::ZenerDiode, two("A", "K")).with_diode(DiodeModel {
                saturation_current: 1e-14,
                emission_coefficient: 1.0,
                breakdown_voltage: Some(5.1),
                breakdown_current: Some(1e-3),
            }),
        );
        library.insert(
            ComponentDefinition::new("q2n3904", "2N3904", ComponentKind::NpnTransistor, bjt()).with_bjt(BjtModel {
                beta_forward: 300.0,
                early_voltage: 100.0,
            }),
        );
        library.insert(
            ComponentDefinition::new("q2n3906", "2N3906", ComponentKind::PnpTransistor, bjt()).with_bjt(BjtModel {
                beta_forward: 180.0,
                early_voltage: 18.7,
            }),
        );
        library.insert(
            ComponentDefinition::new("m2n7000", "2N7000", ComponentKind::NChannelMosfet, fet()).with_fet(FetModel {
                threshold_voltage: 2.1,
                transconductance: 0.1,
            }),
        );
        library.insert(
            ComponentDefinition::new("mbss84", "BSS84", ComponentKind::PChannelMosfet, fet()).with_fet(FetModel {
                threshold_voltage: -1.7,
                transconductance: 0.05,
            }),
        );
        library.insert(ComponentDefinition::new(
            "ground",
            "Ground",
            ComponentKind::Ground,
            vec![PinDefinition::new(0, "GND", GridPosition::new(0, -1))],
        ));
        library.insert(ComponentDefinition::new(
            "probe",
            "Voltage Probe",
            ComponentKind::Probe,
            vec![PinDefinition::new(0, "TIP", GridPosition::new(0, 1))],
        ));

        library
    }

    /// Parse a JSON array of definitions
    pub fn from_json_str(content: &str) -> Result<Self> {
        let definitions: Vec<ComponentDefinition> =
            serde_json::from_str(content).context("Invalid component definition JSON")?;

        let mut library = DefinitionLibrary::new();
        for definition in definitions {
            library.insert(definition);
        }
        Ok(library)
    }

    pub fn load_json(filename: &str) -> Result<Self> {
        let content = fs::read_to_string(filename)
            .with_context(|| format!("Failed to read definition library '{}'", filename))?;
        Self::from_json_str(&content)
    }

    /// Insert or replace a definition; returns the replaced one
    pub fn insert(&mut self, definition: ComponentDefinition) -> Option<ComponentDefinition> {
        self.definitions.insert(definition.id.clone(), definition)
    }

    /// Add every definition of `other`, replacing entries with the same id
    pub fn extend(&mut self, other: DefinitionLibrary) {
        self.definitions.extend(other.definitions);
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(|k| k.as_str())
    }
}
