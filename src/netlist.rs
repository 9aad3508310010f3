use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::board::{BoardState, PlacedComponent, GROUND_NET_NAME};
use crate::definitions::{ComponentDefinition, ComponentKind, DefinitionProvider};
use crate::error::NetlistError;

lazy_static! {
    static ref UNSAFE_NODE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_]").unwrap();
}

/// Element types understood by the downstream solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Resistor,
    Capacitor,
    Inductor,
    VoltageSource,
    CurrentSource,
    Diode,
    Bjt,
    Mosfet,
}

impl ElementType {
    pub fn prefix(&self) -> &'static str {
        match self {
            ElementType::Resistor => "R",
            ElementType::Capacitor => "C",
            ElementType::Inductor => "L",
            ElementType::VoltageSource => "V",
            ElementType::CurrentSource => "I",
            ElementType::Diode => "D",
            ElementType::Bjt => "Q",
            ElementType::Mosfet => "M",
        }
    }

    /// Elements written with a `.model` card instead of a bare value
    pub fn uses_model(&self) -> bool {
        matches!(self, ElementType::Diode | ElementType::Bjt | ElementType::Mosfet)
    }
}

/// One compiled circuit element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub element_type: ElementType,
    pub nodes: Vec<String>,
    pub value: f64,
    pub model: Option<String>,
    pub parameters: BTreeMap<String, f64>,
}

/// Measurement point handed through to the solver untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub id: String,
    pub target: String,
}

impl Probe {
    pub fn new(id: &str, target: &str) -> Self {
        Probe {
            id: id.to_string(),
            target: target.to_string(),
        }
    }
}

/// Flat circuit description consumed by the external solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Netlist {
    pub title: String,
    pub ground_node: String,
    pub elements: Vec<Element>,
    pub probes: Vec<Probe>,
}

impl Netlist {
    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Every distinct node name, in first-use order
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for node in self.elements.iter().flat_map(|e| e.nodes.iter()) {
            if !names.contains(&node.as_str()) {
                names.push(node);
            }
        }
        names
    }

    /// Render a SPICE-style deck
    pub fn to_spice(&self) -> String {
        let mut deck = String::new();
        let _ = writeln!(deck, "{}", self.title);

        for element in &self.elements {
            let nodes: Vec<String> = element.nodes.iter().map(|n| spice_node_name(n)).collect();
            let _ = write!(deck, "{} {}", element.id, nodes.join(" "));
            match (&element.model, element.element_type.uses_model()) {
                (Some(model), true) => {
                    let _ = write!(deck, " {}", spice_node_name(model));
                }
                _ => {
                    let _ = write!(deck, " {}", element.value);
                }
            }
            deck.push('\n');
        }

        let mut written_models: Vec<&str> = Vec::new();
        for element in self.elements.iter().filter(|e| e.element_type.uses_model()) {
            let Some(model) = element.model.as_deref() else {
                continue;
            };
            if written_models.contains(&model) {
                continue;
            }
            written_models.push(model);

            let card = match element.element_type {
                ElementType::Bjt if element.value < 0.0 => "PNP",
                ElementType::Bjt => "NPN",
                ElementType::Mosfet if element.value < 0.0 => "PMOS",
                ElementType::Mosfet => "NMOS",
                _ => "D",
            };
            let params: Vec<String> = element
                .parameters
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            let _ = writeln!(deck, ".model {} {}({})", spice_node_name(model), card, params.join(" "));
        }

        for probe in &self.probes {
            let _ = writeln!(deck, ".probe {} {}", probe.id, spice_node_name(&probe.target));
        }

        deck.push_str(".end\n");
        deck
    }
}

/// Replace characters a SPICE reader would choke on
pub fn spice_node_name(name: &str) -> String {
    UNSAFE_NODE_CHARS.replace_all(name, "_").into_owned()
}

/// Compiles a `BoardState` into a `Netlist`
pub struct NetlistConverter<'a> {
    definitions: &'a dyn DefinitionProvider,
    title: String,
}

impl<'a> NetlistConverter<'a> {
    pub fn new(definitions: &'a dyn DefinitionProvider) -> Self {
        NetlistConverter {
            definitions,
            title: "Circuit Board".to_string(),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Compile the board. Element order follows the board's component order.
    pub fn convert(&self, board: &BoardState, probes: &[Probe]) -> Result<Netlist, NetlistError> {
        let mut elements = Vec::new();

        for component in board.components() {
            let definition = self
                .definitions
                .get_definition(component.definition_id())
                .ok_or_else(|| NetlistError::UnknownDefinition {
                    definition_id: component.definition_id().to_string(),
                    component: component.id(),
                })?;

            match self.convert_component(board, component, definition) {
                Ok(element) => elements.push(element),
                Err(NetlistError::UnsupportedKind(kind)) => {
                    debug!("Component {} is a {}, no element emitted", component.id(), kind);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Compiled netlist '{}' with {} elements and {} probes",
            self.title,
            elements.len(),
            probes.len()
        );

        Ok(Netlist {
            title: self.title.clone(),
            ground_node: GROUND_NET_NAME.to_string(),
            elements,
            probes: probes.to_vec(),
        })
    }

    /// Compile one component.
    ///
    /// Ground and probe kinds yield `NetlistError::UnsupportedKind`.
    pub fn convert_component(
        &self,
        board: &BoardState,
        component: &PlacedComponent,
        definition: &ComponentDefinition,
    ) -> Result<Element, NetlistError> {
        let kind = definition.kind;
        let prefix = kind.prefix()?;
        let element_type = kind
            .element_type()
            .ok_or_else(|| NetlistError::UnsupportedKind(kind.to_string()))?;

        let mut nodes = node_names(board, component);
        if nodes.len() < kind.terminal_count() {
            return Err(NetlistError::PinCountMismatch {
                component: component.id(),
                kind: kind.to_string(),
                expected: kind.terminal_count(),
                found: nodes.len(),
            });
        }

        let mut parameters = BTreeMap::new();
        let mut model = None;
        let value = match kind {
            ComponentKind::Diode | ComponentKind::Led | ComponentKind::ZenerDiode => {
                let diode = definition.diode.clone().unwrap_or_default();
                parameters.insert("IS".to_string(), diode.saturation_current);
                parameters.insert("N".to_string(), diode.emission_coefficient);
                if kind == ComponentKind::ZenerDiode {
                    if let Some(bv) = diode.breakdown_voltage {
                        parameters.insert("BV".to_string(), bv);
                    }
                    if let Some(ibv) = diode.breakdown_current {
                        parameters.insert("IBV".to_string(), ibv);
                    }
                }
                model = Some(definition.id.clone());
                component.custom_value().unwrap_or_else(|| definition.nominal_value())
            }
            ComponentKind::NpnTransistor | ComponentKind::PnpTransistor => {
                let bjt = definition.bjt.clone().unwrap_or_default();
                parameters.insert("BF".to_string(), bjt.beta_forward);
                parameters.insert("VAF".to_string(), bjt.early_voltage);
                model = Some(definition.id.clone());
                kind.polarity().unwrap_or(1.0)
            }
            ComponentKind::NChannelMosfet | ComponentKind::PChannelMosfet => {
                let fet = definition.fet.clone().unwrap_or_default();
                parameters.insert("VTO".to_string(), fet.threshold_voltage);
                parameters.insert("KP".to_string(), fet.transconductance);
                model = Some(definition.id.clone());

                // drain, gate, source, bulk tied to source
                nodes.truncate(3);
                let source = nodes[2].clone();
                nodes.push(source);
                kind.polarity().unwrap_or(1.0)
            }
            _ => component.custom_value().unwrap_or_else(|| definition.nominal_value()),
        };

        Ok(Element {
            id: format!("{}{}", prefix, component.id()),
            element_type,
            nodes,
            value,
            model,
            parameters,
        })
    }
}

/// Net name per pin in pin-index order; dangling pins get an isolated node
fn node_names(board: &BoardState, component: &PlacedComponent) -> Vec<String> {
    component
        .pins_in_index_order()
        .into_iter()
        .map(|pin| {
            pin.connected_net()
                .and_then(|net_id| board.get_net(net_id))
                .map(|net| net.name().to_string())
                .unwrap_or_else(|| format!("NC_{}_{}", component.id(), pin.index))
        })
        .collect()
}
