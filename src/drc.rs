use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::board::{BoardState, ComponentId};
use crate::commands::SharedDefinitions;
use crate::definitions::ComponentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    UnconnectedPin,
    Short,
}

/// One finding. Flat so it can be written as a CSV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub component: Option<ComponentId>,
    pub pin_index: Option<usize>,
    pub net: Option<String>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub message: String,
}

const CSV_HEADER: [&str; 7] = ["kind", "component", "pin_index", "net", "x", "y", "message"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrcResult {
    pub violations: Vec<Violation>,
}

impl DrcResult {
    pub fn unconnected_count(&self) -> usize {
        self.count(ViolationKind::UnconnectedPin)
    }

    pub fn short_count(&self) -> usize {
        self.count(ViolationKind::Short)
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }

    /// Write one CSV row per violation. The header row is always written,
    /// so a clean board still yields the column names.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        csv_writer
            .write_record(CSV_HEADER)
            .context("Failed to write DRC header")?;
        for violation in &self.violations {
            csv_writer.serialize(violation).context("Failed to write DRC row")?;
        }
        csv_writer.flush().context("Failed to flush DRC report")?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        String::from_utf8(buffer).context("DRC report is not valid UTF-8")
    }

    pub fn save_csv(&self, filename: &str) -> Result<()> {
        let file = std::fs::File::create(filename)
            .with_context(|| format!("Failed to create DRC report: {}", filename))?;
        self.write_csv(file)
    }
}

/// A pluggable design rule
pub trait DesignRule {
    fn name(&self) -> &str;
    fn check(&self, board: &BoardState, violations: &mut Vec<Violation>);
}

/// Every pin without a net, one violation per pin
pub struct UnconnectedPinRule;

impl DesignRule for UnconnectedPinRule {
    fn name(&self) -> &str {
        "unconnected_pin"
    }

    fn check(&self, board: &BoardState, violations: &mut Vec<Violation>) {
        for component in board.components() {
            for pin in component.pins_in_index_order() {
                // A dangling net id counts as unconnected
                let connected = pin
                    .connected_net()
                    .map(|id| board.get_net(id).is_some())
                    .unwrap_or(false);
                if connected {
                    continue;
                }

                let position = component.pin_position(pin.index);
                violations.push(Violation {
                    kind: ViolationKind::UnconnectedPin,
                    component: Some(component.id()),
                    pin_index: Some(pin.index),
                    net: None,
                    x: position.map(|p| p.x),
                    y: position.map(|p| p.y),
                    message: format!(
                        "Pin {} ({}) of {} {} is not connected",
                        pin.index,
                        pin.name,
                        component.definition_id(),
                        component.id()
                    ),
                });
            }
        }
    }
}

/// A voltage source whose terminals share a net
pub struct SourceShortRule {
    definitions: SharedDefinitions,
}

impl SourceShortRule {
    pub fn new(definitions: SharedDefinitions) -> Self {
        SourceShortRule { definitions }
    }
}

impl DesignRule for SourceShortRule {
    fn name(&self) -> &str {
        "source_short"
    }

    fn check(&self, board: &BoardState, violations: &mut Vec<Violation>) {
        for component in board.components() {
            let is_source = self
                .definitions
                .get_definition(component.definition_id())
                .map(|d| d.kind == ComponentKind::VoltageSource)
                .unwrap_or(false);
            if !is_source {
                continue;
            }

            let nets: Vec<_> = component
                .pins_in_index_order()
                .iter()
                .map(|p| p.connected_net())
                .collect();
            let Some(Some(first)) = nets.first().copied() else {
                continue;
            };
            if nets.len() < 2 || !nets.iter().all(|n| *n == Some(first)) {
                continue;
            }

            let name = board.get_net(first).map(|n| n.name().to_string());
            violations.push(Violation {
                kind: ViolationKind::Short,
                component: Some(component.id()),
                pin_index: None,
                net: name.clone(),
                x: Some(component.position().x),
                y: Some(component.position().y),
                message: format!(
                    "Voltage source {} is shorted by net '{}'",
                    component.id(),
                    name.unwrap_or_default()
                ),
            });
        }
    }
}

pub struct DrcChecker {
    rules: Vec<Box<dyn DesignRule>>,
}

impl Default for DrcChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl DrcChecker {
    /// Checker with the default rule set
    pub fn new() -> Self {
        DrcChecker {
            rules: vec![Box::new(UnconnectedPinRule)],
        }
    }

    pub fn empty() -> Self {
        DrcChecker { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: Box<dyn DesignRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn check(&self, board: &BoardState) -> DrcResult {
        let mut violations = Vec::new();
        for rule in &self.rules {
            let before = violations.len();
            rule.check(board, &mut violations);
            debug!("Rule {} reported {} violations", rule.name(), violations.len() - before);
        }
        DrcResult { violations }
    }
}
