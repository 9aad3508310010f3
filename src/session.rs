use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::rc::Rc;

use crate::board::{BoardState, ComponentId, PinReference};
use crate::cli::OutputFormat;
use crate::commands::{
    Command, DeleteTraceNetCommand, MoveComponentCommand, PlaceComponentCommand, RemoveComponentCommand,
    RouteTraceCommand, RouteTraceToNetPointCommand, SetComponentValueCommand, SharedDefinitions,
};
use crate::definitions::{DefinitionLibrary, DefinitionProvider};
use crate::drc::{DrcChecker, DrcResult, SourceShortRule};
use crate::error::ScriptError;
use crate::geometry::GridPosition;
use crate::history::{CommandHistory, DEFAULT_HISTORY_CAPACITY};
use crate::netlist::{Netlist, NetlistConverter, Probe};
use crate::script::{self, PinSpec, ScriptCommand, ScriptLine};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub history_capacity: usize,
    pub title: String,
    pub check_source_shorts: bool,
    pub fail_on_drc: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            title: "Circuit Board".to_string(),
            check_source_shorts: true,
            fail_on_drc: false,
        }
    }
}

/// Compiled output of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub netlist: Netlist,
    pub drc: DrcResult,
}

type Labels = BTreeMap<String, GridPosition>;

/// Drives a board through a script.
///
/// Script labels map to component origins rather than ids, since undo
/// re-creates entities under fresh ids. The label map is versioned in
/// lockstep with the command history.
pub struct Session {
    board: BoardState,
    history: CommandHistory,
    definitions: Rc<DefinitionLibrary>,
    config: SessionConfig,
    title: String,
    labels: Labels,
    label_undo: VecDeque<Labels>,
    label_redo: Vec<Labels>,
    probes: Vec<Probe>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_library(config, DefinitionLibrary::builtin())
    }

    pub fn with_library(config: SessionConfig, library: DefinitionLibrary) -> Self {
        Session {
            board: BoardState::new(),
            history: CommandHistory::new(config.history_capacity),
            definitions: Rc::new(library),
            title: config.title.clone(),
            config,
            labels: Labels::new(),
            label_undo: VecDeque::new(),
            label_redo: Vec::new(),
            probes: Vec::new(),
        }
    }

    pub fn board(&self) -> &BoardState {
        &self.board
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn definitions(&self) -> &DefinitionLibrary {
        &self.definitions
    }

    /// Component currently carrying `label`
    pub fn component(&self, label: &str) -> Option<ComponentId> {
        let position = self.labels.get(label)?;
        self.board
            .components()
            .iter()
            .find(|c| c.position() == *position)
            .map(|c| c.id())
    }

    pub fn run_file(&mut self, filename: &str) -> Result<()> {
        let lines = script::parse_file(filename)?;
        info!("Loaded {} script commands from {}", lines.len(), filename);
        self.run_lines(&lines)
    }

    pub fn run_script(&mut self, content: &str) -> Result<()> {
        let lines = script::parse_script(content)?;
        self.run_lines(&lines)
    }

    fn run_lines(&mut self, lines: &[ScriptLine]) -> Result<()> {
        for line in lines {
            self.apply(line)
                .with_context(|| format!("Script line {} failed", line.line))?;
        }
        info!(
            "Script applied: {} components, {} nets, {} traces",
            self.board.components().len(),
            self.board.nets().len(),
            self.board.traces().len()
        );
        Ok(())
    }

    /// Apply one parsed script command
    pub fn apply(&mut self, line: &ScriptLine) -> Result<()> {
        let number = line.line;

        match &line.command {
            ScriptCommand::Title(title) => {
                self.title = title.clone();
            }
            ScriptCommand::Place {
                label,
                definition,
                position,
                rotation,
                value,
                fixed,
            } => {
                if self.labels.contains_key(label) {
                    return Err(ScriptError::DuplicateLabel {
                        line: number,
                        label: label.clone(),
                    }
                    .into());
                }
                let pins = self
                    .definitions
                    .get_definition(definition)
                    .map(|d| d.pins.clone())
                    .ok_or_else(|| ScriptError::UnknownDefinition {
                        line: number,
                        definition: definition.clone(),
                    })?;
                if self.board.components().iter().any(|c| c.position() == *position) {
                    bail!("Another component already sits at {}", position);
                }

                let mut command = PlaceComponentCommand::new(definition, *position, *rotation, pins);
                if let Some(value) = value {
                    command = command.with_value(*value);
                }
                if *fixed {
                    command = command.fixed();
                }

                let mut labels = self.labels.clone();
                labels.insert(label.clone(), *position);
                self.execute(Box::new(command), labels);
            }
            ScriptCommand::Route { start, end, vias } => {
                let start = self.resolve_pin(number, start)?;
                let end = self.resolve_pin(number, end)?;
                let command = RouteTraceCommand::through(self.shared_definitions(), start, end, vias);
                self.execute(Box::new(command), self.labels.clone());
            }
            ScriptCommand::Tap {
                pin,
                net,
                junction,
                vias,
            } => {
                let pin = self.resolve_pin(number, pin)?;
                let net_id = self
                    .board
                    .get_net_by_name(net)
                    .map(|n| n.id())
                    .ok_or_else(|| ScriptError::UnknownNet {
                        line: number,
                        net: net.clone(),
                    })?;
                let command =
                    RouteTraceToNetPointCommand::through(self.shared_definitions(), pin, net_id, *junction, vias);
                self.execute(Box::new(command), self.labels.clone());
            }
            ScriptCommand::Remove { label } => {
                let id = self.resolve_component(number, label)?;
                let mut labels = self.labels.clone();
                if self.is_fixed(id) {
                    warn!("Line {}: {} is fixed and stays on the board", number, label);
                } else {
                    labels.remove(label);
                }
                self.execute(Box::new(RemoveComponentCommand::new(id)), labels);
            }
            ScriptCommand::Move {
                label,
                position,
                rotation,
            } => {
                let id = self.resolve_component(number, label)?;
                if self
                    .board
                    .components()
                    .iter()
                    .any(|c| c.id() != id && c.position() == *position)
                {
                    bail!("Another component already sits at {}", position);
                }
                let current = self
                    .board
                    .get_component(id)
                    .map(|c| c.rotation())
                    .unwrap_or_default();
                let mut labels = self.labels.clone();
                if self.is_fixed(id) {
                    warn!("Line {}: {} is fixed and will not move", number, label);
                } else {
                    labels.insert(label.clone(), *position);
                }
                let command = MoveComponentCommand::new(id, *position, rotation.unwrap_or(current));
                self.execute(Box::new(command), labels);
            }
            ScriptCommand::Value { label, value } => {
                let id = self.resolve_component(number, label)?;
                self.execute(Box::new(SetComponentValueCommand::new(id, *value)), self.labels.clone());
            }
            ScriptCommand::DeleteNet { net } => {
                let net_id = self
                    .board
                    .get_net_by_name(net)
                    .map(|n| n.id())
                    .ok_or_else(|| ScriptError::UnknownNet {
                        line: number,
                        net: net.clone(),
                    })?;
                self.execute(Box::new(DeleteTraceNetCommand::new(net_id)), self.labels.clone());
            }
            ScriptCommand::Probe { id, target } => {
                self.probes.push(Probe::new(id, target));
            }
            ScriptCommand::Undo => self.undo(),
            ScriptCommand::Redo => self.redo(),
        }

        Ok(())
    }

    pub fn undo(&mut self) {
        if !self.history.undo(&mut self.board) {
            warn!("Nothing to undo");
            return;
        }
        if let Some(previous) = self.label_undo.pop_back() {
            self.label_redo.push(std::mem::replace(&mut self.labels, previous));
        }
    }

    pub fn redo(&mut self) {
        if !self.history.redo(&mut self.board) {
            warn!("Nothing to redo");
            return;
        }
        if let Some(next) = self.label_redo.pop() {
            self.label_undo.push_back(std::mem::replace(&mut self.labels, next));
        }
    }

    /// Run the configured design rules
    pub fn check(&self) -> DrcResult {
        let mut checker = DrcChecker::new();
        if self.config.check_source_shorts {
            checker = checker.with_rule(Box::new(SourceShortRule::new(self.shared_definitions())));
        }
        checker.check(&self.board)
    }

    pub fn compile(&self) -> Result<Netlist> {
        let netlist = NetlistConverter::new(&*self.definitions)
            .with_title(&self.title)
            .convert(&self.board, &self.probes)?;
        Ok(netlist)
    }

    /// DRC then compile. Violations abort only when `fail_on_drc` is set.
    pub fn finish(&self) -> Result<SessionReport> {
        let drc = self.check();
        if drc.is_clean() {
            info!("Design rule check passed");
        } else {
            warn!(
                "Design rule check: {} unconnected pins, {} shorts",
                drc.unconnected_count(),
                drc.short_count()
            );
            if self.config.fail_on_drc {
                bail!("Design rule check failed with {} violations", drc.violations.len());
            }
        }

        let netlist = self.compile()?;
        info!(
            "Netlist '{}': {} elements, {} nodes",
            netlist.title,
            netlist.elements.len(),
            netlist.node_names().len()
        );
        Ok(SessionReport { netlist, drc })
    }

    pub fn render_netlist(netlist: &Netlist, format: &OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Spice => Ok(netlist.to_spice()),
            OutputFormat::Json => serde_json::to_string_pretty(netlist).context("Failed to serialize netlist"),
        }
    }

    pub fn export_netlist(netlist: &Netlist, filename: &str, format: &OutputFormat) -> Result<()> {
        let content = Self::render_netlist(netlist, format)?;
        fs::write(filename, content).with_context(|| format!("Failed to write netlist to {}", filename))?;
        Ok(())
    }

    pub fn print_summary(&self, report: &SessionReport) {
        println!("\n=== Board Summary ===");
        println!("Title: {}", self.title);
        println!("Components: {}", self.board.components().len());
        println!("Nets: {}", self.board.nets().len());
        println!("Traces: {}", self.board.traces().len());
        println!("Undo depth: {}", self.history.undo_count());

        if !self.board.nets().is_empty() {
            println!("\nNets:");
            for net in self.board.nets() {
                println!("  {}: {} pins", net.name(), net.pin_count());
            }
        }

        println!(
            "\nDRC: {} unconnected pins, {} shorts",
            report.drc.unconnected_count(),
            report.drc.short_count()
        );
        println!("\n{}", report.netlist.to_spice());
    }

    fn shared_definitions(&self) -> SharedDefinitions {
        self.definitions.clone()
    }

    fn execute(&mut self, command: Box<dyn Command>, labels: Labels) {
        debug!("Executing '{}'", command.description());
        self.label_undo
            .push_back(std::mem::replace(&mut self.labels, labels));
        self.label_redo.clear();

        self.history.execute_command(&mut self.board, command);

        while self.label_undo.len() > self.history.undo_count() {
            self.label_undo.pop_front();
        }
    }

    fn is_fixed(&self, id: ComponentId) -> bool {
        self.board.get_component(id).map(|c| c.is_fixed()).unwrap_or(false)
    }

    fn resolve_component(&self, line: usize, label: &str) -> Result<ComponentId, ScriptError> {
        self.component(label).ok_or_else(|| ScriptError::UnknownLabel {
            line,
            label: label.to_string(),
        })
    }

    fn resolve_pin(&self, line: usize, spec: &PinSpec) -> Result<PinReference, ScriptError> {
        let id = self.resolve_component(line, &spec.label)?;
        let unknown = || ScriptError::UnknownPin {
            line,
            label: spec.label.clone(),
            pin: spec.pin.clone(),
        };

        let component = self.board.get_component(id).ok_or_else(unknown)?;
        let index = component
            .pins()
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(&spec.pin))
            .map(|p| p.index)
            .or_else(|| {
                spec.pin
                    .parse::<usize>()
                    .ok()
                    .filter(|index| component.pin(*index).is_some())
            })
            .ok_or_else(unknown)?;

        self.board.pin_reference(id, index).ok_or_else(unknown)
    }
}

/// Write a report's netlist and, optionally, its DRC CSV
pub fn write_outputs(report: &SessionReport, output: &str, format: &OutputFormat, drc: Option<&str>) -> Result<()> {
    Session::export_netlist(&report.netlist, output, format)?;
    if let Some(drc_file) = drc {
        report.drc.save_csv(drc_file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIVIDER: &str = "\
title Divider
place V1 v5 at 0,0 rot 90
place R1 r10k at 4,0
place R2 r10k at 8,0
place G ground at 0,6
route V1.+ R1.1
route R1.2 R2.1
route V1.- G.GND
route R2.2 G.GND via 9,5 1,5
probe P1 N002
";

    #[test]
    fn test_divider_compiles() {
        let mut session = Session::default();
        session.run_script(DIVIDER).unwrap();

        assert_eq!(session.board().components().len(), 4);
        assert_eq!(session.board().nets().len(), 3);
        session.board().verify_consistency().unwrap();

        let report = session.finish().unwrap();
        assert!(report.drc.is_clean());
        assert_eq!(report.netlist.title, "Divider");
        assert_eq!(report.netlist.elements.len(), 3);
        assert_eq!(report.netlist.probes.len(), 1);
        assert!(report
            .netlist
            .elements
            .iter()
            .any(|e| e.id.starts_with('V') && e.nodes.contains(&"0".to_string())));
    }

    #[test]
    fn test_labels_follow_undo() {
        let mut session = Session::default();
        session
            .run_script("place R1 r1k at 0,0\nmove R1 to 5,5\nundo")
            .unwrap();

        let id = session.component("R1").unwrap();
        assert_eq!(session.board().get_component(id).unwrap().position(), GridPosition::new(0, 0));

        session.run_script("redo\nremove R1\nundo").unwrap();
        let id = session.component("R1").unwrap();
        assert_eq!(session.board().get_component(id).unwrap().position(), GridPosition::new(5, 5));
    }

    #[test]
    fn test_undo_recreated_component_keeps_label() {
        let mut session = Session::default();
        session
            .run_script("place R1 r1k at 0,0\nplace R2 r1k at 6,0\nroute R1.2 R2.1\nremove R1\nundo\nvalue R1 2k")
            .unwrap();

        let id = session.component("R1").unwrap();
        assert_eq!(session.board().get_component(id).unwrap().custom_value(), Some(2000.0));
        assert_eq!(session.board().nets().len(), 1);
    }

    #[test]
    fn test_script_errors() {
        let mut session = Session::default();
        let err = session.run_script("route R1.1 R2.1").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown label"));

        let err = session.run_script("place R1 nonsense at 0,0").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown component definition"));

        session.run_script("place R1 r1k at 0,0").unwrap();
        let err = session.run_script("place R1 r1k at 3,3").unwrap_err();
        assert!(format!("{:#}", err).contains("duplicate label"));

        let err = session.run_script("route R1.X R1.1").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown pin"));

        let err = session.run_script("delete-net NOPE").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown net"));
    }

    #[test]
    fn test_move_onto_occupied_origin_is_rejected() {
        let mut session = Session::default();
        session.run_script("place R1 r1k at 0,0\nplace R2 r1k at 6,0").unwrap();

        let err = session.run_script("move R2 to 0,0").unwrap_err();
        assert!(format!("{:#}", err).contains("already sits at"));

        session.run_script("move R2 to 6,0 rot 90\nvalue R2 2k").unwrap();
        let r1 = session.component("R1").unwrap();
        let r2 = session.component("R2").unwrap();
        assert_ne!(r1, r2);
        assert_eq!(session.board().get_component(r1).unwrap().custom_value(), None);
        assert_eq!(session.board().get_component(r2).unwrap().custom_value(), Some(2000.0));
    }

    #[test]
    fn test_undo_route_after_undone_net_delete() {
        let mut session = Session::default();
        session
            .run_script("place R1 r1k at 0,0\nplace R2 r1k at 6,0\nroute R1.2 R2.1\ndelete-net N001\nundo\nundo")
            .unwrap();

        assert!(session.board().nets().is_empty());
        assert!(session.board().traces().is_empty());
        session.board().verify_consistency().unwrap();

        session.run_script("redo\nredo\nundo").unwrap();
        assert_eq!(session.board().nets().len(), 1);
        assert_eq!(session.board().nets()[0].name(), "N001");
    }

    #[test]
    fn test_fail_on_drc() {
        let config = SessionConfig {
            fail_on_drc: true,
            ..SessionConfig::default()
        };
        let mut session = Session::new(config);
        session.run_script("place R1 r1k at 0,0").unwrap();

        assert_eq!(session.check().unconnected_count(), 2);
        assert!(session.finish().is_err());
    }

    #[test]
    fn test_history_capacity_bounds_label_versions() {
        let config = SessionConfig {
            history_capacity: 1,
            ..SessionConfig::default()
        };
        let mut session = Session::new(config);
        session
            .run_script("place R1 r1k at 0,0\nplace R2 r1k at 6,0\nundo\nundo")
            .unwrap();

        assert_eq!(session.board().components().len(), 1);
        assert!(session.component("R1").is_some());
        assert!(session.component("R2").is_none());
    }

    #[test]
    fn test_render_formats() {
        let mut session = Session::default();
        session.run_script(DIVIDER).unwrap();
        let report = session.finish().unwrap();

        let spice = Session::render_netlist(&report.netlist, &OutputFormat::Spice).unwrap();
        assert!(spice.starts_with("Divider\n"));
        assert!(spice.ends_with(".end\n"));

        let json = Session::render_netlist(&report.netlist, &OutputFormat::Json).unwrap();
        let parsed: Netlist = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report.netlist);
    }
}
