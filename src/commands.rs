use log::{debug, warn};
use std::rc::Rc;

use crate::board::{
    BoardState, ComponentId, NetId, NetSnapshot, PinDefinition, PinReference, TraceId, GROUND_NET_NAME,
};
use crate::definitions::{ComponentKind, DefinitionProvider};
use crate::geometry::{manhattan_segments, GridPosition, Rotation};

/// An executable, reversible unit of board mutation.
///
/// Commands that target an id which no longer exists do nothing, and their
/// `undo` does nothing either. `undo` without a prior `execute` is a no-op.
///
/// Undo re-creates entities under fresh ids, so a command that already ran
/// once finds its targets again by position or net membership rather than
/// trusting the ids it captured.
pub trait Command {
    fn execute(&mut self, board: &mut BoardState);
    fn undo(&mut self, board: &mut BoardState);
    fn description(&self) -> String;
}

pub type Segment = (GridPosition, GridPosition);

/// Definition lookup shared by commands that need to know component kinds
pub type SharedDefinitions = Rc<dyn DefinitionProvider>;

/// Live id of a component a command touched before, if it still exists
fn locate_component(board: &BoardState, id: ComponentId, last_known: Option<GridPosition>) -> Option<ComponentId> {
    match last_known {
        Some(position) => board.resolve_component(id, position),
        None => board.get_component(id).map(|c| c.id()),
    }
}

pub struct PlaceComponentCommand {
    definition_id: String,
    position: GridPosition,
    rotation: Rotation,
    pins: Vec<PinDefinition>,
    custom_value: Option<f64>,
    is_fixed: bool,
    placed: Option<ComponentId>,
}

impl PlaceComponentCommand {
    pub fn new(definition_id: &str, position: GridPosition, rotation: Rotation, pins: Vec<PinDefinition>) -> Self {
        PlaceComponentCommand {
            definition_id: definition_id.to_string(),
            position,
            rotation,
            pins,
            custom_value: None,
            is_fixed: false,
            placed: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.custom_value = Some(value);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.is_fixed = true;
        self
    }

    /// Instance created by the most recent execute
    pub fn placed(&self) -> Option<ComponentId> {
        self.placed
    }
}

impl Command for PlaceComponentCommand {
    fn execute(&mut self, board: &mut BoardState) {
        let id = board.place_component(
            &self.definition_id,
            self.position,
            self.rotation,
            &self.pins,
            self.custom_value,
            self.is_fixed,
        );
        self.placed = Some(id);
    }

    fn undo(&mut self, board: &mut BoardState) {
        let Some(placed) = self.placed.take() else {
            return;
        };
        match board.resolve_component(placed, self.position) {
            Some(id) => {
                board.remove_component(id, true);
            }
            None => warn!("Undo place skipped: nothing left at {}", self.position),
        }
    }

    fn description(&self) -> String {
        format!("Place {} at {}", self.definition_id, self.position)
    }
}

#[derive(Debug, Clone)]
struct RemovedComponent {
    definition_id: String,
    position: GridPosition,
    rotation: Rotation,
    pins: Vec<(PinDefinition, Option<String>)>,
    custom_value: Option<f64>,
    is_fixed: bool,
    /// Nets whose only pins belonged to the removed component
    dying_nets: Vec<NetSnapshot>,
}

pub struct RemoveComponentCommand {
    target: ComponentId,
    allow_fixed: bool,
    last_position: Option<GridPosition>,
    captured: Option<RemovedComponent>,
}

impl RemoveComponentCommand {
    pub fn new(target: ComponentId) -> Self {
        RemoveComponentCommand {
            target,
            allow_fixed: false,
            last_position: None,
            captured: None,
        }
    }

    /// Variant allowed to remove fixed components
    pub fn privileged(target: ComponentId) -> Self {
        RemoveComponentCommand {
            allow_fixed: true,
            ..Self::new(target)
        }
    }

    /// Current id of the target; changes when undo re-places it
    pub fn target(&self) -> ComponentId {
        self.target
    }
}

impl Command for RemoveComponentCommand {
    fn execute(&mut self, board: &mut BoardState) {
        let Some(component) =
            locate_component(board, self.target, self.last_position).and_then(|id| board.get_component(id))
        else {
            warn!("Remove skipped: component {} no longer exists", self.target);
            return;
        };
        let target = component.id();

        if component.is_fixed() && !self.allow_fixed {
            debug!("Remove skipped: component {} is fixed", target);
            return;
        }

        let mut pins = Vec::new();
        let mut dying_nets: Vec<NetSnapshot> = Vec::new();
        let mut seen: Vec<NetId> = Vec::new();

        for pin in component.pins() {
            let net = pin.connected_net().and_then(|id| board.get_net(id));
            pins.push((pin.definition(), net.map(|n| n.name().to_string())));

            if let Some(net) = net {
                if seen.contains(&net.id()) {
                    continue;
                }
                seen.push(net.id());
                if net.pins().iter().all(|p| p.component == target) {
                    if let Some(snapshot) = board.snapshot_net(net.id()) {
                        dying_nets.push(snapshot);
                    }
                }
            }
        }

        let captured = RemovedComponent {
            definition_id: component.definition_id().to_string(),
            position: component.position(),
            rotation: component.rotation(),
            pins,
            custom_value: component.custom_value(),
            is_fixed: component.is_fixed(),
            dying_nets,
        };

        if board.remove_component(target, self.allow_fixed) {
            self.target = target;
            self.last_position = Some(captured.position);
            self.captured = Some(captured);
        }
    }

    fn undo(&mut self, board: &mut BoardState) {
        let Some(captured) = self.captured.take() else {
            return;
        };

        let definitions: Vec<PinDefinition> = captured.pins.iter().map(|(p, _)| p.clone()).collect();
        let id = board.place_component(
            &captured.definition_id,
            captured.position,
            captured.rotation,
            &definitions,
            captured.custom_value,
            captured.is_fixed,
        );

        for (pin, net_name) in &captured.pins {
            let Some(name) = net_name else {
                continue;
            };
            let net = match board.get_net_by_name(name) {
                Some(net) => net.id(),
                None => board.create_net(name),
            };
            if let Some(reference) = board.pin_reference(id, pin.index) {
                if let Err(e) = board.connect_pin_to_net(net, &reference) {
                    warn!("Could not reconnect pin {} to '{}': {}", reference, name, e);
                }
            }
        }

        for snapshot in &captured.dying_nets {
            let Some(net) = board.get_net_by_name(&snapshot.name).map(|n| n.id()) else {
                continue;
            };
            for &(start, end) in &snapshot.traces {
                if let Err(e) = board.add_trace(net, start, end) {
                    warn!("Could not restore trace on '{}': {}", snapshot.name, e);
                }
            }
        }

        self.target = id;
    }

    fn description(&self) -> String {
        format!("Remove component {}", self.target)
    }
}

pub struct MoveComponentCommand {
    target: ComponentId,
    position: GridPosition,
    rotation: Rotation,
    allow_fixed: bool,
    /// Where the target sat before the last execute
    origin: Option<GridPosition>,
    previous: Option<(GridPosition, Rotation)>,
}

impl MoveComponentCommand {
    pub fn new(target: ComponentId, position: GridPosition, rotation: Rotation) -> Self {
        MoveComponentCommand {
            target,
            position,
            rotation,
            allow_fixed: false,
            origin: None,
            previous: None,
        }
    }

    /// Variant allowed to relocate fixed components
    pub fn privileged(target: ComponentId, position: GridPosition, rotation: Rotation) -> Self {
        MoveComponentCommand {
            allow_fixed: true,
            ..Self::new(target, position, rotation)
        }
    }
}

impl Command for MoveComponentCommand {
    fn execute(&mut self, board: &mut BoardState) {
        let Some(component) =
            locate_component(board, self.target, self.origin).and_then(|id| board.get_component(id))
        else {
            warn!("Move skipped: component {} no longer exists", self.target);
            return;
        };
        let target = component.id();
        let previous = (component.position(), component.rotation());

        match board.move_component(target, self.position, self.rotation, self.allow_fixed) {
            Ok(()) => {
                self.target = target;
                self.origin = Some(previous.0);
                self.previous = Some(previous);
            }
            Err(e) => debug!("Move skipped: {}", e),
        }
    }

    fn undo(&mut self, board: &mut BoardState) {
        let Some((position, rotation)) = self.previous.take() else {
            return;
        };
        let Some(target) = board.resolve_component(self.target, self.position) else {
            warn!("Undo move skipped: nothing left at {}", self.position);
            return;
        };
        self.target = target;
        if let Err(e) = board.move_component(target, position, rotation, true) {
            warn!("Undo move failed: {}", e);
        }
    }

    fn description(&self) -> String {
        format!("Move component {} to {}", self.target, self.position)
    }
}

pub struct SetComponentValueCommand {
    target: ComponentId,
    value: Option<f64>,
    last_position: Option<GridPosition>,
    previous: Option<Option<f64>>,
}

impl SetComponentValueCommand {
    pub fn new(target: ComponentId, value: Option<f64>) -> Self {
        SetComponentValueCommand {
            target,
            value,
            last_position: None,
            previous: None,
        }
    }
}

impl Command for SetComponentValueCommand {
    fn execute(&mut self, board: &mut BoardState) {
        let Some(target) = locate_component(board, self.target, self.last_position) else {
            warn!("Set value skipped: component {} no longer exists", self.target);
            return;
        };
        match board.set_custom_value(target, self.value) {
            Ok(previous) => {
                self.target = target;
                self.last_position = board.get_component(target).map(|c| c.position());
                self.previous = Some(previous);
            }
            Err(e) => warn!("Set value skipped: {}", e),
        }
    }

    fn undo(&mut self, board: &mut BoardState) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        match locate_component(board, self.target, self.last_position) {
            Some(target) => {
                self.target = target;
                let _ = board.set_custom_value(target, previous);
            }
            None => warn!("Undo set value skipped: component {} no longer exists", self.target),
        }
    }

    fn description(&self) -> String {
        match self.value {
            Some(value) => format!("Set value of component {} to {}", self.target, value),
            None => format!("Clear value of component {}", self.target),
        }
    }
}

/// Runs children in order and undoes them in reverse
pub struct BatchCommand {
    description: String,
    commands: Vec<Box<dyn Command>>,
    executed: bool,
}

impl BatchCommand {
    pub fn new(description: &str, commands: Vec<Box<dyn Command>>) -> Self {
        BatchCommand {
            description: description.to_string(),
            commands,
            executed: false,
        }
    }
}

impl Command for BatchCommand {
    fn execute(&mut self, board: &mut BoardState) {
        for command in self.commands.iter_mut() {
            command.execute(board);
        }
        self.executed = true;
    }

    fn undo(&mut self, board: &mut BoardState) {
        if !self.executed {
            return;
        }
        for command in self.commands.iter_mut().rev() {
            command.undo(board);
        }
        self.executed = false;
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

pub struct DeleteTraceNetCommand {
    target: NetId,
    /// Net as it looked at the last execute, kept to find it again on redo
    last_known: Option<NetSnapshot>,
    captured: Option<NetSnapshot>,
}

impl DeleteTraceNetCommand {
    pub fn new(target: NetId) -> Self {
        DeleteTraceNetCommand {
            target,
            last_known: None,
            captured: None,
        }
    }

    /// Current id of the target; changes when undo recreates the net
    pub fn target(&self) -> NetId {
        self.target
    }
}

impl Command for DeleteTraceNetCommand {
    fn execute(&mut self, board: &mut BoardState) {
        let target = match &self.last_known {
            Some(snapshot) => board.resolve_net(self.target, snapshot),
            None => board.get_net(self.target).map(|n| n.id()),
        };
        let Some((target, snapshot)) = target.and_then(|id| Some((id, board.snapshot_net(id)?))) else {
            warn!("Delete net skipped: net {} no longer exists", self.target);
            return;
        };
        self.target = target;

        let traces: Vec<TraceId> = board.traces_for_net(target).map(|t| t.id()).collect();
        for trace in traces {
            let _ = board.remove_trace(trace);
        }

        // A net without traces only dies once its pins are gone
        if board.get_net(target).is_some() {
            for pin in &snapshot.pins {
                let _ = board.disconnect_pin(pin);
            }
        }

        self.last_known = Some(snapshot.clone());
        self.captured = Some(snapshot);
    }

    fn undo(&mut self, board: &mut BoardState) {
        if let Some(snapshot) = self.captured.take() {
            self.target = board.recreate_net(&snapshot);
        }
    }

    fn description(&self) -> String {
        format!("Delete net {}", self.target)
    }
}

/// How a route related its two endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Neither side was on a net; a new net was created
    CreatedNet,
    /// One side was on a net and the other joined it
    ExtendedNet,
    /// Both sides were already on the same net
    SameNet,
    /// The sides were on different nets which were merged
    MergedNets,
}

#[derive(Debug, Clone, Copy)]
enum RouteEndpoint {
    Pin(PinReference),
    Net(NetId),
}

/// What a route changed, keyed by geometry and pin position so undo still
/// finds it after later commands were undone under fresh ids
#[derive(Debug, Clone)]
struct RouteRecord {
    outcome: RouteOutcome,
    net_name: String,
    /// Pin endpoints; whichever net holds them is the routed net
    anchors: Vec<PinReference>,
    added_segments: Vec<Segment>,
    new_pins: Vec<PinReference>,
    /// Nets that existed before the route and kept existing after it
    prior_nets: Vec<(NetId, NetSnapshot)>,
    absorbed: Option<(NetId, NetSnapshot)>,
}

fn is_ground_pin(board: &BoardState, definitions: &dyn DefinitionProvider, pin: &PinReference) -> bool {
    board
        .get_component(pin.component)
        .and_then(|c| definitions.get_definition(c.definition_id()))
        .map(|d| d.kind == ComponentKind::Ground)
        .unwrap_or(false)
}

fn endpoint_net(board: &BoardState, endpoint: &RouteEndpoint) -> Option<Option<NetId>> {
    match endpoint {
        RouteEndpoint::Pin(pin) => {
            let component = board.get_component(pin.component)?;
            Some(component.pin(pin.pin_index)?.connected_net())
        }
        RouteEndpoint::Net(net) => board.get_net(*net).map(|n| Some(n.id())),
    }
}

/// Traces on `net` matching each segment, newest first, each claimed once
fn claim_traces(board: &BoardState, net: NetId, segments: &[Segment], taken: &[TraceId]) -> Vec<TraceId> {
    let mut claimed: Vec<TraceId> = Vec::new();
    for segment in segments {
        let found = board
            .traces_for_net(net)
            .filter(|t| t.endpoints() == *segment)
            .map(|t| t.id())
            .filter(|id| !taken.contains(id) && !claimed.contains(id))
            .last();
        claimed.extend(found);
    }
    claimed
}

/// Connect two endpoints and lay the segments. A new net takes
/// `preferred_name` when no live net uses it. Returns `None` without
/// touching the board when an endpoint is stale or a segment is invalid.
fn route(
    board: &mut BoardState,
    definitions: &dyn DefinitionProvider,
    first: RouteEndpoint,
    second: RouteEndpoint,
    segments: &[Segment],
    preferred_name: Option<&str>,
) -> Option<RouteRecord> {
    let first_net = endpoint_net(board, &first)?;
    let second_net = endpoint_net(board, &second)?;

    if let Some((start, end)) = segments
        .iter()
        .find(|(start, end)| start == end || !start.is_axis_aligned_with(end))
    {
        warn!("Route skipped: segment {} -> {} is not Manhattan", start, end);
        return None;
    }

    let pin_of = |endpoint: &RouteEndpoint| match endpoint {
        RouteEndpoint::Pin(pin) => Some(*pin),
        RouteEndpoint::Net(_) => None,
    };
    let anchors: Vec<PinReference> = [pin_of(&first), pin_of(&second)].into_iter().flatten().collect();

    let mut prior_nets = Vec::new();
    let mut new_pins = Vec::new();
    let mut absorbed = None;

    let (outcome, net) = match (first_net, second_net) {
        (None, None) => {
            let grounded = anchors.iter().any(|p| is_ground_pin(board, definitions, p));
            let name = match preferred_name {
                _ if grounded => GROUND_NET_NAME.to_string(),
                Some(name) if board.get_net_by_name(name).is_none() => name.to_string(),
                _ => board.next_auto_net_name(),
            };
            let net = board.create_net(&name);
            for pin in &anchors {
                if board.connect_pin_to_net(net, pin).is_ok() {
                    new_pins.push(*pin);
                }
            }
            (RouteOutcome::CreatedNet, net)
        }
        (Some(net), None) | (None, Some(net)) => {
            let joining = if first_net.is_none() { pin_of(&first) } else { pin_of(&second) };
            if let Some(snapshot) = board.snapshot_net(net) {
                prior_nets.push((net, snapshot));
            }
            if let Some(pin) = joining {
                if board.connect_pin_to_net(net, &pin).is_ok() {
                    new_pins.push(pin);
                }
            }
            (RouteOutcome::ExtendedNet, net)
        }
        (Some(a), Some(b)) if a == b => {
            if let Some(snapshot) = board.snapshot_net(a) {
                prior_nets.push((a, snapshot));
            }
            (RouteOutcome::SameNet, a)
        }
        (Some(a), Some(b)) => {
            let a_ground = board.get_net(a).map(|n| n.is_ground()).unwrap_or(false);
            let b_ground = board.get_net(b).map(|n| n.is_ground()).unwrap_or(false);
            let (survivor, loser) = if b_ground && !a_ground { (b, a) } else { (a, b) };

            let survivor_snapshot = board.snapshot_net(survivor)?;
            let loser_snapshot = board.snapshot_net(loser)?;
            if let Err(e) = board.merge_nets(survivor, loser) {
                warn!("Route skipped: {}", e);
                return None;
            }
            debug!("Merged net '{}' into '{}'", loser_snapshot.name, survivor_snapshot.name);
            prior_nets.push((survivor, survivor_snapshot));
            absorbed = Some((loser, loser_snapshot));
            (RouteOutcome::MergedNets, survivor)
        }
    };

    let mut added_segments = Vec::new();
    for &(start, end) in segments {
        match board.add_trace(net, start, end) {
            Ok(_) => added_segments.push((start, end)),
            Err(e) => warn!("Trace {} -> {} not added: {}", start, end, e),
        }
    }

    let net_name = board.get_net(net).map(|n| n.name().to_string()).unwrap_or_default();

    Some(RouteRecord {
        outcome,
        net_name,
        anchors,
        added_segments,
        new_pins,
        prior_nets,
        absorbed,
    })
}

/// Reverse a route. The routed net is found again through the anchor pins
/// and its traces by geometry. Nets torn down along the way are rebuilt from
/// their snapshots under fresh ids; returns (old id, new id) for each.
fn unroute(board: &mut BoardState, record: RouteRecord) -> Vec<(NetId, NetId)> {
    let mut remapped = Vec::new();

    let routed = record
        .anchors
        .iter()
        .filter_map(|p| board.resolve_pin(p))
        .find_map(|p| board.net_of_pin(p.component, p.pin_index));
    let Some(net) = routed else {
        warn!("Undo route skipped: the routed net no longer exists");
        return remapped;
    };

    let added = claim_traces(board, net, &record.added_segments, &[]);

    if let Some((old_id, snapshot)) = &record.absorbed {
        let restored = board.create_net(&snapshot.name);

        for trace in claim_traces(board, net, &snapshot.traces, &added) {
            let _ = board.move_trace(trace, restored);
        }

        let returning: Vec<PinReference> = snapshot.pins.iter().filter_map(|p| board.resolve_pin(p)).collect();
        for pin in returning {
            if board.net_of_pin(pin.component, pin.pin_index) == Some(net) {
                let _ = board.disconnect_pin(&pin);
                if let Err(e) = board.connect_pin_to_net(restored, &pin) {
                    warn!("Could not return pin {} to '{}': {}", pin, snapshot.name, e);
                }
            }
        }

        if board.get_net(restored).map(|n| n.pin_count()) == Some(0) {
            warn!("Split of '{}' found none of its pins", snapshot.name);
            board.retire_net(restored);
        } else {
            remapped.push((*old_id, restored));
        }
    }

    for trace in added {
        let _ = board.remove_trace(trace);
    }

    if matches!(record.outcome, RouteOutcome::CreatedNet | RouteOutcome::ExtendedNet) {
        let joined: Vec<PinReference> = record.new_pins.iter().filter_map(|p| board.resolve_pin(p)).collect();
        for pin in joined {
            if board.net_of_pin(pin.component, pin.pin_index) == Some(net) {
                let _ = board.disconnect_pin(&pin);
            }
        }
    }

    for (old_id, snapshot) in &record.prior_nets {
        let pins: Vec<PinReference> = snapshot.pins.iter().filter_map(|p| board.resolve_pin(p)).collect();
        let any_alive = pins
            .iter()
            .any(|p| board.net_of_pin(p.component, p.pin_index).is_some());

        if !any_alive && !pins.is_empty() {
            debug!("Rebuilding net '{}' torn down by undo", snapshot.name);
            let restored = board.recreate_net(snapshot);
            remapped.push((*old_id, restored));
        }
    }

    remapped
}

/// Connects two pins with a run of trace segments
pub struct RouteTraceCommand {
    definitions: SharedDefinitions,
    start: PinReference,
    end: PinReference,
    segments: Vec<Segment>,
    /// Name of the net created by the first execute, reused on redo
    created_name: Option<String>,
    record: Option<RouteRecord>,
}

impl RouteTraceCommand {
    pub fn new(definitions: SharedDefinitions, start: PinReference, end: PinReference, segments: Vec<Segment>) -> Self {
        RouteTraceCommand {
            definitions,
            start,
            end,
            segments,
            created_name: None,
            record: None,
        }
    }

    /// Route from pin to pin through the given waypoints, inserting elbows
    pub fn through(
        definitions: SharedDefinitions,
        start: PinReference,
        end: PinReference,
        vias: &[GridPosition],
    ) -> Self {
        let mut points = vec![start.position];
        points.extend_from_slice(vias);
        points.push(end.position);
        Self::new(definitions, start, end, manhattan_segments(&points))
    }

    /// Path taken by the most recent execute
    pub fn outcome(&self) -> Option<RouteOutcome> {
        self.record.as_ref().map(|r| r.outcome)
    }
}

impl Command for RouteTraceCommand {
    fn execute(&mut self, board: &mut BoardState) {
        let (Some(start), Some(end)) = (board.resolve_pin(&self.start), board.resolve_pin(&self.end)) else {
            warn!("Route skipped: pin {} or {} no longer exists", self.start, self.end);
            return;
        };
        if start.is_same_pin(&end) {
            warn!("Route skipped: start and end are the same pin {}", start);
            return;
        }
        self.start = start;
        self.end = end;
        self.record = route(
            board,
            self.definitions.as_ref(),
            RouteEndpoint::Pin(start),
            RouteEndpoint::Pin(end),
            &self.segments,
            self.created_name.as_deref(),
        );
        if let Some(record) = self.record.as_ref().filter(|r| r.outcome == RouteOutcome::CreatedNet) {
            self.created_name = Some(record.net_name.clone());
        }
    }

    fn undo(&mut self, board: &mut BoardState) {
        if let Some(record) = self.record.take() {
            unroute(board, record);
        }
    }

    fn description(&self) -> String {
        format!("Route trace {} -> {}", self.start, self.end)
    }
}

/// Joins a loose pin to a point on an existing net's trace
pub struct RouteTraceToNetPointCommand {
    definitions: SharedDefinitions,
    pin: PinReference,
    net: NetId,
    junction: GridPosition,
    segments: Vec<Segment>,
    has_run: bool,
    record: Option<RouteRecord>,
}

impl RouteTraceToNetPointCommand {
    pub fn new(
        definitions: SharedDefinitions,
        pin: PinReference,
        net: NetId,
        junction: GridPosition,
        segments: Vec<Segment>,
    ) -> Self {
        RouteTraceToNetPointCommand {
            definitions,
            pin,
            net,
            junction,
            segments,
            has_run: false,
            record: None,
        }
    }

    /// Route from the pin through the waypoints to the junction
    pub fn through(
        definitions: SharedDefinitions,
        pin: PinReference,
        net: NetId,
        junction: GridPosition,
        vias: &[GridPosition],
    ) -> Self {
        let mut points = vec![pin.position];
        points.extend_from_slice(vias);
        points.push(junction);
        Self::new(definitions, pin, net, junction, manhattan_segments(&points))
    }

    pub fn outcome(&self) -> Option<RouteOutcome> {
        self.record.as_ref().map(|r| r.outcome)
    }

    /// Current id of the target net; changes when undo rebuilds it
    pub fn target_net(&self) -> NetId {
        self.net
    }
}

impl Command for RouteTraceToNetPointCommand {
    fn execute(&mut self, board: &mut BoardState) {
        // On redo the net may have been rebuilt by another undo; find it at the junction
        let target = match board.get_net(self.net) {
            Some(net) => Some(net.id()),
            None if self.has_run => board.net_at(self.junction),
            None => None,
        };
        let Some(net) = target.and_then(|id| board.get_net(id)) else {
            warn!("Junction route skipped: net {} no longer exists", self.net);
            return;
        };
        let target = net.id();

        let on_net = board.traces_for_net(target).any(|t| t.contains(self.junction))
            || net.pins().iter().any(|p| p.position == self.junction);
        if !on_net {
            warn!("Junction route skipped: {} is not on net '{}'", self.junction, net.name());
            return;
        }

        let Some(pin) = board.resolve_pin(&self.pin) else {
            warn!("Junction route skipped: pin {} no longer exists", self.pin);
            return;
        };

        self.net = target;
        self.pin = pin;
        self.has_run = true;
        self.record = route(
            board,
            self.definitions.as_ref(),
            RouteEndpoint::Net(target),
            RouteEndpoint::Pin(pin),
            &self.segments,
            None,
        );
    }

    fn undo(&mut self, board: &mut BoardState) {
        let Some(record) = self.record.take() else {
            return;
        };
        for (old_id, new_id) in unroute(board, record) {
            if old_id == self.net {
                self.net = new_id;
            }
        }
    }

    fn description(&self) -> String {
        format!("Route trace {} -> net {} at {}", self.pin, self.net, self.junction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::DefinitionLibrary;
    use crate::history::CommandHistory;

    /// Names, members and trace geometry, independent of ids
    #[derive(Debug, PartialEq)]
    struct Observed {
        components: Vec<(String, GridPosition, Rotation, Vec<Option<String>>)>,
        nets: Vec<(String, Vec<GridPosition>)>,
        traces: Vec<(String, Segment)>,
    }

    fn observe(board: &BoardState) -> Observed {
        let net_name = |id: Option<NetId>| id.and_then(|id| board.get_net(id)).map(|n| n.name().to_string());

        let mut components: Vec<_> = board
            .components()
            .iter()
            .map(|c| {
                (
                    c.definition_id().to_string(),
                    c.position(),
                    c.rotation(),
                    c.pins().iter().map(|p| net_name(p.connected_net())).collect(),
                )
            })
            .collect();
        components.sort_by_key(|c| (c.1.x, c.1.y));

        let mut nets: Vec<_> = board
            .nets()
            .iter()
            .map(|n| {
                let mut pins: Vec<GridPosition> = n.pins().iter().map(|p| p.position).collect();
                pins.sort();
                (n.name().to_string(), pins)
            })
            .collect();
        nets.sort();

        let mut traces: Vec<_> = board
            .traces()
            .iter()
            .map(|t| (net_name(Some(t.net())).unwrap_or_default(), t.endpoints()))
            .collect();
        traces.sort();

        Observed { components, nets, traces }
    }

    fn library() -> SharedDefinitions {
        Rc::new(DefinitionLibrary::builtin())
    }

    fn place(board: &mut BoardState, def: &str, x: i32, y: i32) -> ComponentId {
        let library = DefinitionLibrary::builtin();
        let pins = library.get_definition(def).unwrap().pins.clone();
        board.place_component(def, GridPosition::new(x, y), Rotation::Deg0, &pins, None, false)
    }

    fn pin(board: &BoardState, component: ComponentId, index: usize) -> PinReference {
        board.pin_reference(component, index).unwrap()
    }

    fn connect_named(board: &mut BoardState, name: &str, component: ComponentId, index: usize) -> NetId {
        let net = match board.get_net_by_name(name) {
            Some(net) => net.id(),
            None => board.create_net(name),
        };
        let reference = pin(board, component, index);
        board.connect_pin_to_net(net, &reference).unwrap();
        net
    }

    fn assert_round_trip(board: &mut BoardState, command: &mut dyn Command) {
        let before = observe(board);
        command.execute(board);
        board.verify_consistency().unwrap();
        command.undo(board);
        board.verify_consistency().unwrap();
        assert_eq!(observe(board), before, "round trip of '{}'", command.description());
    }

    /// Execute through the history, remembering how the board looked before
    fn record(board: &mut BoardState, history: &mut CommandHistory, seen: &mut Vec<Observed>, command: Box<dyn Command>) {
        seen.push(observe(board));
        history.execute_command(board, command);
        board.verify_consistency().unwrap();
    }

    /// Undo everything, checking each step against the board before that
    /// command, then redo it all and land on the same final board
    fn assert_unwinds(board: &mut BoardState, history: &mut CommandHistory, seen: &[Observed]) {
        let done = observe(board);

        for expected in seen.iter().rev() {
            assert!(history.undo(board));
            board.verify_consistency().unwrap();
            assert_eq!(&observe(board), expected);
        }

        for step in 1..=seen.len() {
            assert!(history.redo(board));
            board.verify_consistency().unwrap();
            let expected = seen.get(step).unwrap_or(&done);
            assert_eq!(&observe(board), expected, "after redo {}", step);
        }
    }

    #[test]
    fn test_place_round_trip() {
        let mut board = BoardState::new();
        let pins = DefinitionLibrary::builtin().get_definition("r1k").unwrap().pins.clone();
        let mut command = PlaceComponentCommand::new("r1k", GridPosition::new(1, 1), Rotation::Deg90, pins).with_value(220.0);

        command.execute(&mut board);
        let placed = command.placed().unwrap();
        assert_eq!(board.get_component(placed).unwrap().custom_value(), Some(220.0));

        command.undo(&mut board);
        assert!(board.components().is_empty());
    }

    #[test]
    fn test_undo_without_execute_is_noop() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let net = connect_named(&mut board, "A", r1, 1);
        let before = observe(&board);

        let mut commands: Vec<Box<dyn Command>> = vec![
            Box::new(PlaceComponentCommand::new("r1k", GridPosition::new(9, 9), Rotation::Deg0, Vec::new())),
            Box::new(RemoveComponentCommand::new(r1)),
            Box::new(MoveComponentCommand::new(r1, GridPosition::new(3, 3), Rotation::Deg0)),
            Box::new(SetComponentValueCommand::new(r1, Some(5.0))),
            Box::new(DeleteTraceNetCommand::new(net)),
            Box::new(RouteTraceCommand::new(library.clone(), pin(&board, r1, 0), pin(&board, r2, 0), Vec::new())),
            Box::new(RouteTraceToNetPointCommand::new(
                library.clone(),
                pin(&board, r2, 1),
                net,
                GridPosition::new(1, 0),
                Vec::new(),
            )),
            Box::new(BatchCommand::new("batch", vec![Box::new(RemoveComponentCommand::new(r2))])),
        ];

        for command in commands.iter_mut() {
            command.undo(&mut board);
        }
        assert_eq!(observe(&board), before);
    }

    #[test]
    fn test_stale_ids_are_noops() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let stale_pin = pin(&board, r1, 0);
        let gone = connect_named(&mut board, "GONE", r2, 1);
        board.disconnect_pin(&pin(&board, r2, 1)).unwrap();
        let net = connect_named(&mut board, "A", r2, 0);
        assert!(board.remove_component(r1, false));
        let before = observe(&board);

        let mut commands: Vec<Box<dyn Command>> = vec![
            Box::new(RemoveComponentCommand::new(r1)),
            Box::new(RouteTraceCommand::new(library, stale_pin, pin(&board, r2, 1), Vec::new())),
            Box::new(DeleteTraceNetCommand::new(gone)),
            Box::new(SetComponentValueCommand::new(r1, Some(1.0))),
        ];

        for command in commands.iter_mut() {
            command.execute(&mut board);
            assert_eq!(observe(&board), before);
            command.undo(&mut board);
            assert_eq!(observe(&board), before);
        }
        assert!(board.get_net(net).is_some());
    }

    #[test]
    fn test_remove_round_trip_restores_nets_and_traces() {
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let shared = connect_named(&mut board, "SHARED", r1, 1);
        connect_named(&mut board, "SHARED", r2, 0);
        let lonely = connect_named(&mut board, "LONELY", r1, 0);
        board.add_trace(lonely, GridPosition::new(-1, 0), GridPosition::new(-1, 4)).unwrap();
        board.add_trace(shared, GridPosition::new(1, 0), GridPosition::new(5, 0)).unwrap();

        let mut command = RemoveComponentCommand::new(r1);
        command.execute(&mut board);
        assert!(board.get_net_by_name("LONELY").is_none());
        assert!(board.get_net_by_name("SHARED").is_some());
        command.undo(&mut board);

        assert!(command.target() > r2);
        let mut command = RemoveComponentCommand::new(command.target());
        assert_round_trip(&mut board, &mut command);
    }

    #[test]
    fn test_remove_fixed_component_is_noop_without_privilege() {
        let mut board = BoardState::new();
        let pins = DefinitionLibrary::builtin().get_definition("v5").unwrap().pins.clone();
        let v = board.place_component("v5", GridPosition::new(0, 0), Rotation::Deg0, &pins, None, true);

        let mut command = RemoveComponentCommand::new(v);
        command.execute(&mut board);
        assert!(board.get_component(v).is_some());
        command.undo(&mut board);
        assert_eq!(board.components().len(), 1);

        let mut privileged = RemoveComponentCommand::privileged(v);
        privileged.execute(&mut board);
        assert!(board.components().is_empty());
        privileged.undo(&mut board);
        assert!(board.components()[0].is_fixed());
    }

    #[test]
    fn test_route_creates_net() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 2);
        let before = observe(&board);

        let mut command = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        command.execute(&mut board);

        assert_eq!(command.outcome(), Some(RouteOutcome::CreatedNet));
        assert_eq!(board.nets().len(), 1);
        assert_eq!(board.nets()[0].pin_count(), 2);
        assert_eq!(board.traces().len(), 2);
        board.verify_consistency().unwrap();

        command.undo(&mut board);
        assert!(board.nets().is_empty());
        assert_eq!(observe(&board), before);
    }

    #[test]
    fn test_route_to_ground_pin_names_net_zero() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let gnd = place(&mut board, "ground", 1, 3);

        let mut command = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, gnd, 0), &[]);
        command.execute(&mut board);

        assert_eq!(board.nets()[0].name(), GROUND_NET_NAME);
        assert!(board.nets()[0].is_ground());
    }

    #[test]
    fn test_route_extends_existing_net() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        connect_named(&mut board, "A", r1, 1);

        let mut command = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        assert_round_trip(&mut board, &mut command);

        command.execute(&mut board);
        assert_eq!(command.outcome(), Some(RouteOutcome::ExtendedNet));
        assert_eq!(board.get_net_by_name("A").unwrap().pin_count(), 2);

        command.undo(&mut board);
        let restored = board.get_net_by_name("A").unwrap();
        assert_eq!(restored.pins(), &[pin(&board, r1, 1)]);
        assert_eq!(board.net_of_pin(r2, 0), None);
    }

    #[test]
    fn test_route_extension_keeps_net_with_other_traces() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let net = connect_named(&mut board, "A", r1, 1);
        board.add_trace(net, GridPosition::new(1, 0), GridPosition::new(1, -3)).unwrap();

        let mut command = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        command.execute(&mut board);
        command.undo(&mut board);

        assert_eq!(board.get_net(net).map(|n| n.pin_count()), Some(1));
        assert_eq!(board.traces().len(), 1);
    }

    #[test]
    fn test_route_same_net_only_adds_segments() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let net = connect_named(&mut board, "A", r1, 1);
        connect_named(&mut board, "A", r2, 0);

        let mut command = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        command.execute(&mut board);
        assert_eq!(command.outcome(), Some(RouteOutcome::SameNet));
        assert_eq!(board.nets().len(), 1);
        assert_eq!(board.traces_for_net(net).count(), 1);

        command.undo(&mut board);
        assert_eq!(board.nets().len(), 1);
        assert_eq!(board.get_net_by_name("A").unwrap().pin_count(), 2);
        assert!(board.traces().is_empty());
    }

    #[test]
    fn test_route_merges_two_nets_and_undo_splits() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        connect_named(&mut board, "NET_A", r1, 1);
        connect_named(&mut board, "NET_B", r2, 0);
        let before = observe(&board);

        let mut command = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        command.execute(&mut board);

        assert_eq!(command.outcome(), Some(RouteOutcome::MergedNets));
        assert_eq!(board.nets().len(), 1);
        assert_eq!(board.nets()[0].name(), "NET_A");
        board.verify_consistency().unwrap();

        command.undo(&mut board);
        assert_eq!(board.nets().len(), 2);
        assert!(board.get_net_by_name("NET_A").is_some());
        assert!(board.get_net_by_name("NET_B").is_some());
        assert_eq!(observe(&board), before);
    }

    #[test]
    fn test_merge_prefers_ground_and_restores_traces() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let r3 = place(&mut board, "r1k", 6, 6);
        let a = connect_named(&mut board, "SIG", r1, 1);
        let g = connect_named(&mut board, GROUND_NET_NAME, r2, 0);
        connect_named(&mut board, GROUND_NET_NAME, r3, 0);
        board.add_trace(a, GridPosition::new(1, 0), GridPosition::new(1, -2)).unwrap();
        board.add_trace(g, GridPosition::new(5, 0), GridPosition::new(5, 6)).unwrap();
        let before = observe(&board);

        let mut command = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        command.execute(&mut board);

        assert_eq!(board.nets().len(), 1);
        assert_eq!(board.nets()[0].id(), g);
        assert_eq!(board.nets()[0].pin_count(), 3);
        assert_eq!(board.traces().len(), 3);

        command.undo(&mut board);
        assert_eq!(observe(&board), before);
        board.verify_consistency().unwrap();
    }

    #[test]
    fn test_route_rejects_diagonal_segments() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 3);
        let diagonal = vec![(GridPosition::new(1, 0), GridPosition::new(5, 3))];

        let mut command = RouteTraceCommand::new(library, pin(&board, r1, 1), pin(&board, r2, 0), diagonal);
        command.execute(&mut board);

        assert!(command.outcome().is_none());
        assert!(board.nets().is_empty());
    }

    #[test]
    fn test_delete_trace_net_round_trip() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 4);
        let mut route = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        route.execute(&mut board);
        let net = board.nets()[0].id();

        let mut command = DeleteTraceNetCommand::new(net);
        command.execute(&mut board);
        assert!(board.nets().is_empty());
        assert!(board.traces().is_empty());
        assert_eq!(board.net_of_pin(r1, 1), None);

        command.undo(&mut board);
        assert!(command.target() > net);
        assert_eq!(board.traces().len(), 2);
        assert_eq!(board.get_net(command.target()).unwrap().pin_count(), 2);

        let mut again = DeleteTraceNetCommand::new(command.target());
        assert_round_trip(&mut board, &mut again);
    }

    #[test]
    fn test_delete_net_without_traces() {
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let net = connect_named(&mut board, "A", r1, 0);

        let mut command = DeleteTraceNetCommand::new(net);
        command.execute(&mut board);
        assert!(board.nets().is_empty());

        command.undo(&mut board);
        assert_eq!(board.get_net_by_name("A").unwrap().pin_count(), 1);
    }

    #[test]
    fn test_route_to_net_point() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 8, 0);
        let r3 = place(&mut board, "r1k", 4, 4);
        let mut route = RouteTraceCommand::through(library.clone(), pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        route.execute(&mut board);
        let net = board.nets()[0].id();
        let before = observe(&board);

        let junction = GridPosition::new(4, 0);
        let mut tap = RouteTraceToNetPointCommand::through(library.clone(), pin(&board, r3, 0), net, junction, &[]);
        tap.execute(&mut board);

        assert_eq!(tap.outcome(), Some(RouteOutcome::ExtendedNet));
        assert_eq!(board.get_net(net).unwrap().pin_count(), 3);

        tap.undo(&mut board);
        assert_eq!(observe(&board), before);

        let mut off_net = RouteTraceToNetPointCommand::through(library, pin(&board, r3, 0), net, GridPosition::new(4, 2), &[]);
        off_net.execute(&mut board);
        assert!(off_net.outcome().is_none());
    }

    #[test]
    fn test_route_to_net_point_merge_retargets_after_undo() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 8, 0);
        let r3 = place(&mut board, "r1k", 4, 4);
        let mut route = RouteTraceCommand::through(library.clone(), pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        route.execute(&mut board);
        let target = board.nets()[0].id();
        let ground = connect_named(&mut board, GROUND_NET_NAME, r3, 0);
        let before = observe(&board);

        let mut tap = RouteTraceToNetPointCommand::through(library, pin(&board, r3, 0), target, GridPosition::new(4, 0), &[]);
        tap.execute(&mut board);
        assert_eq!(tap.outcome(), Some(RouteOutcome::MergedNets));
        assert_eq!(board.nets().len(), 1);
        assert_eq!(board.nets()[0].id(), ground);

        tap.undo(&mut board);
        assert_eq!(observe(&board), before);
        assert!(board.get_net(tap.target_net()).is_some());

        tap.execute(&mut board);
        assert_eq!(tap.outcome(), Some(RouteOutcome::MergedNets));
    }

    #[test]
    fn test_move_and_value_round_trip() {
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        connect_named(&mut board, "A", r1, 0);

        let mut moved = MoveComponentCommand::new(r1, GridPosition::new(4, 4), Rotation::Deg180);
        assert_round_trip(&mut board, &mut moved);

        let mut value = SetComponentValueCommand::new(r1, Some(330.0));
        value.execute(&mut board);
        assert_eq!(board.get_component(r1).unwrap().custom_value(), Some(330.0));
        value.undo(&mut board);
        assert_eq!(board.get_component(r1).unwrap().custom_value(), None);
    }

    #[test]
    fn test_batch_undoes_in_reverse() {
        let library = library();
        let mut board = BoardState::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let before = observe(&board);

        let route = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        let mut batch = BatchCommand::new(
            "route and move",
            vec![
                Box::new(route),
                Box::new(MoveComponentCommand::new(r2, GridPosition::new(6, 5), Rotation::Deg0)),
            ],
        );

        batch.execute(&mut board);
        assert_eq!(board.nets().len(), 1);
        batch.undo(&mut board);
        assert_eq!(observe(&board), before);
    }

    #[test]
    fn test_history_route_then_delete_net() {
        let library = library();
        let mut board = BoardState::new();
        let mut history = CommandHistory::default();
        let mut seen = Vec::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);

        let route = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        record(&mut board, &mut history, &mut seen, Box::new(route));
        let net = board.net_of_pin(r1, 1).unwrap();
        record(&mut board, &mut history, &mut seen, Box::new(DeleteTraceNetCommand::new(net)));
        assert!(board.nets().is_empty());

        history.undo(&mut board);
        history.undo(&mut board);
        assert!(board.nets().is_empty());
        assert!(board.traces().is_empty());
        assert_eq!(board.net_of_pin(r1, 1), None);

        history.redo(&mut board);
        history.redo(&mut board);
        assert_unwinds(&mut board, &mut history, &seen);
    }

    #[test]
    fn test_history_route_then_remove_component() {
        let library = library();
        let mut board = BoardState::new();
        let mut history = CommandHistory::default();
        let mut seen = Vec::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);

        let route = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[GridPosition::new(1, 3)]);
        record(&mut board, &mut history, &mut seen, Box::new(route));
        record(&mut board, &mut history, &mut seen, Box::new(RemoveComponentCommand::new(r1)));
        assert_eq!(board.components().len(), 1);

        assert_unwinds(&mut board, &mut history, &seen);
        assert_eq!(board.nets()[0].name(), "N001");
    }

    #[test]
    fn test_history_merge_then_delete_net() {
        let library = library();
        let mut board = BoardState::new();
        let mut history = CommandHistory::default();
        let mut seen = Vec::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 6, 0);
        let a = connect_named(&mut board, "NET_A", r1, 1);
        let b = connect_named(&mut board, "NET_B", r2, 0);
        board.add_trace(a, GridPosition::new(1, 0), GridPosition::new(1, -3)).unwrap();
        board.add_trace(b, GridPosition::new(5, 0), GridPosition::new(5, -3)).unwrap();
        let before = observe(&board);

        let route = RouteTraceCommand::through(library, pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        record(&mut board, &mut history, &mut seen, Box::new(route));
        let merged = board.net_of_pin(r1, 1).unwrap();
        record(&mut board, &mut history, &mut seen, Box::new(DeleteTraceNetCommand::new(merged)));

        history.undo(&mut board);
        history.undo(&mut board);
        board.verify_consistency().unwrap();
        assert_eq!(observe(&board), before);
        assert_eq!(board.get_net_by_name("NET_A").unwrap().pin_count(), 1);
        assert_eq!(board.get_net_by_name("NET_B").unwrap().pin_count(), 1);
        assert_eq!(board.traces().len(), 2);

        history.redo(&mut board);
        history.redo(&mut board);
        assert_unwinds(&mut board, &mut history, &seen);
    }

    #[test]
    fn test_history_junction_after_route_undo() {
        let library = library();
        let mut board = BoardState::new();
        let mut history = CommandHistory::default();
        let mut seen = Vec::new();
        let r1 = place(&mut board, "r1k", 0, 0);
        let r2 = place(&mut board, "r1k", 8, 0);
        let r3 = place(&mut board, "r1k", 4, 4);

        let route = RouteTraceCommand::through(library.clone(), pin(&board, r1, 1), pin(&board, r2, 0), &[]);
        record(&mut board, &mut history, &mut seen, Box::new(route));
        let net = board.net_of_pin(r1, 1).unwrap();
        let tap = RouteTraceToNetPointCommand::through(library, pin(&board, r3, 0), net, GridPosition::new(4, 0), &[]);
        record(&mut board, &mut history, &mut seen, Box::new(tap));
        assert_eq!(board.get_net(net).unwrap().pin_count(), 3);

        assert_unwinds(&mut board, &mut history, &seen);
        assert_eq!(board.nets().len(), 1);
        assert_eq!(board.nets()[0].pin_count(), 3);
    }

    #[test]
    fn test_history_component_edits_follow_replaced_instance() {
        let mut board = BoardState::new();
        let mut history = CommandHistory::default();
        let mut seen = Vec::new();
        let pins = DefinitionLibrary::builtin().get_definition("r1k").unwrap().pins.clone();

        let placing = PlaceComponentCommand::new("r1k", GridPosition::new(0, 0), Rotation::Deg0, pins);
        record(&mut board, &mut history, &mut seen, Box::new(placing));
        let r1 = board.components()[0].id();

        let moving = MoveComponentCommand::new(r1, GridPosition::new(4, 4), Rotation::Deg90);
        record(&mut board, &mut history, &mut seen, Box::new(moving));
        record(&mut board, &mut history, &mut seen, Box::new(SetComponentValueCommand::new(r1, Some(470.0))));
        record(&mut board, &mut history, &mut seen, Box::new(RemoveComponentCommand::new(r1)));
        assert!(board.components().is_empty());

        for _ in 0..3 {
            history.undo(&mut board);
        }
        let restored = &board.components()[0];
        assert_eq!(restored.position(), GridPosition::new(0, 0));
        assert_eq!(restored.custom_value(), None);

        for _ in 0..3 {
            history.redo(&mut board);
        }
        assert!(board.components().is_empty());
        assert_unwinds(&mut board, &mut history, &seen);
    }
}
