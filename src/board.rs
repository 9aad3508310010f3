use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BoardError, BoardResult};
use crate::geometry::{BoardBounds, GridPosition, Rotation};

/// Net name that marks the reference/ground net
pub const GROUND_NET_NAME: &str = "0";

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            pub fn value(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(
    /// Placed component instance id; never reused within a session
    ComponentId
);
opaque_id!(
    /// Net id; never reused within a session
    NetId
);
opaque_id!(TraceId);

/// Identifies one pin instance at a point in time.
///
/// Equality includes the cached position, so a reference taken before a
/// component moved no longer compares equal to a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinReference {
    pub component: ComponentId,
    pub pin_index: usize,
    pub position: GridPosition,
}

impl PinReference {
    pub fn new(component: ComponentId, pin_index: usize, position: GridPosition) -> Self {
        PinReference {
            component,
            pin_index,
            position,
        }
    }

    /// Same pin, regardless of the cached position
    pub fn is_same_pin(&self, other: &PinReference) -> bool {
        self.component == other.component && self.pin_index == other.pin_index
    }
}

impl fmt::Display for PinReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.component, self.pin_index, self.position)
    }
}

/// Pin layout entry used when placing a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinDefinition {
    pub index: usize,
    pub name: String,
    pub offset: GridPosition,
}

impl PinDefinition {
    pub fn new(index: usize, name: &str, offset: GridPosition) -> Self {
        PinDefinition {
            index,
            name: name.to_string(),
            offset,
        }
    }
}

/// One connection point on a placed component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinInstance {
    pub index: usize,
    pub name: String,
    pub offset: GridPosition,
    connected_net: Option<NetId>,
}

impl PinInstance {
    fn from_definition(definition: &PinDefinition) -> Self {
        PinInstance {
            index: definition.index,
            name: definition.name.clone(),
            offset: definition.offset,
            connected_net: None,
        }
    }

    pub fn connected_net(&self) -> Option<NetId> {
        self.connected_net
    }

    pub fn is_connected(&self) -> bool {
        self.connected_net.is_some()
    }

    pub fn definition(&self) -> PinDefinition {
        PinDefinition {
            index: self.index,
            name: self.name.clone(),
            offset: self.offset,
        }
    }
}

/// A named, electrically common group of pin connections
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Net {
    id: NetId,
    name: String,
    pins: Vec<PinReference>,
}

impl Net {
    pub fn id(&self) -> NetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attached pins in the order they were connected
    pub fn pins(&self) -> &[PinReference] {
        &self.pins
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn is_ground(&self) -> bool {
        is_ground_name(&self.name)
    }

    pub fn contains_pin(&self, component: ComponentId, pin_index: usize) -> bool {
        self.pins
            .iter()
            .any(|p| p.component == component && p.pin_index == pin_index)
    }
}

pub fn is_ground_name(name: &str) -> bool {
    name == GROUND_NET_NAME || name.eq_ignore_ascii_case("gnd") || name.eq_ignore_ascii_case("ground")
}

/// Axis-aligned wire between two grid points, owned by one net
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSegment {
    id: TraceId,
    net: NetId,
    start: GridPosition,
    end: GridPosition,
}

impl TraceSegment {
    fn new(id: TraceId, net: NetId, start: GridPosition, end: GridPosition) -> BoardResult<Self> {
        if start == end || !start.is_axis_aligned_with(&end) {
            return Err(BoardError::InvalidTrace { start, end });
        }
        Ok(TraceSegment { id, net, start, end })
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn net(&self) -> NetId {
        self.net
    }

    pub fn start(&self) -> GridPosition {
        self.start
    }

    pub fn end(&self) -> GridPosition {
        self.end
    }

    pub fn length(&self) -> u32 {
        self.start.manhattan_distance(&self.end)
    }

    /// True when `point` lies on the segment, endpoints included
    pub fn contains(&self, point: GridPosition) -> bool {
        let (lo_x, hi_x) = (self.start.x.min(self.end.x), self.start.x.max(self.end.x));
        let (lo_y, hi_y) = (self.start.y.min(self.end.y), self.start.y.max(self.end.y));
        point.x >= lo_x && point.x <= hi_x && point.y >= lo_y && point.y <= hi_y
    }

    /// Geometry only; used to re-derive traces after ids have changed
    pub fn endpoints(&self) -> (GridPosition, GridPosition) {
        (self.start, self.end)
    }
}

/// An instance of a component definition positioned on the board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedComponent {
    id: ComponentId,
    definition_id: String,
    position: GridPosition,
    rotation: Rotation,
    pins: Vec<PinInstance>,
    is_fixed: bool,
    custom_value: Option<f64>,
}

impl PlacedComponent {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn position(&self) -> GridPosition {
        self.position
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn pins(&self) -> &[PinInstance] {
        &self.pins
    }

    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    pub fn custom_value(&self) -> Option<f64> {
        self.custom_value
    }

    pub fn pin(&self, index: usize) -> Option<&PinInstance> {
        self.pins.iter().find(|p| p.index == index)
    }

    fn pin_mut(&mut self, index: usize) -> Option<&mut PinInstance> {
        self.pins.iter_mut().find(|p| p.index == index)
    }

    /// Absolute board position of a pin, taking rotation into account
    pub fn pin_position(&self, index: usize) -> Option<GridPosition> {
        self.pin(index)
            .map(|pin| self.position + self.rotation.apply(pin.offset))
    }

    pub fn pin_reference(&self, index: usize) -> Option<PinReference> {
        self.pin_position(index)
            .map(|position| PinReference::new(self.id, index, position))
    }

    /// Pins sorted by pin index
    pub fn pins_in_index_order(&self) -> Vec<&PinInstance> {
        let mut pins: Vec<&PinInstance> = self.pins.iter().collect();
        pins.sort_by_key(|p| p.index);
        pins
    }

    /// Origin cell plus every pin cell
    pub fn occupies(&self, position: GridPosition) -> bool {
        self.position == position
            || self
                .pins
                .iter()
                .any(|pin| self.position + self.rotation.apply(pin.offset) == position)
    }
}

/// Change notifications recorded by `BoardState`
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    ComponentPlaced(ComponentId),
    ComponentRemoved(ComponentId),
    ComponentMoved(ComponentId),
    NetCreated(NetId),
    NetRemoved(NetId),
    /// The two most recently attached pins of a net that now has two or more
    PinsConnected {
        net: NetId,
        previous: PinReference,
        latest: PinReference,
    },
    PinDisconnected {
        net: NetId,
        pin: PinReference,
    },
    TraceAdded(TraceId),
    TraceRemoved(TraceId),
}

/// Everything needed to rebuild a net after it has been torn down
#[derive(Debug, Clone, PartialEq)]
pub struct NetSnapshot {
    pub name: String,
    pub pins: Vec<PinReference>,
    pub traces: Vec<(GridPosition, GridPosition)>,
}

/// Aggregate root owning every component, net and trace on the board
#[derive(Debug, Clone)]
pub struct BoardState {
    components: Vec<PlacedComponent>,
    nets: Vec<Net>,
    traces: Vec<TraceSegment>,
    next_component_id: u32,
    next_net_id: u32,
    next_trace_id: u32,
    bounds: BoardBounds,
    events: Vec<BoardEvent>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardState {
    pub fn new() -> Self {
        Self::with_bounds(BoardBounds::default())
    }

    pub fn with_bounds(bounds: BoardBounds) -> Self {
        BoardState {
            components: Vec::new(),
            nets: Vec::new(),
            traces: Vec::new(),
            next_component_id: 1,
            next_net_id: 1,
            next_trace_id: 1,
            bounds,
            events: Vec::new(),
        }
    }

    /// Place a component. The bounds are advisory, any position is accepted.
    pub fn place_component(
        &mut self,
        definition_id: &str,
        position: GridPosition,
        rotation: Rotation,
        pins: &[PinDefinition],
        custom_value: Option<f64>,
        is_fixed: bool,
    ) -> ComponentId {
        let id = ComponentId(self.next_component_id);
        self.next_component_id += 1;

        if !self.bounds.contains(position) {
            debug!("Component {} placed outside advisory bounds at {}", id, position);
        }

        self.components.push(PlacedComponent {
            id,
            definition_id: definition_id.to_string(),
            position,
            rotation,
            pins: pins.iter().map(PinInstance::from_definition).collect(),
            is_fixed,
            custom_value,
        });

        debug!("Placed component {} ({}) at {}", id, definition_id, position);
        self.events.push(BoardEvent::ComponentPlaced(id));
        id
    }

    /// Remove a component and every connection it held.
    ///
    /// Returns false when the component does not exist or is fixed and
    /// `allow_fixed` is not set.
    pub fn remove_component(&mut self, id: ComponentId, allow_fixed: bool) -> bool {
        let Some(component) = self.get_component(id) else {
            return false;
        };

        if component.is_fixed && !allow_fixed {
            debug!("Refusing to remove fixed component {}", id);
            return false;
        }

        let connected: Vec<usize> = component
            .pins
            .iter()
            .filter(|p| p.connected_net.is_some())
            .map(|p| p.index)
            .collect();

        for pin_index in connected {
            self.detach_pin(id, pin_index);
        }

        self.components.retain(|c| c.id != id);
        debug!("Removed component {}", id);
        self.events.push(BoardEvent::ComponentRemoved(id));
        true
    }

    /// Relocate and/or rotate a component, refreshing cached pin positions
    pub fn move_component(
        &mut self,
        id: ComponentId,
        position: GridPosition,
        rotation: Rotation,
        allow_fixed: bool,
    ) -> BoardResult<()> {
        let component = self
            .component_mut(id)
            .ok_or(BoardError::ComponentNotFound(id))?;

        if component.is_fixed && !allow_fixed {
            return Err(BoardError::ComponentFixed(id));
        }

        component.position = position;
        component.rotation = rotation;

        let refreshed: Vec<(NetId, PinReference)> = component
            .pins
            .iter()
            .filter_map(|pin| {
                let net = pin.connected_net?;
                let at = position + rotation.apply(pin.offset);
                Some((net, PinReference::new(id, pin.index, at)))
            })
            .collect();

        for (net_id, reference) in refreshed {
            if let Some(net) = self.net_mut(net_id) {
                for pin in net.pins.iter_mut().filter(|p| p.is_same_pin(&reference)) {
                    *pin = reference;
                }
            }
        }

        debug!("Moved component {} to {} ({} deg)", id, position, rotation.degrees());
        self.events.push(BoardEvent::ComponentMoved(id));
        Ok(())
    }

    /// Override (or clear) the nominal value; returns the previous override
    pub fn set_custom_value(&mut self, id: ComponentId, value: Option<f64>) -> BoardResult<Option<f64>> {
        let component = self
            .component_mut(id)
            .ok_or(BoardError::ComponentNotFound(id))?;
        Ok(std::mem::replace(&mut component.custom_value, value))
    }

    /// Create an empty net. Names are not required to be unique.
    pub fn create_net(&mut self, name: &str) -> NetId {
        let id = NetId(self.next_net_id);
        self.next_net_id += 1;

        self.nets.push(Net {
            id,
            name: name.to_string(),
            pins: Vec::new(),
        });

        debug!("Created net {} '{}'", id, name);
        self.events.push(BoardEvent::NetCreated(id));
        id
    }

    /// Attach a pin to a net.
    ///
    /// The stored reference always carries the pin's current position, the
    /// position inside `pin` is only a hint.
    pub fn connect_pin_to_net(&mut self, net_id: NetId, pin: &PinReference) -> BoardResult<()> {
        if self.get_net(net_id).is_none() {
            return Err(BoardError::NetNotFound(net_id));
        }

        let component = self
            .get_component(pin.component)
            .ok_or(BoardError::ComponentNotFound(pin.component))?;
        let reference = component
            .pin_reference(pin.pin_index)
            .ok_or(BoardError::PinNotFound {
                component: pin.component,
                pin_index: pin.pin_index,
            })?;

        match component.pin(pin.pin_index).and_then(|p| p.connected_net) {
            Some(existing) if existing == net_id => return Ok(()),
            Some(existing) => {
                return Err(BoardError::PinAlreadyConnected {
                    component: pin.component,
                    pin_index: pin.pin_index,
                    net: existing,
                })
            }
            None => {}
        }

        if let Some(instance) = self
            .component_mut(pin.component)
            .and_then(|c| c.pin_mut(pin.pin_index))
        {
            instance.connected_net = Some(net_id);
        }

        let net = self.net_mut(net_id).ok_or(BoardError::NetNotFound(net_id))?;
        net.pins.push(reference);
        debug!("Connected pin {} to net {} '{}'", reference, net_id, net.name);

        if net.pins.len() >= 2 {
            let previous = net.pins[net.pins.len() - 2];
            let latest = net.pins[net.pins.len() - 1];
            self.events.push(BoardEvent::PinsConnected {
                net: net_id,
                previous,
                latest,
            });
        }

        Ok(())
    }

    /// Detach a pin from its net; returns the net it left, if any.
    ///
    /// A net that loses its last pin is removed together with its traces.
    pub fn disconnect_pin(&mut self, pin: &PinReference) -> BoardResult<Option<NetId>> {
        let component = self
            .get_component(pin.component)
            .ok_or(BoardError::ComponentNotFound(pin.component))?;
        if component.pin(pin.pin_index).is_none() {
            return Err(BoardError::PinNotFound {
                component: pin.component,
                pin_index: pin.pin_index,
            });
        }

        Ok(self.detach_pin(pin.component, pin.pin_index))
    }

    /// Move every pin and trace of `absorbed` onto `survivor`, then discard
    /// `absorbed`.
    pub fn merge_nets(&mut self, survivor: NetId, absorbed: NetId) -> BoardResult<()> {
        if survivor == absorbed {
            return Ok(());
        }
        if self.get_net(survivor).is_none() {
            return Err(BoardError::NetNotFound(survivor));
        }
        let index = self
            .net_index(absorbed)
            .ok_or(BoardError::NetNotFound(absorbed))?;

        let absorbed_net = self.nets.remove(index);

        for trace in self.traces.iter_mut().filter(|t| t.net == absorbed) {
            trace.net = survivor;
        }

        for reference in &absorbed_net.pins {
            if let Some(pin) = self
                .component_mut(reference.component)
                .and_then(|c| c.pin_mut(reference.pin_index))
            {
                pin.connected_net = Some(survivor);
            }
        }

        if let Some(net) = self.net_mut(survivor) {
            net.pins.extend(absorbed_net.pins.iter().copied());
            debug!(
                "Merged net {} '{}' into net {} '{}'",
                absorbed, absorbed_net.name, survivor, net.name
            );
        }

        self.events.push(BoardEvent::NetRemoved(absorbed));
        Ok(())
    }

    /// Capture a net's name, pins and trace geometry
    pub fn snapshot_net(&self, id: NetId) -> Option<NetSnapshot> {
        let net = self.get_net(id)?;
        Some(NetSnapshot {
            name: net.name.clone(),
            pins: net.pins.clone(),
            traces: self.traces_for_net(id).map(|t| t.endpoints()).collect(),
        })
    }

    /// Rebuild a net from a snapshot under a fresh id.
    ///
    /// Pins are followed through `resolve_pin`. Pins that are gone, or that
    /// have since joined another net, are skipped. If no pin attaches, the
    /// net is retired again and the returned id is already stale.
    pub fn recreate_net(&mut self, snapshot: &NetSnapshot) -> NetId {
        let id = self.create_net(&snapshot.name);

        for pin in &snapshot.pins {
            let Some(reference) = self.resolve_pin(pin) else {
                warn!("Skipping pin {} while recreating net '{}': pin is gone", pin, snapshot.name);
                continue;
            };
            if let Err(e) = self.connect_pin_to_net(id, &reference) {
                warn!("Skipping pin {} while recreating net '{}': {}", pin, snapshot.name, e);
            }
        }

        if self.get_net(id).map(|n| n.pins.is_empty()).unwrap_or(true) {
            warn!("Net '{}' has no pins left to recreate", snapshot.name);
            self.retire_net(id);
            return id;
        }

        for &(start, end) in &snapshot.traces {
            if let Err(e) = self.add_trace(id, start, end) {
                warn!("Skipping trace while recreating net '{}': {}", snapshot.name, e);
            }
        }

        id
    }

    /// A fresh autogenerated net name not used by any live net
    pub fn next_auto_net_name(&self) -> String {
        let mut counter = self.next_net_id;
        loop {
            let candidate = format!("N{:03}", counter);
            if self.get_net_by_name(&candidate).is_none() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Add a Manhattan trace segment to a net
    pub fn add_trace(&mut self, net_id: NetId, start: GridPosition, end: GridPosition) -> BoardResult<TraceId> {
        if self.get_net(net_id).is_none() {
            return Err(BoardError::NetNotFound(net_id));
        }

        let id = TraceId(self.next_trace_id);
        let segment = TraceSegment::new(id, net_id, start, end)?;
        self.next_trace_id += 1;

        self.traces.push(segment);
        debug!("Added trace {} {} -> {} on net {}", id, start, end, net_id);
        self.events.push(BoardEvent::TraceAdded(id));
        Ok(id)
    }

    /// Remove a trace segment.
    ///
    /// Removing the last segment of a net tears the net down: its pins are
    /// disconnected and the net is removed.
    pub fn remove_trace(&mut self, id: TraceId) -> BoardResult<()> {
        let index = self
            .traces
            .iter()
            .position(|t| t.id == id)
            .ok_or(BoardError::TraceNotFound(id))?;

        let trace = self.traces.remove(index);
        self.events.push(BoardEvent::TraceRemoved(id));
        debug!("Removed trace {} from net {}", id, trace.net);

        if self.traces_for_net(trace.net).next().is_none() && self.get_net(trace.net).is_some() {
            debug!("Last trace of net {} removed, retiring net", trace.net);
            self.retire_net(trace.net);
        }

        Ok(())
    }

    /// Reassign a trace to another net without any cleanup cascade
    pub fn move_trace(&mut self, id: TraceId, net_id: NetId) -> BoardResult<()> {
        if self.get_net(net_id).is_none() {
            return Err(BoardError::NetNotFound(net_id));
        }
        let trace = self
            .traces
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(BoardError::TraceNotFound(id))?;
        trace.net = net_id;
        Ok(())
    }

    pub fn get_component(&self, id: ComponentId) -> Option<&PlacedComponent> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn get_net(&self, id: NetId) -> Option<&Net> {
        self.nets.iter().find(|n| n.id == id)
    }

    /// First net with this name, in insertion order
    pub fn get_net_by_name(&self, name: &str) -> Option<&Net> {
        self.nets.iter().find(|n| n.name == name)
    }

    pub fn get_trace(&self, id: TraceId) -> Option<&TraceSegment> {
        self.traces.iter().find(|t| t.id == id)
    }

    pub fn components(&self) -> &[PlacedComponent] {
        &self.components
    }

    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    pub fn traces(&self) -> &[TraceSegment] {
        &self.traces
    }

    pub fn traces_for_net(&self, id: NetId) -> impl Iterator<Item = &TraceSegment> + '_ {
        self.traces.iter().filter(move |t| t.net == id)
    }

    pub fn is_position_occupied(&self, position: GridPosition) -> bool {
        self.get_component_at(position).is_some()
    }

    /// Component whose origin is at `position`, else one with a pin there
    pub fn get_component_at(&self, position: GridPosition) -> Option<&PlacedComponent> {
        self.components
            .iter()
            .find(|c| c.position == position)
            .or_else(|| self.components.iter().find(|c| c.occupies(position)))
    }

    pub fn find_pin_at(&self, position: GridPosition) -> Option<PinReference> {
        self.components.iter().find_map(|c| {
            c.pins
                .iter()
                .filter_map(|p| c.pin_reference(p.index))
                .find(|r| r.position == position)
        })
    }

    /// Current reference for a pin that may belong to a re-created component.
    ///
    /// Undo re-places removed components under new ids, so a reference whose
    /// component is gone falls back to the pin with the same index sitting at
    /// the cached position.
    pub fn resolve_pin(&self, pin: &PinReference) -> Option<PinReference> {
        if let Some(reference) = self.pin_reference(pin.component, pin.pin_index) {
            return Some(reference);
        }
        self.components
            .iter()
            .filter_map(|c| c.pin_reference(pin.pin_index))
            .find(|r| r.position == pin.position)
    }

    /// Live id for a component, falling back to the one whose origin is at
    /// `last_known` when `id` has been retired
    pub fn resolve_component(&self, id: ComponentId, last_known: GridPosition) -> Option<ComponentId> {
        if self.get_component(id).is_some() {
            return Some(id);
        }
        self.components
            .iter()
            .find(|c| c.position == last_known)
            .map(|c| c.id)
    }

    /// Live id for a net, falling back to the net of the same name that now
    /// holds one of the snapshot's pins
    pub fn resolve_net(&self, id: NetId, last_known: &NetSnapshot) -> Option<NetId> {
        if self.get_net(id).is_some() {
            return Some(id);
        }
        last_known
            .pins
            .iter()
            .filter_map(|p| self.resolve_pin(p))
            .filter_map(|p| self.net_of_pin(p.component, p.pin_index))
            .find(|net| {
                self.get_net(*net)
                    .map(|n| n.name == last_known.name)
                    .unwrap_or(false)
            })
    }

    /// Net with a trace passing through `position`, else the net of the pin there
    pub fn net_at(&self, position: GridPosition) -> Option<NetId> {
        self.traces
            .iter()
            .find(|t| t.contains(position))
            .map(|t| t.net)
            .or_else(|| {
                let pin = self.find_pin_at(position)?;
                self.net_of_pin(pin.component, pin.pin_index)
            })
    }

    pub fn pin_reference(&self, component: ComponentId, pin_index: usize) -> Option<PinReference> {
        self.get_component(component)?.pin_reference(pin_index)
    }

    pub fn net_of_pin(&self, component: ComponentId, pin_index: usize) -> Option<NetId> {
        self.get_component(component)?.pin(pin_index)?.connected_net
    }

    pub fn bounds(&self) -> BoardBounds {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: BoardBounds) {
        self.bounds = bounds;
    }

    /// Smallest rectangle covering every component, pin and trace
    pub fn content_bounds(&self) -> Option<BoardBounds> {
        let mut points = self
            .components
            .iter()
            .flat_map(|c| {
                std::iter::once(c.position)
                    .chain(c.pins.iter().filter_map(move |p| c.pin_position(p.index)))
            })
            .chain(self.traces.iter().flat_map(|t| [t.start, t.end]));

        let first = points.next()?;
        let mut bounds = BoardBounds::around(first);
        for point in points {
            bounds.include(point);
        }
        Some(bounds)
    }

    pub fn events(&self) -> &[BoardEvent] {
        &self.events
    }

    /// Take every notification recorded since the last drain
    pub fn drain_events(&mut self) -> Vec<BoardEvent> {
        std::mem::take(&mut self.events)
    }

    /// Check pin/net bookkeeping; used by tests and debug tooling
    pub fn verify_consistency(&self) -> BoardResult<()> {
        for net in &self.nets {
            if net.pins.is_empty() && self.traces_for_net(net.id).next().is_some() {
                return Err(BoardError::Inconsistent(format!(
                    "net {} '{}' has traces but no pins",
                    net.id, net.name
                )));
            }
            for reference in &net.pins {
                if self.net_of_pin(reference.component, reference.pin_index) != Some(net.id) {
                    return Err(BoardError::Inconsistent(format!(
                        "net {} lists pin {} which points elsewhere",
                        net.id, reference
                    )));
                }
            }
        }

        for component in &self.components {
            for pin in &component.pins {
                if let Some(net_id) = pin.connected_net {
                    let listed = self
                        .get_net(net_id)
                        .map(|n| n.contains_pin(component.id, pin.index))
                        .unwrap_or(false);
                    if !listed {
                        return Err(BoardError::Inconsistent(format!(
                            "pin {}.{} points to net {} which does not list it",
                            component.id, pin.index, net_id
                        )));
                    }
                }
            }
        }

        for trace in &self.traces {
            if self.get_net(trace.net).is_none() {
                return Err(BoardError::Inconsistent(format!(
                    "trace {} belongs to missing net {}",
                    trace.id, trace.net
                )));
            }
        }

        Ok(())
    }

    fn component_mut(&mut self, id: ComponentId) -> Option<&mut PlacedComponent> {
        self.components.iter_mut().find(|c| c.id == id)
    }

    fn net_mut(&mut self, id: NetId) -> Option<&mut Net> {
        self.nets.iter_mut().find(|n| n.id == id)
    }

    fn net_index(&self, id: NetId) -> Option<usize> {
        self.nets.iter().position(|n| n.id == id)
    }

    fn detach_pin(&mut self, component: ComponentId, pin_index: usize) -> Option<NetId> {
        let comp = self.component_mut(component)?;
        let reference = comp.pin_reference(pin_index)?;
        let net_id = comp.pin_mut(pin_index)?.connected_net.take()?;

        let now_empty = match self.net_mut(net_id) {
            Some(net) => {
                net.pins
                    .retain(|p| !(p.component == component && p.pin_index == pin_index));
                net.pins.is_empty()
            }
            None => false,
        };

        self.events.push(BoardEvent::PinDisconnected {
            net: net_id,
            pin: reference,
        });

        if now_empty {
            debug!("Net {} has no pins left, retiring net", net_id);
            self.retire_net(net_id);
        }

        Some(net_id)
    }

    /// Net teardown shared by both death paths: last pin gone, last trace gone.
    /// Also used directly when undo leaves a rebuilt net without pins.
    pub fn retire_net(&mut self, id: NetId) -> Option<NetSnapshot> {
        let snapshot = self.snapshot_net(id)?;

        let removed: Vec<TraceId> = self.traces_for_net(id).map(|t| t.id).collect();
        self.traces.retain(|t| t.net != id);
        self.events
            .extend(removed.into_iter().map(BoardEvent::TraceRemoved));

        for reference in &snapshot.pins {
            let cleared = self
                .component_mut(reference.component)
                .and_then(|c| c.pin_mut(reference.pin_index))
                .filter(|pin| pin.connected_net == Some(id))
                .map(|pin| pin.connected_net = None)
                .is_some();
            if cleared {
                self.events.push(BoardEvent::PinDisconnected {
                    net: id,
                    pin: *reference,
                });
            }
        }

        if let Some(index) = self.net_index(id) {
            self.nets.remove(index);
        }
        self.events.push(BoardEvent::NetRemoved(id));
        debug!("Retired net {} '{}'", id, snapshot.name);

        Some(snapshot)
    }
}
