use log::debug;
use std::collections::VecDeque;

use crate::board::BoardState;
use crate::commands::Command;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Notifications sent to history subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    Executed(String),
    Undone(String),
    Redone(String),
    /// Sent after every change to either stack
    HistoryChanged { undo_count: usize, redo_count: usize },
}

pub type HistoryListener = Box<dyn FnMut(&HistoryEvent)>;

/// Bounded undo/redo stacks of executed commands.
///
/// When the undo stack grows past its capacity the oldest entry is
/// discarded; it can no longer be undone.
pub struct CommandHistory {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    max_capacity: usize,
    listeners: Vec<HistoryListener>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommandHistory {
    /// A capacity of zero is treated as one
    pub fn new(max_capacity: usize) -> Self {
        CommandHistory {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_capacity: max_capacity.max(1),
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: HistoryListener) {
        self.listeners.push(listener);
    }

    pub fn execute_command(&mut self, board: &mut BoardState, mut command: Box<dyn Command>) {
        command.execute(board);
        let description = command.description();
        debug!("Executed: {}", description);

        self.undo_stack.push_back(command);
        self.redo_stack.clear();

        while self.undo_stack.len() > self.max_capacity {
            if let Some(evicted) = self.undo_stack.pop_front() {
                debug!("History full, dropping '{}'", evicted.description());
            }
        }

        self.notify(HistoryEvent::Executed(description));
        self.notify_changed();
    }

    /// Undo the most recent command; false when there is nothing to undo
    pub fn undo(&mut self, board: &mut BoardState) -> bool {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return false;
        };

        command.undo(board);
        let description = command.description();
        debug!("Undone: {}", description);
        self.redo_stack.push(command);

        self.notify(HistoryEvent::Undone(description));
        self.notify_changed();
        true
    }

    /// Re-execute the most recently undone command
    pub fn redo(&mut self, board: &mut BoardState) -> bool {
        let Some(mut command) = self.redo_stack.pop() else {
            return false;
        };

        command.execute(board);
        let description = command.description();
        debug!("Redone: {}", description);
        self.undo_stack.push_back(command);

        self.notify(HistoryEvent::Redone(description));
        self.notify_changed();
        true
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.notify_changed();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.last().map(|c| c.description())
    }

    fn notify(&mut self, event: HistoryEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    fn notify_changed(&mut self) {
        let event = HistoryEvent::HistoryChanged {
            undo_count: self.undo_stack.len(),
            redo_count: self.redo_stack.len(),
        };
        self.notify(event);
    }
}
