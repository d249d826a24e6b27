//! Per-function control-flow state.
//!
//! A frame is pushed for every block, every `if` arm, every loop body, and
//! every `switch` case body (`do` shares its enclosing frame because the
//! body executes at least once). Frames carry reachability flags, the
//! labels `break`/`continue` target, and locals scoped to the frame,
//! including virtual constant-folded locals that never get a slot.

use std::collections::HashMap;

use crate::module::ConstValue;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowFlags(u8);

impl FlowFlags {
    pub const NONE: FlowFlags = FlowFlags(0);
    pub const RETURNS: FlowFlags = FlowFlags(1 << 0);
    pub const POSSIBLY_BREAKS: FlowFlags = FlowFlags(1 << 1);
    pub const POSSIBLY_CONTINUES: FlowFlags = FlowFlags(1 << 2);
    pub const POSSIBLY_THROWS: FlowFlags = FlowFlags(1 << 3);

    pub fn with(self, other: FlowFlags) -> FlowFlags {
        FlowFlags(self.0 | other.0)
    }

    pub fn has(self, other: FlowFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Only the POSSIBLY_* bits, for propagating out of a branch that may
    /// not execute.
    pub fn possibly(self) -> FlowFlags {
        FlowFlags(self.0 & !Self::RETURNS.0)
    }
}

/// A local visible in some lexical scope. Virtual locals (`index: None`)
/// exist only as cached constants and expand inline at every read.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedLocal {
    pub index: Option<u32>,
    pub ty: Type,
    pub constant: Option<ConstValue>,
    pub is_const: bool,
}

#[derive(Debug, Default)]
pub struct FlowFrame {
    pub flags: FlowFlags,
    pub break_label: Option<String>,
    pub continue_label: Option<String>,
    pub scoped_locals: HashMap<String, ScopedLocal>,
}

#[derive(Debug)]
pub struct Flow {
    frames: Vec<FlowFrame>,
}

impl Flow {
    pub fn new() -> Flow {
        Flow {
            frames: vec![FlowFrame::default()],
        }
    }

    /// Enter a block, branch arm, or case body.
    pub fn enter_branch_or_scope(&mut self) {
        self.frames.push(FlowFrame::default());
    }

    /// Enter a loop body, binding the labels `break`/`continue` target.
    pub fn enter_loop(&mut self, break_label: String, continue_label: String) {
        self.frames.push(FlowFrame {
            break_label: Some(break_label),
            continue_label: Some(continue_label),
            ..FlowFrame::default()
        });
    }

    /// Enter a switch case body: breakable but not continuable on its own.
    pub fn enter_breakable(&mut self, break_label: String) {
        self.frames.push(FlowFrame {
            break_label: Some(break_label),
            ..FlowFrame::default()
        });
    }

    /// Leave the innermost frame, returning it for flag propagation.
    pub fn leave_branch_or_scope(&mut self) -> FlowFrame {
        debug_assert!(self.frames.len() > 1, "cannot leave the root frame");
        self.frames.pop().unwrap_or_default()
    }

    pub fn set(&mut self, flags: FlowFlags) {
        let top = self.frames.last_mut().expect("flow has a root frame");
        top.flags = top.flags.with(flags);
    }

    pub fn is_set(&self, flags: FlowFlags) -> bool {
        self.frames
            .last()
            .map(|f| f.flags.has(flags))
            .unwrap_or(false)
    }

    /// Nearest enclosing break label, if any loop or switch encloses us.
    pub fn break_label(&self) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.break_label.as_deref())
    }

    pub fn continue_label(&self) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.continue_label.as_deref())
    }

    /// Declare a local in the innermost scope. Duplicates within the same
    /// scope are rejected.
    pub fn add_scoped_local(&mut self, name: &str, local: ScopedLocal) -> Result<(), ()> {
        let top = self.frames.last_mut().expect("flow has a root frame");
        if top.scoped_locals.contains_key(name) {
            return Err(());
        }
        top.scoped_locals.insert(name.to_string(), local);
        Ok(())
    }

    pub fn lookup_local(&self, name: &str) -> Option<&ScopedLocal> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.scoped_locals.get(name))
    }
}
