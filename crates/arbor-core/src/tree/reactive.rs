//! Versioned atoms and pull-validated computed cells
//!
//! Every observable slot is an atom with a version counter. A computed cell
//! remembers which atoms and cells it read (with the version it saw) and, on
//! its next read, re-runs only if one of them moved. A global epoch bumps on
//! every atom write, so a cell validated in the current epoch is returned
//! without walking its dependencies.
//!
//! A parametric cell computes for whatever arguments were written last, so
//! its version says nothing about the arguments a reader passed. A reader
//! therefore inherits the parametric cell's dependencies, minus the argument
//! atoms, instead of depending on the cell itself.

use std::rc::Rc;

use super::Tree;
use crate::errors::{ArborError, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AtomId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellId(usize);

pub(crate) type CellBody = Rc<dyn Fn(&Tree) -> Result<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dep {
    Atom(AtomId, u64),
    Arg(AtomId, u64),
    Cell(CellId, u64),
}

struct Cell {
    label: String,
    body: CellBody,
    value: Option<Value>,
    version: u64,
    deps: Vec<Dep>,
    validated_at: u64,
    computing: bool,
    parametric: bool,
}

#[derive(Default)]
pub(crate) struct Graph {
    atoms: Vec<u64>,
    cells: Vec<Option<Cell>>,
    tracking: Vec<Vec<Dep>>,
    epoch: u64,
}

impl Graph {
    pub fn new_atom(&mut self) -> AtomId {
        self.atoms.push(0);
        AtomId(self.atoms.len() - 1)
    }

    /// Record a write
    pub fn bump(&mut self, atom: AtomId) {
        if let Some(version) = self.atoms.get_mut(atom.0) {
            *version += 1;
        }
        self.epoch += 1;
    }

    /// Record a read against the innermost computation, if any
    pub fn observe(&mut self, atom: AtomId) {
        let version = self.atoms.get(atom.0).copied().unwrap_or(0);
        self.track(Dep::Atom(atom, version));
    }

    /// Record a read of an argument slot
    pub fn observe_arg(&mut self, atom: AtomId) {
        let version = self.atom_version(atom);
        self.track(Dep::Arg(atom, version));
    }

    fn track(&mut self, dep: Dep) {
        if let Some(frame) = self.tracking.last_mut() {
            if !frame.contains(&dep) {
                frame.push(dep);
            }
        }
    }

    pub fn new_cell(&mut self, label: String, body: CellBody) -> CellId {
        self.push_cell(label, body, false)
    }

    /// Cell whose body reads argument slots through [`Graph::observe_arg`]
    pub fn new_parametric_cell(&mut self, label: String, body: CellBody) -> CellId {
        self.push_cell(label, body, true)
    }

    fn push_cell(&mut self, label: String, body: CellBody, parametric: bool) -> CellId {
        self.cells.push(Some(Cell {
            label,
            body,
            value: None,
            version: 0,
            deps: Vec::new(),
            validated_at: 0,
            computing: false,
            parametric,
        }));
        CellId(self.cells.len() - 1)
    }

    pub fn drop_cell(&mut self, cell: CellId) {
        if let Some(slot) = self.cells.get_mut(cell.0) {
            *slot = None;
        }
    }

    fn cell(&self, id: CellId) -> Result<&Cell> {
        self.cells
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| ArborError::internal(format!("computed cell {} was dropped", id.0)))
    }

    fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id.0).and_then(Option::as_mut)
    }

    fn atom_version(&self, atom: AtomId) -> u64 {
        self.atoms.get(atom.0).copied().unwrap_or(0)
    }

    fn cell_version(&self, cell: CellId) -> Option<u64> {
        self.cells
            .get(cell.0)
            .and_then(Option::as_ref)
            .filter(|c| c.value.is_some())
            .map(|c| c.version)
    }
}

enum Freshness {
    Fresh,
    Recheck(Vec<Dep>),
    Stale,
}

impl Tree {
    /// Read a computed cell, re-deriving it if any dependency moved
    pub(crate) fn read_cell(&self, cell: CellId) -> Result<Value> {
        self.refresh_cell(cell)?;
        let mut state = self.state_mut();
        let (value, inherited) = {
            let c = state.graph.cell(cell)?;
            let value = c
                .value
                .clone()
                .ok_or_else(|| ArborError::internal("computed cell has no value after refresh"))?;
            let inherited = if c.parametric {
                c.deps
                    .iter()
                    .filter(|dep| !matches!(dep, Dep::Arg(..)))
                    .copied()
                    .collect()
            } else {
                vec![Dep::Cell(cell, c.version)]
            };
            (value, inherited)
        };
        for dep in inherited {
            state.graph.track(dep);
        }
        Ok(value)
    }

    fn refresh_cell(&self, cell: CellId) -> Result<()> {
        let freshness = {
            let state = self.state();
            let c = state.graph.cell(cell)?;
            if c.computing {
                return Err(ArborError::ViewCycle {
                    view: c.label.clone(),
                });
            }
            if c.value.is_none() {
                Freshness::Stale
            } else if c.validated_at == state.graph.epoch {
                Freshness::Fresh
            } else {
                Freshness::Recheck(c.deps.clone())
            }
        };

        let stale = match freshness {
            Freshness::Fresh => return Ok(()),
            Freshness::Stale => true,
            Freshness::Recheck(deps) => self.any_moved(&deps),
        };

        if stale {
            return self.recompute(cell);
        }
        let mut state = self.state_mut();
        let epoch = state.graph.epoch;
        if let Some(c) = state.graph.cell_mut(cell) {
            c.validated_at = epoch;
        }
        Ok(())
    }

    fn any_moved(&self, deps: &[Dep]) -> bool {
        deps.iter().any(|dep| match *dep {
            Dep::Atom(atom, seen) | Dep::Arg(atom, seen) => {
                self.state().graph.atom_version(atom) != seen
            }
            Dep::Cell(cell, seen) => {
                // A dependency that now fails forces the reader to re-run and
                // surface the error itself.
                self.refresh_cell(cell).is_err()
                    || self.state().graph.cell_version(cell) != Some(seen)
            }
        })
    }

    fn recompute(&self, cell: CellId) -> Result<()> {
        let body = {
            let mut state = self.state_mut();
            let c = state
                .graph
                .cell_mut(cell)
                .ok_or_else(|| ArborError::internal("computed cell was dropped"))?;
            c.computing = true;
            let body = c.body.clone();
            tracing::trace!(cell = %c.label, "recompute");
            state.graph.tracking.push(Vec::new());
            body
        };

        let result = body(self);

        let mut state = self.state_mut();
        let deps = state.graph.tracking.pop().unwrap_or_default();
        let epoch = state.graph.epoch;
        let Some(c) = state.graph.cell_mut(cell) else {
            return result.map(|_| ());
        };
        c.computing = false;
        match result {
            Ok(value) => {
                if c.value.as_ref() != Some(&value) {
                    c.version += 1;
                    c.value = Some(value);
                }
                c.deps = deps;
                c.validated_at = epoch;
                Ok(())
            }
            Err(e) => {
                // errors are never cached
                c.value = None;
                c.deps.clear();
                Err(e)
            }
        }
    }
}
