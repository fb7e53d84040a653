use std::fmt;

/// Fixed lifecycle vocabulary
///
/// Declaring a mutation under one of these names registers it as the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// The node and all of its children exist and are bound (children first)
    AfterCreate,
    /// The node got a parent, during creation or by later assignment
    AfterAttach,
    /// Receives the raw snapshot and may return a replacement
    PostProcessSnapshot,
    /// The node is about to leave its parent and become a root
    BeforeDetach,
    /// The node is about to be destroyed (parents first)
    BeforeDestroy,
}

impl Hook {
    pub const ALL: [Hook; 5] = [
        Hook::AfterCreate,
        Hook::AfterAttach,
        Hook::PostProcessSnapshot,
        Hook::BeforeDetach,
        Hook::BeforeDestroy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Hook::AfterCreate => "after_create",
            Hook::AfterAttach => "after_attach",
            Hook::PostProcessSnapshot => "post_process_snapshot",
            Hook::BeforeDetach => "before_detach",
            Hook::BeforeDestroy => "before_destroy",
        }
    }

    pub fn from_name(name: &str) -> Option<Hook> {
        Hook::ALL.into_iter().find(|hook| hook.name() == name)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
