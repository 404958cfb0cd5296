//! Property-based test generators using proptest.

use crate::fixtures::Note;
use proptest::prelude::*;

/// Strategy for generating note titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9 ]{0,15}").expect("Invalid regex")
}

/// Strategy for generating unsaved notes.
pub fn note_strategy() -> impl Strategy<Value = Note> {
    (title_strategy(), prop::string::string_regex("[ -~]{0,64}").expect("Invalid regex")).prop_map(
        |(title, body)| Note {
            id: None,
            title,
            body,
            updated_at: None,
        },
    )
}

/// An application-side action against a synchronized collection.
///
/// Indices pick among the live local records at the time the action is
/// applied, modulo their count; actions on an empty collection are no-ops.
#[derive(Debug, Clone)]
pub enum LocalAction {
    /// Save a new note.
    Create(Note),
    /// Retitle an existing note.
    Edit {
        /// Which live note.
        index: usize,
        /// New title.
        title: String,
    },
    /// Delete an existing note.
    Delete {
        /// Which live note.
        index: usize,
    },
    /// Another client retitles a remote note.
    RemoteEdit {
        /// Which remote note.
        index: usize,
        /// New title.
        title: String,
    },
    /// Run a sync cycle.
    Sync,
}

/// Strategy for generating local actions.
pub fn local_action_strategy() -> impl Strategy<Value = LocalAction> {
    prop_oneof![
        4 => note_strategy().prop_map(LocalAction::Create),
        3 => (any::<usize>(), title_strategy())
            .prop_map(|(index, title)| LocalAction::Edit { index, title }),
        2 => any::<usize>().prop_map(|index| LocalAction::Delete { index }),
        1 => (any::<usize>(), title_strategy())
            .prop_map(|(index, title)| LocalAction::RemoteEdit { index, title }),
        2 => Just(LocalAction::Sync),
    ]
}

/// Strategy for generating a sequence of actions.
pub fn local_action_sequence_strategy(
    min_actions: usize,
    max_actions: usize,
) -> impl Strategy<Value = Vec<LocalAction>> {
    prop::collection::vec(local_action_strategy(), min_actions..max_actions)
}
