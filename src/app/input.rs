use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{Key, ModifiersState, PhysicalKey};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Repeat,
    Release,
}

impl KeyAction {
    pub fn from_state(state: ElementState, repeat: bool) -> Self {
        match (state, repeat) {
            (ElementState::Released, _) => KeyAction::Release,
            (ElementState::Pressed, false) => KeyAction::Press,
            (ElementState::Pressed, true) => KeyAction::Repeat,
        }
    }
}

/// One key transition as delivered to the window that owns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyNotice {
    pub key: Key,
    pub physical_key: PhysicalKey,
    pub action: KeyAction,
    pub modifiers: ModifiersState,
}

impl KeyNotice {
    pub fn from_event(event: &KeyEvent, modifiers: ModifiersState) -> Self {
        Self {
            key: event.logical_key.clone(),
            physical_key: event.physical_key,
            action: KeyAction::from_state(event.state, event.repeat),
            modifiers,
        }
    }
}
