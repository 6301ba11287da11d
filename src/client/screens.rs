//! Front-end screen registry keyed by stable ids

use std::collections::HashMap;

use crate::session::state::SessionState;

/// Stable screen identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScreenId(pub &'static str);

impl ScreenId {
    pub const MAIN_MENU: ScreenId = ScreenId("main_menu");
    pub const MULTIPLAYER: ScreenId = ScreenId("multiplayer");
    pub const CREATE_ROOM: ScreenId = ScreenId("create_room");
    pub const ROOM: ScreenId = ScreenId("room");
    pub const GAME: ScreenId = ScreenId("game");

    /// Screen a client in `state` should be looking at
    pub fn for_session(state: SessionState) -> ScreenId {
        match state {
            SessionState::Connecting | SessionState::Disconnected => Self::MAIN_MENU,
            SessionState::Lobby => Self::MULTIPLAYER,
            SessionState::InRoom | SessionState::ReadyWait => Self::ROOM,
            SessionState::InGame | SessionState::GameOver => Self::GAME,
        }
    }
}

impl std::fmt::Display for ScreenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Whether a screen instance survives being hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Built once and reused, keeping its state across visits
    Retained,
    /// Rebuilt on every show
    Transient,
}

pub trait Screen: Send {
    fn show(&mut self);
    fn hide(&mut self);
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScreenError {
    #[error("Screen '{0}' is not registered")]
    NotRegistered(ScreenId),
}

type Constructor = Box<dyn Fn() -> Box<dyn Screen> + Send + Sync>;

struct Entry {
    build: Constructor,
    persistence: Persistence,
}

enum Active {
    Retained(ScreenId),
    Transient(ScreenId, Box<dyn Screen>),
}

/// Registered screens and the one currently shown
#[derive(Default)]
pub struct ScreenRegistry {
    entries: HashMap<ScreenId, Entry>,
    retained: HashMap<ScreenId, Box<dyn Screen>>,
    current: Option<Active>,
}

impl ScreenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `id`
    pub fn register<F>(&mut self, id: ScreenId, persistence: Persistence, build: F)
    where
        F: Fn() -> Box<dyn Screen> + Send + Sync + 'static,
    {
        if self.current_id() == Some(id) {
            self.hide_all();
        }
        self.retained.remove(&id);
        self.entries.insert(
            id,
            Entry {
                build: Box::new(build),
                persistence,
            },
        );
    }

    pub fn is_registered(&self, id: ScreenId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Hide the current screen and show `id`
    pub fn show(&mut self, id: ScreenId) -> Result<(), ScreenError> {
        let persistence = self
            .entries
            .get(&id)
            .map(|e| e.persistence)
            .ok_or(ScreenError::NotRegistered(id))?;
        self.hide_all();

        let entry = self.entries.get(&id).ok_or(ScreenError::NotRegistered(id))?;
        self.current = Some(match persistence {
            Persistence::Retained => {
                let screen = self.retained.entry(id).or_insert_with(|| (entry.build)());
                screen.show();
                Active::Retained(id)
            }
            Persistence::Transient => {
                let mut screen = (entry.build)();
                screen.show();
                Active::Transient(id, screen)
            }
        });
        Ok(())
    }

    pub fn hide_all(&mut self) {
        match self.current.take() {
            Some(Active::Retained(id)) => {
                if let Some(screen) = self.retained.get_mut(&id) {
                    screen.hide();
                }
            }
            Some(Active::Transient(_, mut screen)) => screen.hide(),
            None => {}
        }
    }

    pub fn current_id(&self) -> Option<ScreenId> {
        match &self.current {
            Some(Active::Retained(id)) | Some(Active::Transient(id, _)) => Some(*id),
            None => None,
        }
    }

    /// A retained screen's instance, if it has been built
    pub fn retained(&self, id: ScreenId) -> Option<&dyn Screen> {
        self.retained.get(&id).map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingScreen {
        visible: Arc<AtomicUsize>,
    }

    impl Screen for CountingScreen {
        fn show(&mut self) {
            self.visible.fetch_add(1, Ordering::SeqCst);
        }

        fn hide(&mut self) {
            self.visible.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn counting(built: Arc<AtomicUsize>, visible: Arc<AtomicUsize>) -> impl Fn() -> Box<dyn Screen> {
        move || -> Box<dyn Screen> {
            built.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingScreen {
                visible: visible.clone(),
            })
        }
    }

    #[test]
    fn test_retained_screen_built_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let visible = Arc::new(AtomicUsize::new(0));
        let mut screens = ScreenRegistry::new();
        screens.register(
            ScreenId::MULTIPLAYER,
            Persistence::Retained,
            counting(built.clone(), visible.clone()),
        );
        screens.register(
            ScreenId::MAIN_MENU,
            Persistence::Transient,
            counting(Arc::new(AtomicUsize::new(0)), visible.clone()),
        );

        screens.show(ScreenId::MULTIPLAYER).unwrap();
        screens.show(ScreenId::MAIN_MENU).unwrap();
        screens.show(ScreenId::MULTIPLAYER).unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(visible.load(Ordering::SeqCst), 1);
        assert_eq!(screens.current_id(), Some(ScreenId::MULTIPLAYER));
        assert!(screens.retained(ScreenId::MULTIPLAYER).is_some());
    }

    #[test]
    fn test_transient_screen_rebuilt() {
        let built = Arc::new(AtomicUsize::new(0));
        let visible = Arc::new(AtomicUsize::new(0));
        let mut screens = ScreenRegistry::new();
        screens.register(
            ScreenId::ROOM,
            Persistence::Transient,
            counting(built.clone(), visible.clone()),
        );

        screens.show(ScreenId::ROOM).unwrap();
        screens.show(ScreenId::ROOM).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(visible.load(Ordering::SeqCst), 1);
        assert!(screens.retained(ScreenId::ROOM).is_none());

        screens.hide_all();
        assert_eq!(visible.load(Ordering::SeqCst), 0);
        assert_eq!(screens.current_id(), None);
    }

    #[test]
    fn test_unknown_screen() {
        let mut screens = ScreenRegistry::new();
        assert_eq!(
            screens.show(ScreenId::GAME),
            Err(ScreenError::NotRegistered(ScreenId::GAME))
        );
    }

    #[test]
    fn test_screen_for_session() {
        assert_eq!(ScreenId::for_session(SessionState::Lobby), ScreenId::MULTIPLAYER);
        assert_eq!(ScreenId::for_session(SessionState::ReadyWait), ScreenId::ROOM);
        assert_eq!(ScreenId::for_session(SessionState::GameOver), ScreenId::GAME);
    }
}
