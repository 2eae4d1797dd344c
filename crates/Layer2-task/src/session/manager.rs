//! Session Manager - named, ordered collection of sessions

use super::Session;
use indexmap::IndexMap;
use rctl_foundation::Result;
use tracing::{info, warn};

/// Insertion-ordered name → session map
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: IndexMap<String, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session, returning the one previously stored under `name`.
    /// A replaced session keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, session: Session) -> Option<Session> {
        self.sessions.insert(name.into(), session)
    }

    pub fn get(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    /// Remove a session without closing it
    pub fn remove(&mut self, name: &str) -> Option<Session> {
        self.sessions.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Session)> {
        self.sessions.iter().map(|(name, session)| (name.as_str(), session))
    }

    /// Close every session in order. All are attempted; the first error is returned.
    pub fn close_all(&self) -> Result<()> {
        info!("Closing {} sessions", self.sessions.len());

        let mut first_error = None;
        for (name, session) in &self.sessions {
            if let Err(e) = session.close() {
                warn!("Failed to close session '{}': {}", name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ReaderOptions, StreamHandler, StreamReader};
    use crate::session::{OpenMode, SessionBackend, SessionFile};
    use rctl_foundation::Error;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Backend that only counts close calls, optionally failing them
    struct CountingBackend {
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    impl SessionBackend for CountingBackend {
        fn kind(&self) -> &'static str {
            "counting"
        }
        fn open(&self, _: &Path, _: OpenMode) -> Result<Box<dyn SessionFile>> {
            Err(Error::NotFound("no files".into()))
        }
        fn exists(&self, _: &Path) -> Result<bool> {
            Ok(false)
        }
        fn is_dir(&self, _: &Path) -> Result<bool> {
            Ok(false)
        }
        fn mkdir(&self, _: &Path) -> Result<()> {
            Ok(())
        }
        fn list_dir(&self, _: &Path) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn spawn_reader(
            &self,
            command: &str,
            _: Arc<dyn StreamHandler>,
            _: ReaderOptions,
        ) -> Result<Box<dyn StreamReader>> {
            Err(Error::spawn(command, "unsupported"))
        }
        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Internal("close failed".into()));
            }
            Ok(())
        }
    }

    fn counting(name: &str, fail: bool) -> (Session, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            closes: closes.clone(),
            fail,
        };
        (Session::new(name, backend), closes)
    }

    #[test]
    fn test_insertion_order() {
        let mut manager = SessionManager::new();
        for name in ["web", "db", "cache"] {
            manager.insert(name, counting(name, false).0);
        }
        assert_eq!(manager.names().collect::<Vec<_>>(), vec!["web", "db", "cache"]);

        manager.remove("db");
        assert!(!manager.contains("db"));
        assert_eq!(manager.names().collect::<Vec<_>>(), vec!["web", "cache"]);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get("cache").unwrap().name(), "cache");
    }

    #[test]
    fn test_close_all_attempts_every_session() {
        let mut manager = SessionManager::new();
        let (a, a_closes) = counting("a", false);
        let (b, b_closes) = counting("b", true);
        let (c, c_closes) = counting("c", false);
        manager.insert("a", a);
        manager.insert("b", b);
        manager.insert("c", c);

        let err = manager.close_all().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        for closes in [&a_closes, &b_closes, &c_closes] {
            assert_eq!(closes.load(Ordering::SeqCst), 1);
        }
        assert!(manager.iter().all(|(_, session)| session.is_closed()));

        // second close is a no-op on every session
        manager.close_all().unwrap();
        assert_eq!(b_closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_manager() {
        let manager = SessionManager::new();
        assert!(manager.is_empty());
        manager.close_all().unwrap();
    }
}
