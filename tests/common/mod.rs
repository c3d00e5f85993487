#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::json;
use treeplex::config::Settings;
use treeplex::error::{Result, TreeplexError};
use treeplex::lifecycle::LifecycleManager;
use treeplex::probe::{ExtensionCatalog, ExtensionFailure};
use treeplex::rewrite::{RewriteDecision, RewriteObserver};
use treeplex::sanitize::ObjectData;
use treeplex::tables::ObjectKind;

pub fn memory_manager() -> LifecycleManager {
    LifecycleManager::new(Settings::default()).expect("manager")
}

pub fn manager_without(extensions: &[&str]) -> LifecycleManager {
    let mut settings = Settings::default();
    settings.extensions.disabled = extensions.iter().map(|e| e.to_string()).collect();
    LifecycleManager::new(settings).expect("manager")
}

pub fn person(handle: &str, given: &str, surname: &str) -> ObjectData {
    ObjectData::new(ObjectKind::Person, handle)
        .with("given_name", given)
        .with("surname", surname)
}

pub fn place(handle: &str, name: &str) -> ObjectData {
    ObjectData::new(ObjectKind::Place, handle).with("name", name)
}

pub fn family(handle: &str, father: &str, mother: &str, children: &[&str]) -> ObjectData {
    let refs: Vec<_> = children.iter().map(|child| json!({ "ref": child })).collect();
    ObjectData::new(ObjectKind::Family, handle)
        .with("father_handle", father)
        .with("mother_handle", mother)
        .with("json_data", json!({ "child_ref_list": refs }))
}

/// An observer that keeps every decision it sees.
pub fn recording_observer() -> (RewriteObserver, Arc<Mutex<Vec<RewriteDecision>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: RewriteObserver = Arc::new(move |decision: &RewriteDecision| {
        sink.lock().unwrap().push(decision.clone());
    });
    (observer, seen)
}

/// A scripted extension catalog.
pub struct FakeCatalog {
    pub session: u64,
    pub installed: Mutex<HashSet<String>>,
    pub creatable: Vec<(&'static str, &'static str)>,
    pub failures: Vec<(&'static str, ExtensionFailure)>,
    pub broken: bool,
    pub lookups: Mutex<usize>,
}

impl FakeCatalog {
    pub fn new(session: u64, installed: &[&str]) -> Self {
        Self {
            session,
            installed: Mutex::new(installed.iter().map(|m| m.to_string()).collect()),
            creatable: Vec::new(),
            failures: Vec::new(),
            broken: false,
            lookups: Mutex::new(0),
        }
    }

    /// `extension` can be created and then shows up as `marker`.
    pub fn creatable(mut self, extension: &'static str, marker: &'static str) -> Self {
        self.creatable.push((extension, marker));
        self
    }

    pub fn failing(mut self, extension: &'static str, failure: ExtensionFailure) -> Self {
        self.failures.push((extension, failure));
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn lookup_count(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

impl ExtensionCatalog for FakeCatalog {
    fn session_id(&self) -> u64 {
        self.session
    }

    fn lookup(&self, markers: &[&str]) -> Result<HashSet<String>> {
        *self.lookups.lock().unwrap() += 1;
        if self.broken {
            return Err(TreeplexError::Persistence("permission denied for catalog".into()));
        }
        let installed = self.installed.lock().unwrap();
        Ok(markers
            .iter()
            .filter(|marker| installed.contains(**marker))
            .map(|marker| marker.to_string())
            .collect())
    }

    fn can_create(&self, extension: &str) -> bool {
        self.creatable.iter().any(|(name, _)| *name == extension)
            || self.failures.iter().any(|(name, _)| *name == extension)
    }

    fn create_extension(&self, extension: &str) -> std::result::Result<(), ExtensionFailure> {
        if let Some((_, failure)) = self.failures.iter().find(|(name, _)| *name == extension) {
            return Err(failure.clone());
        }
        match self.creatable.iter().find(|(name, _)| *name == extension) {
            Some((_, marker)) => {
                self.installed.lock().unwrap().insert(marker.to_string());
                Ok(())
            }
            None => Err(ExtensionFailure::Unsupported(format!("{} is not installed", extension))),
        }
    }
}
