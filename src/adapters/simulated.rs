use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::DriveEnumerator;
use crate::core::models::Volume;

type Attached = Arc<Mutex<BTreeMap<PathBuf, Volume>>>;

/// Controller handle for injecting attach/detach changes.
#[derive(Clone)]
pub struct Simulator {
    attached: Attached,
}

impl Simulator {
    pub fn add_device(&self, root: impl Into<PathBuf>) {
        let volume = Volume::new(root);
        println!("(Simulator) Attached {}", volume.root.display());
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(volume.root.clone(), volume);
    }

    pub fn remove_device(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        println!("(Simulator) Detached {}", root.display());
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&root);
    }
}

/// Enumerator whose "mounted" volumes are whatever the [`Simulator`] says.
pub struct SimulatedEnumerator {
    attached: Attached,
}

impl SimulatedEnumerator {
    pub fn new() -> (Self, Simulator) {
        let attached: Attached = Arc::default();
        (
            Self {
                attached: attached.clone(),
            },
            Simulator { attached },
        )
    }
}

impl DriveEnumerator for SimulatedEnumerator {
    fn removable_volumes(&self) -> anyhow::Result<Vec<Volume>> {
        Ok(self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}
