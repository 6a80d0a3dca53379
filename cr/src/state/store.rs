//! CheckpointStoreUnit - puts a `CheckpointStore` on the bus

use std::sync::Arc;

use checkstore::CheckpointStore;
use tracing::debug;

use crate::error::Result;
use crate::events::{Bus, Event, EventKind, Unit, UnitCore, weak_handler};

/// Serves `StateSave` and `StateLoad` requests from a checkpoint store
pub struct CheckpointStoreUnit {
    core: UnitCore,
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointStoreUnit {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            core: UnitCore::new("checkpoint-store"),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    fn on_save(&self, event: &Event) -> Result<()> {
        let Event::StateSave { tag, snapshot } = event else {
            return Ok(());
        };
        debug!(%tag, cycle_index = snapshot.cycle_index, "CheckpointStoreUnit::on_save: called");

        self.core.publish(Event::CheckpointSaving {
            tag: tag.clone(),
            cycle_index: snapshot.cycle_index,
        })?;
        self.store.save(tag, snapshot)?;
        self.core.publish(Event::CheckpointSaved { tag: tag.clone() })
    }

    fn on_load(&self, event: &Event) -> Result<()> {
        let Event::StateLoad { tag } = event else {
            return Ok(());
        };
        let Some(snapshot) = self.store.load(tag)? else {
            debug!(%tag, "CheckpointStoreUnit::on_load: nothing stored, starting fresh");
            return Ok(());
        };

        self.core.publish(Event::CheckpointLoading { tag: tag.clone() })?;
        self.core.publish(Event::CheckpointLoaded {
            tag: tag.clone(),
            snapshot,
        })
    }
}

impl Unit for CheckpointStoreUnit {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        self.core
            .subscribe(EventKind::StateSave, weak_handler(&self, Self::on_save))?
            .subscribe(EventKind::StateLoad, weak_handler(&self, Self::on_load))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkstore::{FileStore, MemoryStore, Snapshot};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn record_kinds(bus: &Bus) -> Arc<Mutex<Vec<EventKind>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = UnitCore::with_bus("recorder", bus);
        for kind in [
            EventKind::CheckpointSaving,
            EventKind::CheckpointSaved,
            EventKind::CheckpointLoading,
            EventKind::CheckpointLoaded,
        ] {
            let sink = Arc::clone(&log);
            recorder
                .subscribe(kind, move |event| {
                    sink.lock().unwrap().push(event.kind());
                    Ok(())
                })
                .unwrap();
        }
        log
    }

    fn snapshot(cycle_index: usize) -> Snapshot {
        Snapshot::new(json!({"w": 1}), json!({"lr": 0.1}), json!({"n": 1}), cycle_index)
    }

    #[test]
    fn test_save_writes_and_brackets() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(temp.path(), "_checkpoint.json").unwrap());
        let bus = Bus::new();
        let unit = Arc::new(CheckpointStoreUnit::new(store.clone()));
        Arc::clone(&unit).attach(&bus).unwrap();
        let log = record_kinds(&bus);

        bus.publish(Event::StateSave {
            tag: "last".to_string(),
            snapshot: snapshot(2),
        })
        .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![EventKind::CheckpointSaving, EventKind::CheckpointSaved]
        );
        assert!(temp.path().join("last_checkpoint.json").exists());
        assert_eq!(store.load("last").unwrap().unwrap().cycle_index, 2);
    }

    #[test]
    fn test_load_existing_tag() {
        let store = Arc::new(MemoryStore::new());
        store.save("best", &snapshot(5)).unwrap();
        let bus = Bus::new();
        let unit = Arc::new(CheckpointStoreUnit::new(store));
        Arc::clone(&unit).attach(&bus).unwrap();
        let log = record_kinds(&bus);

        bus.publish(Event::StateLoad {
            tag: "best".to_string(),
        })
        .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![EventKind::CheckpointLoading, EventKind::CheckpointLoaded]
        );
    }

    #[test]
    fn test_load_missing_tag_is_silent() {
        let bus = Bus::new();
        let unit = Arc::new(CheckpointStoreUnit::new(Arc::new(MemoryStore::new())));
        Arc::clone(&unit).attach(&bus).unwrap();
        let log = record_kinds(&bus);

        bus.publish(Event::StateLoad {
            tag: "last".to_string(),
        })
        .unwrap();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_tag_propagates() {
        let bus = Bus::new();
        let unit = Arc::new(CheckpointStoreUnit::new(Arc::new(MemoryStore::new())));
        Arc::clone(&unit).attach(&bus).unwrap();

        let result = bus.publish(Event::StateSave {
            tag: "../escape".to_string(),
            snapshot: snapshot(1),
        });

        assert!(matches!(result, Err(crate::error::Error::Store(_))));
    }
}
