use boombox_core::{ConfigStore, StoreError, CONFIG_KEY, NVS_NAMESPACE};
use hardware::BlobStorage;

/// The boombox configuration blob in its own NVS namespace.
pub struct NvsConfigStore {
    storage: Box<dyn BlobStorage>,
}

impl NvsConfigStore {
    pub fn new(storage: Box<dyn BlobStorage>) -> Self {
        Self { storage }
    }
}

impl ConfigStore for NvsConfigStore {
    fn load_blob(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
        self.storage
            .get_blob(NVS_NAMESPACE, CONFIG_KEY, buf)
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    fn save_blob(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.storage
            .set_blob(NVS_NAMESPACE, CONFIG_KEY, data)
            .map_err(|err| StoreError::Write(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use boombox_core::{BandType, BoomboxConfig, Mode};
    use hardware::sim::MemStorage;

    use super::*;

    #[test]
    fn config_round_trips_through_nvs_namespace() {
        let nvs = MemStorage::new();
        let mut store = NvsConfigStore::new(Box::new(nvs.clone()));
        assert_eq!(BoomboxConfig::load_from(&mut store), Ok(None));

        let mut config = BoomboxConfig::default();
        config.mode = Mode::Web;
        config.air.band = BandType::Mw;
        config.air.frequency = 1008;
        config.save_to(&mut store).unwrap();

        assert!(nvs.get(NVS_NAMESPACE, CONFIG_KEY).is_some());
        assert_eq!(BoomboxConfig::load_from(&mut store), Ok(Some(config)));
    }

    #[test]
    fn oversized_blob_is_reported() {
        let mut nvs = MemStorage::new();
        nvs.set_blob(NVS_NAMESPACE, CONFIG_KEY, &[0u8; 1024]).unwrap();
        let mut store = NvsConfigStore::new(Box::new(nvs));

        let mut buf = [0u8; 16];
        assert!(matches!(
            store.load_blob(&mut buf),
            Err(StoreError::Unavailable(_))
        ));
    }
}
