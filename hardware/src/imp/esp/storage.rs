use esp_idf_hal::sys::EspError;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use crate::{BlobStorage, HardwareError};

fn map_nvs_err(err: EspError) -> HardwareError {
    log::error!("NVS error: {:?}", err);
    HardwareError::Storage("nvs")
}

/// Default NVS partition, one handle opened per access.
pub struct NvsStorage {
    partition: EspDefaultNvsPartition,
}

impl NvsStorage {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self { partition }
    }

    fn open(&self, namespace: &str) -> Result<EspNvs<NvsDefault>, HardwareError> {
        EspNvs::new(self.partition.clone(), namespace, true).map_err(map_nvs_err)
    }
}

impl BlobStorage for NvsStorage {
    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, HardwareError> {
        let nvs = self.open(namespace)?;
        match nvs.blob_len(key).map_err(map_nvs_err)? {
            None => Ok(None),
            Some(len) if len > buf.len() => Err(HardwareError::Storage("blob larger than buffer")),
            Some(_) => Ok(nvs
                .get_blob(key, buf)
                .map_err(map_nvs_err)?
                .map(|blob| blob.len())),
        }
    }

    fn set_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), HardwareError> {
        let mut nvs = self.open(namespace)?;
        // set_blob commits before returning.
        nvs.set_blob(key, data).map_err(map_nvs_err)
    }
}
